use forward_proxy::{Config, Proxy};
use log::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let proxy = match Config::load() {
        Ok(config) => Proxy::bind(config).await,
        Err(e) => Err(e),
    };
    let proxy = match proxy {
        Ok(proxy) => proxy,
        Err(e) => {
            error!("{}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    };
    proxy
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("error listening for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
