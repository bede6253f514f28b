use crate::{
    config::Config,
    error::{ProxyError, Result},
    worker::{Connection, ConnectionWorker, Outcome},
};
use log::{error, info, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    future::{self, Future},
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    task::{JoinError, JoinSet},
};

const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

pub struct Proxy {
    listener: TcpListener,
    config: Arc<Config>,
    workers: JoinSet<Outcome>,
}

impl Proxy {
    /// Binds and starts listening. Any failure here is fatal.
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        trace!("attempting to listen on {}", config.listen_addr);
        let listener = listen(&config).map_err(ProxyError::Setup)?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            workers: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(ProxyError::Setup)
    }

    /// Workers spawned and not yet reclaimed.
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    pub async fn run(self) {
        self.serve_until(future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Each connection gets its
    /// own task; finished tasks are reaped inside the same loop so neither
    /// waits on the other. Workers still running at shutdown are aborted.
    pub async fn serve_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = self.local_addr() {
            info!("starting server on {}", addr);
        }
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                res = self.listener.accept() => match res {
                    Ok((stream, addr)) => self.dispatch(stream, addr),
                    Err(e) => accept_failed(e).await,
                },
                Some(done) = self.workers.join_next(), if !self.workers.is_empty() => {
                    reap(done);
                }
            }
        }
        info!(
            "shutting down, aborting {} in-flight connections",
            self.workers.len()
        );
        self.workers.shutdown().await;
    }

    fn dispatch(&mut self, stream: TcpStream, addr: SocketAddr) {
        info!("got connection from {}", addr);
        let worker = ConnectionWorker::new(Connection::new(stream, addr), Arc::clone(&self.config));
        self.workers.spawn(worker.run());
        trace!("{} live workers", self.workers.len());
    }
}

// Errors like EMFILE do not clear on their own; pausing keeps the loop from
// spinning on them. In-flight workers keep running meanwhile.
async fn accept_failed(e: io::Error) {
    error!("{}", ProxyError::Accept(e));
    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
}

fn reap(done: std::result::Result<Outcome, JoinError>) {
    match done {
        Ok(outcome) => trace!(
            "reclaimed worker for {} ({:?})",
            outcome.peer,
            outcome.final_state()
        ),
        Err(e) if e.is_cancelled() => (),
        Err(e) => warn!("connection worker panicked: {}", e),
    }
}

fn listen(config: &Config) -> io::Result<TcpListener> {
    let addr = config
        .listen_addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(config.backlog).unwrap_or(i32::MAX))?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}
