use crate::error::{ProxyError, Result};
use crate::relay::bounded;
use log::{debug, trace};
use std::{io, net::SocketAddr, time::Duration};
use tokio::net::{self, TcpStream};

/// A connection to one origin address, used for a single exchange.
#[derive(Debug)]
pub struct UpstreamSession {
    stream: TcpStream,
    addr: SocketAddr,
}

impl UpstreamSession {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Resolves `host` to its candidate addresses, in resolver order.
pub async fn resolve(host: &str, port: u16, limit: Option<Duration>) -> Result<Vec<SocketAddr>> {
    let addrs = bounded(limit, net::lookup_host((host, port)))
        .await
        .map_err(|source| ProxyError::Resolve {
            host: host.to_owned(),
            source,
        })?
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(ProxyError::Resolve {
            host: host.to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }
    trace!("resolved {} to {:?}", host, addrs);
    Ok(addrs)
}

/// Connects to the first candidate for `host` that accepts. Later candidates
/// are never tried once one succeeds.
pub async fn connect(host: &str, port: u16, limit: Option<Duration>) -> Result<UpstreamSession> {
    let addrs = resolve(host, port, limit).await?;
    let mut last_err = None;
    for addr in addrs {
        match bounded(limit, TcpStream::connect(addr)).await {
            Ok(stream) => {
                debug!("connected to {} at {}", host, addr);
                return Ok(UpstreamSession { stream, addr });
            }
            Err(e) => {
                debug!("error connecting to {} at {}: {}", host, addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(ProxyError::Connect {
        host: host.to_owned(),
        source: last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
    })
}
