//! A small forward HTTP proxy. Each accepted connection is read once, the
//! origin is taken from the absolute URI on the request line, the request is
//! forwarded verbatim and at most one buffer's worth of response is sent back
//! before both sockets are closed.

pub mod config;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod request;
pub mod upstream;
pub mod worker;

pub use config::Config;
pub use error::{ErrorKind, ProxyError, Result};
pub use proxy::Proxy;
