use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Binding or listening failed; the proxy cannot serve.
    #[error("setup error: {0}")]
    Setup(#[source] io::Error),

    #[error("accept error: {0}")]
    Accept(#[source] io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("error resolving {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Every resolved candidate refused or failed; `source` is the last failure.
    #[error("error connecting to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Setup,
    Accept,
    Parse,
    Resolve,
    Connect,
    Io,
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Setup(_) => ErrorKind::Setup,
            ProxyError::Accept(_) => ErrorKind::Accept,
            ProxyError::Parse(_) => ErrorKind::Parse,
            ProxyError::Resolve { .. } => ErrorKind::Resolve,
            ProxyError::Connect { .. } => ErrorKind::Connect,
            ProxyError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn parse(what: impl Into<String>) -> Self {
        ProxyError::Parse(what.into())
    }

    pub(crate) fn setup(what: impl Into<String>) -> Self {
        ProxyError::Setup(io::Error::new(io::ErrorKind::InvalidInput, what.into()))
    }
}
