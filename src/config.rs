use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, io, time::Duration};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8888";
pub const DEFAULT_BACKLOG: u32 = 10;
pub const HTTP_PORT: u16 = 80;
// One byte short of 16 KiB
pub const DEFAULT_BUFFER_SIZE: usize = (1 << 14) - 1;

/// Names a JSON file holding a [`Config`].
pub const CONFIG_ENV: &str = "PROXY_CONFIG";
/// Overrides `listen_addr` after the file (if any) is read.
pub const ADDR_ENV: &str = "PROXY_ADDR";

/// Tunables handed to the proxy at startup. The core never reads the
/// environment itself; `main` builds one of these and passes it in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub backlog: u32,
    /// Capacity of the single read that captures a client's request.
    pub request_buffer_size: usize,
    /// Capacity of the response buffer; anything past it is dropped.
    pub response_buffer_size: usize,
    pub upstream_port: u16,
    /// Bounds connect, read and write when set. Unset means wait forever.
    pub io_timeout_ms: Option<u64>,
    /// Send a bare 400/502 to the client before closing on parse or
    /// upstream failures instead of just closing.
    pub error_responses: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            backlog: DEFAULT_BACKLOG,
            request_buffer_size: DEFAULT_BUFFER_SIZE,
            response_buffer_size: DEFAULT_BUFFER_SIZE,
            upstream_port: HTTP_PORT,
            io_timeout_ms: None,
            error_responses: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(ProxyError::Setup)?;
                Self::from_json(&contents)?
            }
            None => Self::default(),
        };
        if let Ok(addr) = env::var(ADDR_ENV) {
            config.listen_addr = addr;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| ProxyError::Setup(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.backlog == 0 {
            return Err(ProxyError::setup("backlog must be greater than zero"));
        }
        if self.request_buffer_size == 0 {
            return Err(ProxyError::setup("request_buffer_size must be greater than zero"));
        }
        if self.response_buffer_size == 0 {
            return Err(ProxyError::setup("response_buffer_size must be greater than zero"));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defaults_match_the_classic_constants() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8888");
        assert_eq!(config.backlog, 10);
        assert_eq!(config.request_buffer_size, 16383);
        assert_eq!(config.response_buffer_size, 16383);
        assert_eq!(config.upstream_port, 80);
        assert_eq!(config.io_timeout(), None);
        assert!(!config.error_responses);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            Config::from_json(r#"{"listen_addr": "127.0.0.1:9000", "io_timeout_ms": 1500}"#)
                .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.io_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.upstream_port, HTTP_PORT);
    }

    #[test]
    fn bad_json_is_a_setup_error() {
        let err = Config::from_json("{ listen_addr: ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Setup);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = Config::default();
        config.response_buffer_size = 0;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Setup);

        let mut config = Config::default();
        config.backlog = 0;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Setup);
    }
}
