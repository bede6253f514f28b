use crate::{
    config::Config,
    error::{ErrorKind, ProxyError, Result},
    relay::{self, bounded, Exchange},
    request::parse_request,
    upstream::{self, UpstreamSession},
};
use log::{log, Level};
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\n";
const BAD_GATEWAY_RESPONSE: &[u8] = b"HTTP/1.0 502 Bad Gateway\r\n\r\n";

/// An accepted client socket and who it came from.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: String,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            peer: addr.to_string(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Accepted,
    Parsed,
    Connected,
    Relayed,
    Failed(ErrorKind),
    Closed,
}

/// What a finished worker went through and how it ended.
#[derive(Debug)]
pub struct Outcome {
    pub peer: String,
    pub states: Vec<State>,
    pub result: Result<Exchange>,
}

impl Outcome {
    pub fn final_state(&self) -> Option<State> {
        self.states.last().copied()
    }
}

/// Owns one client connection from accept to close. Nothing here is shared
/// with other workers except the read-only config.
pub struct ConnectionWorker {
    conn: Connection,
    config: Arc<Config>,
    upstream: Option<UpstreamSession>,
    server: Option<String>,
    states: Vec<State>,
}

impl ConnectionWorker {
    pub fn new(conn: Connection, config: Arc<Config>) -> Self {
        Self {
            conn,
            config,
            upstream: None,
            server: None,
            states: vec![State::Accepted],
        }
    }

    pub fn state(&self) -> State {
        *self.states.last().unwrap_or(&State::Accepted)
    }

    pub async fn run(mut self) -> Outcome {
        self.logm(Level::Trace, "handling connection");
        let result = self.exchange().await;
        match &result {
            Ok(exchange) => {
                if exchange.filled {
                    self.logm(
                        Level::Warn,
                        format!(
                            "response filled the {} byte buffer, it may be truncated",
                            self.config.response_buffer_size
                        ),
                    );
                }
                self.logm(
                    Level::Info,
                    format!(
                        "relayed {} request bytes and {} response bytes",
                        exchange.request_bytes, exchange.response_bytes
                    ),
                );
            }
            Err(e) => {
                self.advance(State::Failed(e.kind()));
                self.logm(Level::Warn, e);
                self.send_error_response(e).await;
            }
        }
        self.close().await;
        Outcome {
            peer: self.conn.peer,
            states: self.states,
            result,
        }
    }

    async fn exchange(&mut self) -> Result<Exchange> {
        let limit = self.config.io_timeout();

        // Single read; a request line longer than this is parsed as captured
        let mut raw = vec![0u8; self.config.request_buffer_size];
        let n = bounded(limit, self.conn.stream.read(&mut raw)).await?;
        raw.truncate(n);

        let target = parse_request(&raw)?;
        let port = target.port.unwrap_or(self.config.upstream_port);
        self.server = Some(format!("{}:{}", target.host, port));
        self.advance(State::Parsed);
        self.logm(
            Level::Debug,
            format!("{} {} /{}", target.method, target.host, target.path),
        );

        let upstream = upstream::connect(target.host, port, limit).await?;
        self.server = Some(format!("{} ({})", target.host, upstream.addr()));
        self.advance(State::Connected);
        let upstream = self.upstream.insert(upstream);

        let exchange = relay::relay(
            &mut self.conn.stream,
            upstream.stream_mut(),
            &raw,
            self.config.response_buffer_size,
            limit,
        )
        .await?;
        self.advance(State::Relayed);
        Ok(exchange)
    }

    async fn send_error_response(&mut self, err: &ProxyError) {
        if !self.config.error_responses {
            return;
        }
        let response = match err.kind() {
            ErrorKind::Parse => BAD_REQUEST_RESPONSE,
            ErrorKind::Resolve | ErrorKind::Connect => BAD_GATEWAY_RESPONSE,
            // Part of a response may already be on the wire
            _ => return,
        };
        let limit = self.config.io_timeout();
        if let Err(e) = relay::write_all(&mut self.conn.stream, response, limit).await {
            self.logm(Level::Debug, format!("error writing response to client stream: {}", e));
        }
    }

    // Both sockets are dropped with the worker; shutting down here makes the
    // FIN go out before the outcome is reported.
    async fn close(&mut self) {
        if let Some(mut upstream) = self.upstream.take() {
            if let Err(e) = upstream.stream_mut().shutdown().await {
                self.logm(Level::Trace, format!("error shutting down server stream: {}", e));
            }
        }
        if let Err(e) = self.conn.stream.shutdown().await {
            self.logm(Level::Trace, format!("error shutting down client stream: {}", e));
        }
        self.advance(State::Closed);
    }

    fn advance(&mut self, next: State) {
        self.logm(Level::Trace, format!("{:?} -> {:?}", self.state(), next));
        self.states.push(next);
    }

    fn logm(&self, level: Level, msg: impl fmt::Display) {
        log!(
            level,
            "client: {}, server: {}: {}",
            self.conn.peer(),
            self.server.as_deref().unwrap_or("N/A"),
            msg
        );
    }
}
