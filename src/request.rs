use crate::error::{ProxyError, Result};

/// The parts of a proxy request line the proxy needs, borrowed from the raw
/// request bytes so those bytes can still be forwarded untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTarget<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Explicit port from the URI authority, if any.
    pub port: Option<u16>,
    /// Everything after the first slash following the authority.
    pub path: &'a str,
    pub version: Option<&'a str>,
}

// Parses the first line of an absolute-form request
// (`GET http://host[:port]/path HTTP/1.1`). Only the bytes up to the first
// '\n' are looked at; if there is none, the whole capture is used.
pub fn parse_request(request: &[u8]) -> Result<ParsedTarget<'_>> {
    if request.is_empty() {
        return Err(ProxyError::parse("empty request"));
    }
    let end = request
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(request.len());
    let line = &request[..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = std::str::from_utf8(line)
        .map_err(|_| ProxyError::parse("request line is not valid utf-8"))?;

    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::parse("empty request line"))?;
    let uri = parts
        .next()
        .ok_or_else(|| ProxyError::parse("missing request uri"))?;
    let version = parts.next();

    let (_scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| ProxyError::parse(format!("no host in request uri {:?}", uri)))?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };
    // Drop any userinfo
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    let (host, port) = split_authority(authority)?;
    if host.is_empty() {
        return Err(ProxyError::parse(format!("no host in request uri {:?}", uri)));
    }

    Ok(ParsedTarget {
        method,
        host,
        port,
        path,
        version,
    })
}

fn split_authority(authority: &str) -> Result<(&str, Option<u16>)> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| ProxyError::parse(format!("unterminated ipv6 host {:?}", authority)))?;
        let port = rest[close + 1..].strip_prefix(':');
        (&rest[..close], port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };
    let port = match port {
        Some("") | None => None,
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| ProxyError::parse(format!("invalid port {:?}", p)))?,
        ),
    };
    Ok((host, port))
}
