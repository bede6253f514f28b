use crate::error::Result;
use std::{future::Future, io, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// Runs `fut`, failing with `TimedOut` if `limit` is set and passes first
pub(crate) async fn bounded<F, T>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?,
        None => fut.await,
    }
}

/// Fixed-capacity buffer holding at most the first `capacity` bytes of an
/// origin's response.
#[derive(Debug)]
pub struct ResponseBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ResponseBuffer {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when reading stopped because there was no room left, which means
    /// the response may have been cut short.
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Byte counts from one completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub request_bytes: usize,
    pub response_bytes: usize,
    pub filled: bool,
}

/// Writes all of `bytes`, looping over short writes. A write that makes no
/// progress is treated as a lost connection.
pub async fn write_all<W>(writer: &mut W, bytes: &[u8], limit: Option<Duration>) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0;
    while sent < bytes.len() {
        let n = bounded(limit, writer.write(&bytes[sent..])).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        sent += n;
    }
    bounded(limit, writer.flush()).await?;
    Ok(sent)
}

/// Reads until the peer closes or `capacity` bytes have arrived, whichever
/// comes first. Bytes past `capacity` are left unread.
pub async fn read_response<R>(
    reader: &mut R,
    capacity: usize,
    limit: Option<Duration>,
) -> Result<ResponseBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut data = vec![0u8; capacity];
    let mut received = 0;
    while received < capacity {
        let n = bounded(limit, reader.read(&mut data[received..])).await?;
        if n == 0 {
            break;
        }
        received += n;
    }
    data.truncate(received);
    Ok(ResponseBuffer { data, capacity })
}

/// Forwards `request` upstream, captures the response, and hands it to the
/// client. Closing either side is left to the caller.
pub async fn relay<C, U>(
    client: &mut C,
    upstream: &mut U,
    request: &[u8],
    capacity: usize,
    limit: Option<Duration>,
) -> Result<Exchange>
where
    C: AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let request_bytes = write_all(upstream, request, limit).await?;
    let response = read_response(upstream, capacity, limit).await?;
    let response_bytes = write_all(client, response.as_bytes(), limit).await?;
    Ok(Exchange {
        request_bytes,
        response_bytes,
        filled: response.is_full(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::io::duplex;

    fn response_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn short_writes_are_accumulated() {
        // An 8 byte pipe forces many partial writes
        let (mut near, mut far) = duplex(8);
        let request = b"GET http://example.test/ HTTP/1.1\r\nHost: example.test\r\n\r\n".to_vec();
        let expected = request.clone();
        let reader = tokio::spawn(async move {
            let mut got = Vec::new();
            far.read_to_end(&mut got).await.unwrap();
            got
        });

        let sent = write_all(&mut near, &request, None).await.unwrap();
        drop(near);
        assert_eq!(sent, expected.len());
        assert_eq!(reader.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn writing_to_a_closed_peer_is_an_io_error() {
        let (mut near, far) = duplex(64);
        drop(far);
        let err = write_all(&mut near, b"hello", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn response_larger_than_capacity_is_truncated() {
        let (mut origin, mut proxy) = duplex(1024);
        let body = response_of(300);
        let sent = body.clone();
        tokio::spawn(async move {
            let _ = origin.write_all(&sent).await;
        });

        let buf = read_response(&mut proxy, 100, None).await.unwrap();
        assert_eq!(buf.len(), 100);
        assert!(buf.is_full());
        assert_eq!(buf.as_bytes(), &body[..100]);
    }

    #[tokio::test]
    async fn response_within_capacity_is_complete() {
        for (size, capacity) in [(0, 16), (15, 16), (16, 16)] {
            let (mut origin, mut proxy) = duplex(4);
            let body = response_of(size);
            let sent = body.clone();
            tokio::spawn(async move {
                origin.write_all(&sent).await.unwrap();
            });

            let buf = read_response(&mut proxy, capacity, None).await.unwrap();
            assert_eq!(buf.as_bytes(), &body[..]);
            assert_eq!(buf.is_full(), size == capacity);
            assert_eq!(buf.capacity(), capacity);
        }
    }

    #[tokio::test]
    async fn stalled_origin_times_out_when_bounded() {
        let (_origin, mut proxy) = duplex(64);
        let err = read_response(&mut proxy, 64, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        match err {
            crate::ProxyError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn relay_moves_request_and_response() {
        let (mut client, mut client_side) = duplex(32);
        let (mut upstream, mut origin) = duplex(32);
        let request = b"GET http://example.test/index.html HTTP/1.1\r\n\r\n".to_vec();
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec();

        let expected_request = request.clone();
        let reply = response.clone();
        let origin_task = tokio::spawn(async move {
            let mut got = vec![0u8; expected_request.len()];
            origin.read_exact(&mut got).await.unwrap();
            origin.write_all(&reply).await.unwrap();
            got
        });
        let client_task = tokio::spawn(async move {
            let mut got = Vec::new();
            client_side.read_to_end(&mut got).await.unwrap();
            got
        });

        let exchange = relay(&mut client, &mut upstream, &request, 1024, None)
            .await
            .unwrap();
        drop(client);

        assert_eq!(exchange.request_bytes, request.len());
        assert_eq!(exchange.response_bytes, response.len());
        assert!(!exchange.filled);
        assert_eq!(origin_task.await.unwrap(), request);
        assert_eq!(client_task.await.unwrap(), response);
    }
}
