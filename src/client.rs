//! Client side of the arithmetic protocol.
//!
//! One TCP connection is opened per request, matching the server's
//! one-request-per-connection framing.

use crate::dispatch::OpCode;
use crate::protocol::{CodecError, Request, Response, RESPONSE_LEN};
use bytes::BytesMut;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("server closed the connection without a response")]
    NoResponse,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A completed request/response exchange.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: Request,
    pub request_bytes: BytesMut,
    pub response: Response,
    pub response_bytes: [u8; RESPONSE_LEN],
    pub rtt: Duration,
}

/// Arithmetic protocol client
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    timeout: Duration,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Client {
            addr: addr.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Bound on connect, write and read of a single exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `op` on the two operands, naming it by its op name.
    pub async fn call(
        &self,
        op: OpCode,
        operand_one: i32,
        operand_two: i32,
        request_id: u16,
    ) -> Result<Exchange, ClientError> {
        let request = Request::new(op.code(), operand_one, operand_two, request_id, op.name())?;
        self.send(request).await
    }

    /// Send an arbitrary request, consistent or not.
    pub async fn send(&self, request: Request) -> Result<Exchange, ClientError> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn exchange(&self, request: Request) -> Result<Exchange, ClientError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;

        let request_bytes = request.encode();
        let start = Instant::now();
        stream.write_all(&request_bytes).await?;

        let mut response_bytes = [0u8; RESPONSE_LEN];
        match stream.read_exact(&mut response_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ClientError::NoResponse)
            }
            Err(e) => return Err(e.into()),
        }
        let rtt = start.elapsed();

        let response = Response::decode(&response_bytes)?;
        Ok(Exchange {
            request,
            request_bytes,
            response,
            response_bytes,
            rtt,
        })
    }
}

/// Round-trip time statistics
#[derive(Debug, Default, Clone)]
pub struct RttStats {
    samples: Vec<Duration>,
}

impl RttStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rtt: Duration) {
        self.samples.push(rtt);
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: u128 = self.samples.iter().map(Duration::as_nanos).sum();
        let average = total / self.samples.len() as u128;
        Some(Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX)))
    }
}

/// Format bytes as space-separated uppercase hex.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_stats() {
        let mut stats = RttStats::new();
        assert_eq!(stats.min(), None);
        assert_eq!(stats.average(), None);

        for ms in [30, 10, 20] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min(), Some(Duration::from_millis(10)));
        assert_eq!(stats.max(), Some(Duration::from_millis(30)));
        assert_eq!(stats.average(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_rtt_average_of_large_samples() {
        let mut stats = RttStats::new();
        stats.record(Duration::from_secs(u32::MAX as u64));
        stats.record(Duration::from_secs(u32::MAX as u64 + 2));
        assert_eq!(stats.average(), Some(Duration::from_secs(u32::MAX as u64 + 1)));

        let mut stats = RttStats::new();
        stats.record(Duration::from_nanos(1));
        stats.record(Duration::from_nanos(2));
        assert_eq!(stats.average(), Some(Duration::from_nanos(1)));
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[8, 0, 0xAB, 127]), "08 00 AB 7F");
    }

    #[tokio::test]
    async fn test_no_response_when_server_closes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let request_len = Request::new(0, 1, 2, 3, "addition").unwrap().encoded_len();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; request_len];
            let _ = stream.read_exact(&mut buf).await;
        });

        let err = Client::new(addr.to_string())
            .call(OpCode::Add, 1, 2, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoResponse));
    }
}
