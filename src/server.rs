//! TCP server for the arithmetic protocol.
//!
//! Each accepted connection carries exactly one request: the server reads
//! it, dispatches it, writes the 8-byte response and closes the connection.
//! A connection that ends early, stalls past the read timeout, or sends an
//! undecodable op name is closed without a response.

use crate::config::{Config, ConnectionMode};
use crate::dispatch;
use crate::protocol::{CodecError, Request, Response, REQUEST_HEADER_LEN};
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Largest possible request: header plus a 255 code unit name.
const MAX_REQUEST_LEN: usize = REQUEST_HEADER_LEN + 2 * u8::MAX as usize;

/// Reasons a connection is dropped without a response.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no complete request within {0:?}")]
    Timeout(Duration),
    #[error("connection closed with {needed} bytes of the request missing")]
    Truncated { needed: usize },
    #[error("malformed request: {0}")]
    Malformed(#[source] CodecError),
}

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = create_listener(config.listen, config.backlog)?;
        let listener = TcpListener::from_std(listener)?;

        Ok(Server {
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until SIGINT or SIGTERM.
    pub async fn run(self) -> io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes.
    ///
    /// In sequential mode a connection already being served is finished
    /// before shutdown is observed. In concurrent mode shutdown is observed
    /// even while every connection slot is taken.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            address = %self.local_addr()?,
            mode = ?self.config.mode,
            "Server running"
        );

        let read_timeout = self.config.read_timeout;
        tokio::pin!(shutdown);

        loop {
            // Concurrent mode takes a slot before accepting
            let permit = match self.config.mode {
                ConnectionMode::Sequential => None,
                ConnectionMode::Concurrent => {
                    let acquired = tokio::select! {
                        _ = &mut shutdown => {
                            info!("Shutting down server gracefully");
                            return Ok(());
                        }
                        acquired = self.connection_limit.clone().acquire_owned() => acquired,
                    };
                    match acquired {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            error!("Connection limit closed");
                            return Ok(());
                        }
                    }
                }
            };

            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server gracefully");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            info!(peer = %peer, "Client connected");

            match permit {
                None => serve(stream, peer, read_timeout).await,
                Some(permit) => {
                    tokio::spawn(async move {
                        serve(stream, peer, read_timeout).await;
                        drop(permit);
                    });
                }
            }
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Serve one connection and close it.
async fn serve(mut stream: TcpStream, peer: SocketAddr, read_timeout: Duration) {
    match handle_connection(&mut stream, read_timeout).await {
        Ok(_) => {
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %peer, error = %e, "Shutdown error");
            }
        }
        Err(e @ ConnectionError::Io(_)) => debug!(peer = %peer, error = %e, "Connection error"),
        Err(e) => warn!(peer = %peer, error = %e, "Aborting connection"),
    }
}

/// Read one request, dispatch it and write the response.
///
/// Nothing is written unless a complete request was decoded.
pub async fn handle_connection<S>(
    stream: &mut S,
    read_timeout: Duration,
) -> Result<Response, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = tokio::time::timeout(read_timeout, read_request(stream))
        .await
        .map_err(|_| ConnectionError::Timeout(read_timeout))??;

    info!(
        request_id = request.request_id,
        operation = %request.op_name,
        op_code = request.op_code,
        operand_one = request.operand_one,
        operand_two = request.operand_two,
        "Request received"
    );

    let response = dispatch::process(&request);
    stream.write_all(&response.encode()).await?;
    stream.flush().await?;

    info!(
        request_id = response.request_id,
        result = response.result,
        error_code = if response.is_ok() { "OK" } else { "Error" },
        "Response sent"
    );

    Ok(response)
}

/// Read until one request decodes.
async fn read_request<S>(stream: &mut S) -> Result<Request, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(MAX_REQUEST_LEN);

    loop {
        match Request::decode(&buffer) {
            Ok((request, _)) => return Ok(request),
            Err(CodecError::Incomplete { needed }) => {
                buffer.reserve(needed);
                let n = stream.read_buf(&mut buffer).await?;
                if n == 0 {
                    return Err(ConnectionError::Truncated { needed });
                }
            }
            Err(e) => return Err(ConnectionError::Malformed(e)),
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_handle_connection_add() {
        let request = Request::new(0, 5, 3, 42, "Add").unwrap();
        let mut stream = Builder::new()
            .read(&request.encode())
            .write(&[8, 0, 0, 0, 8, 0, 0, 42])
            .build();

        let response = handle_connection(&mut stream, TIMEOUT).await.unwrap();
        assert_eq!(response, Response::ok(8, 42));
    }

    #[tokio::test]
    async fn test_handle_connection_split_reads() {
        let bytes = Request::new(5, -3, 4, 7, "multiplication").unwrap().encode();
        let mut stream = Builder::new()
            .read(&bytes[..4])
            .read(&bytes[4..14])
            .read(&bytes[14..])
            .write(&Response::ok(-12, 7).encode())
            .build();

        let response = handle_connection(&mut stream, TIMEOUT).await.unwrap();
        assert_eq!(response.result, -12);
    }

    #[tokio::test]
    async fn test_handle_connection_protocol_error_still_responds() {
        let request = Request::new(4, 10, 0, 1, "Div").unwrap();
        let mut stream = Builder::new()
            .read(&request.encode())
            .write(&[8, 0, 0, 0, 0, 127, 0, 1])
            .build();

        let response = handle_connection(&mut stream, TIMEOUT).await.unwrap();
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn test_truncated_request_gets_no_response() {
        let bytes = Request::new(0, 1, 2, 3, "Add").unwrap().encode();
        let mut stream = Builder::new().read(&bytes[..15]).build();

        let err = handle_connection(&mut stream, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Truncated { needed: 4 }));
    }

    #[tokio::test]
    async fn test_empty_connection() {
        let mut stream = Builder::new().build();

        let err = handle_connection(&mut stream, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Truncated { needed: 13 }));
    }

    #[tokio::test]
    async fn test_invalid_utf16_gets_no_response() {
        let mut bytes = Request::new(0, 1, 2, 3, "A").unwrap().encode();
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&[0xDC, 0x00]);
        let mut stream = Builder::new().read(&bytes).build();

        let err = handle_connection(&mut stream, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Malformed(CodecError::InvalidOpName)
        ));
    }

    #[tokio::test]
    async fn test_stalled_client_times_out() {
        let (mut server_side, _client_side) = tokio::io::duplex(64);

        let err = handle_connection(&mut server_side, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout(_)));
    }

    #[test]
    fn test_max_request_len() {
        assert_eq!(MAX_REQUEST_LEN, 523);
    }
}
