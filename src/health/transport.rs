//! Health-check transports.
//!
//! A transport issues a single probe against one backend. The checker wraps
//! every probe in its own timeout, so a transport may block as long as it
//! likes without holding up other backends.

use crate::backend::BackendId;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Why a probe failed. Always absorbed into health state.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("empty response")]
    EmptyResponse,

    #[error("invalid HTTP response")]
    InvalidResponse,

    #[error("unexpected status: {actual} (expected {expected})")]
    UnexpectedStatus { actual: u16, expected: u16 },

    #[error("{0}")]
    Other(String),
}

/// Issues health probes.
#[async_trait]
pub trait HealthTransport: Send + Sync {
    /// Probe `backend`, giving up after `timeout`.
    async fn probe(&self, backend: &BackendId, timeout: Duration) -> Result<(), ProbeError>;
}

/// Probe that only checks a TCP connection can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl HealthTransport for TcpTransport {
    async fn probe(&self, backend: &BackendId, check_timeout: Duration) -> Result<(), ProbeError> {
        connect(backend, check_timeout).await.map(|_stream| ())
    }
}

/// Probe that sends `GET path` and expects a given status code.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    path: String,
    expected_status: u16,
}

impl HttpTransport {
    /// Create an HTTP probe.
    pub fn new(path: impl Into<String>, expected_status: u16) -> Self {
        Self {
            path: path.into(),
            expected_status,
        }
    }
}

#[async_trait]
impl HealthTransport for HttpTransport {
    async fn probe(&self, backend: &BackendId, check_timeout: Duration) -> Result<(), ProbeError> {
        let mut stream = connect(backend, check_timeout).await?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: poolbalancer-health-check\r\nConnection: close\r\n\r\n",
            self.path, backend
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(ProbeError::Write)?;

        // Read response (just the status line)
        let mut buf = vec![0u8; 1024];
        let n = match timeout(check_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => n,
            Ok(Ok(_)) => return Err(ProbeError::EmptyResponse),
            Ok(Err(e)) => return Err(ProbeError::Read(e)),
            Err(_) => return Err(ProbeError::Timeout(check_timeout)),
        };

        let response = String::from_utf8_lossy(&buf[..n]);
        let status = parse_http_status(&response)?;

        if status == self.expected_status {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedStatus {
                actual: status,
                expected: self.expected_status,
            })
        }
    }
}

async fn connect(backend: &BackendId, check_timeout: Duration) -> Result<TcpStream, ProbeError> {
    // Name resolution happens here too, so DNS failures surface as Connect
    match timeout(check_timeout, TcpStream::connect(backend.as_str())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProbeError::Connect(e)),
        Err(_) => Err(ProbeError::Timeout(check_timeout)),
    }
}

/// Parse HTTP status code from response.
fn parse_http_status(response: &str) -> Result<u16, ProbeError> {
    // Format: "HTTP/1.1 200 OK\r\n..."
    let mut parts = response.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            code.parse().map_err(|_| ProbeError::InvalidResponse)
        }
        _ => Err(ProbeError::InvalidResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_http_status() {
        assert_eq!(parse_http_status("HTTP/1.1 200 OK\r\n").unwrap(), 200);
        assert_eq!(parse_http_status("HTTP/1.0 404 Not Found\r\n").unwrap(), 404);
        assert_eq!(
            parse_http_status("HTTP/1.1 503 Service Unavailable").unwrap(),
            503
        );
    }

    #[test]
    fn test_parse_http_status_invalid() {
        assert!(parse_http_status("invalid").is_err());
        assert!(parse_http_status("").is_err());
        assert!(parse_http_status("HTTP/1.1 abc").is_err());
    }

    async fn http_server(status_line: &'static str) -> BackendId {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!("{}\r\nContent-Length: 0\r\n\r\n", status_line);
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        BackendId::from(addr)
    }

    #[tokio::test]
    async fn test_tcp_probe_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let result = TcpTransport
            .probe(&BackendId::from(addr), Duration::from_secs(5))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = TcpTransport
            .probe(&BackendId::from(addr), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ProbeError::Connect(_))));
    }

    #[tokio::test]
    async fn test_tcp_probe_unresolvable_host() {
        let result = TcpTransport
            .probe(&BackendId::from("no-such-host.invalid:80"), Duration::from_secs(2))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_probe_success() {
        let backend = http_server("HTTP/1.1 200 OK").await;
        let transport = HttpTransport::new("/healthz", 200);
        assert!(transport.probe(&backend, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_unexpected_status() {
        let backend = http_server("HTTP/1.1 503 Service Unavailable").await;
        let transport = HttpTransport::new("/healthz", 200);
        let result = transport.probe(&backend, Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(ProbeError::UnexpectedStatus {
                actual: 503,
                expected: 200
            })
        ));
    }
}
