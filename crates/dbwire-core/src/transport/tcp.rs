//! TCP transport with optional rustls encryption.

#[cfg(feature = "tls")]
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::Instant;

use super::{Transport, tls};
use crate::config::TlsOptions;
use crate::error::{ConnectionError, ConnectionErrorKind, Error, Result};

const READ_CHUNK: usize = 16 * 1024;
const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf).await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(bytes).await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => {
                s.write_all(bytes).await?;
                s.flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.shutdown().await,
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.shutdown().await,
        }
    }

    fn is_secure(&self) -> bool {
        match self {
            Stream::Plain(_) => false,
            #[cfg(feature = "tls")]
            Stream::Tls(_) => true,
        }
    }
}

/// A [`Transport`] over a tokio `TcpStream`.
pub struct TcpTransport {
    stream: Option<Stream>,
    read_buf: Vec<u8>,
    tls_support: std::result::Result<(), String>,
    /// Bound on a later `upgrade_tls`; follows the last connect timeout.
    handshake_timeout: Duration,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connected", &self.is_connected())
            .field("secure", &self.is_secure())
            .finish_non_exhaustive()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    /// Create a transport, probing TLS support on the spot.
    ///
    /// Prefer [`super::TransportFactory::create`], which probes once.
    pub fn new() -> Self {
        Self::with_tls_support(tls::probe())
    }

    pub(crate) fn with_tls_support(tls_support: std::result::Result<(), String>) -> Self {
        Self {
            stream: None,
            read_buf: vec![0; READ_CHUNK],
            tls_support,
            handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
        }
    }

    fn check_tls_support(&self) -> Result<()> {
        self.tls_support
            .as_ref()
            .map(|_| ())
            .map_err(|reason| tls::unsupported(reason))
    }

    fn io_failure(&mut self, action: &str, err: std::io::Error) -> Error {
        self.stream = None;
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("{action} failed: {err}"),
            source: Some(Box::new(err)),
        })
    }
}

fn timed_out(host: &str, port: u16, timeout: Duration) -> Error {
    Error::connection(
        ConnectionErrorKind::Timeout,
        format!(
            "connect to {host}:{port} timed out after {}ms",
            timeout.as_millis()
        ),
    )
}

async fn open_tcp(host: &str, port: u16, deadline: Instant, timeout: Duration) -> Result<TcpStream> {
    let timed_out = || timed_out(host, port, timeout);

    let addrs: Vec<_> = tokio::time::timeout_at(deadline, lookup_host((host, port)))
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::DnsResolution,
                message: format!("failed to resolve '{host}': {e}"),
                source: Some(Box::new(e)),
            })
        })?
        .collect();

    if addrs.is_empty() {
        return Err(Error::connection(
            ConnectionErrorKind::DnsResolution,
            format!("'{host}' resolved to no addresses"),
        ));
    }

    let mut last_err = None;
    for addr in addrs {
        match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Err(_) => return Err(timed_out()),
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                tracing::trace!(%addr, "TCP connected");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::trace!(%addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    let err = last_err.unwrap_or_else(|| std::io::Error::other("no address attempted"));
    let kind = if err.kind() == std::io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Err(Error::Connection(ConnectionError {
        kind,
        message: format!("failed to connect to {host}:{port}: {err}"),
        source: Some(Box::new(err)),
    }))
}

#[cfg(feature = "tls")]
async fn wrap_tls(tcp: TcpStream, host: &str, options: &TlsOptions) -> Result<Stream> {
    let config = tls::build_client_config(options)?;
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let name = tls::server_name(host)?;
    let stream = connector.connect(name, tcp).await.map_err(|e| {
        Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Ssl,
            message: format!("TLS handshake with '{host}' failed: {e}"),
            source: Some(Box::new(e)),
        })
    })?;
    tracing::debug!(host, "TLS session established");
    Ok(Stream::Tls(Box::new(stream)))
}

#[cfg(not(feature = "tls"))]
async fn wrap_tls(_tcp: TcpStream, _host: &str, _options: &TlsOptions) -> Result<Stream> {
    Err(tls::unsupported(
        "this build was compiled without the `tls` feature",
    ))
}

impl Transport for TcpTransport {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        tls: Option<&TlsOptions>,
        timeout: Duration,
    ) -> Result<()> {
        if tls.is_some() {
            self.check_tls_support()?;
        }
        if let Some(mut old) = self.stream.take() {
            let _ = old.shutdown().await;
        }

        self.handshake_timeout = timeout;
        let deadline = Instant::now() + timeout;
        let tcp = open_tcp(host, port, deadline, timeout).await?;
        self.stream = Some(match tls {
            // Dropping the handshake on expiry closes the socket.
            Some(options) => tokio::time::timeout_at(deadline, wrap_tls(tcp, host, options))
                .await
                .map_err(|_| timed_out(host, port, timeout))??,
            None => Stream::Plain(tcp),
        });
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(Error::not_connected)?;
        match stream.write_all(bytes).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.io_failure("write", e)),
        }
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(Error::not_connected)?;
        match stream.read(&mut self.read_buf).await {
            Ok(0) => {
                self.stream = None;
                Err(Error::closed())
            }
            Ok(n) => Ok(self.read_buf[..n].to_vec()),
            Err(e) => Err(self.io_failure("read", e)),
        }
    }

    async fn upgrade_tls(&mut self, server_name: &str, options: &TlsOptions) -> Result<()> {
        self.check_tls_support()?;
        match self.stream.take() {
            Some(Stream::Plain(tcp)) => {
                let timeout = self.handshake_timeout;
                let stream = tokio::time::timeout(timeout, wrap_tls(tcp, server_name, options))
                    .await
                    .map_err(|_| {
                        Error::connection(
                            ConnectionErrorKind::Timeout,
                            format!(
                                "TLS handshake with '{server_name}' timed out after {}ms",
                                timeout.as_millis()
                            ),
                        )
                    })??;
                self.stream = Some(stream);
                Ok(())
            }
            Some(other) => {
                self.stream = Some(other);
                Err(Error::connection(
                    ConnectionErrorKind::Ssl,
                    "connection is already encrypted",
                ))
            }
            None => Err(Error::not_connected()),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::trace!(error = %e, "shutdown after disconnect failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn is_secure(&self) -> bool {
        self.stream.as_ref().is_some_and(Stream::is_secure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_receive_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(b"pong").await.unwrap();
        });

        let mut transport = TcpTransport::new();
        transport
            .connect("127.0.0.1", port, None, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(transport.is_connected());
        assert!(!transport.is_secure());

        transport.send(b"ping").await.unwrap();
        let mut received = Vec::new();
        while received.len() < 4 {
            received.extend(transport.receive().await.unwrap());
        }
        assert_eq!(received, b"pong");

        server.await.unwrap();
        let err = transport.receive().await.unwrap_err();
        assert_eq!(
            err.connection_kind(),
            Some(ConnectionErrorKind::Disconnected)
        );
        assert!(err.to_string().contains("connection closed"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new();
        let err = transport
            .connect("127.0.0.1", port, None, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Refused));
    }

    #[tokio::test]
    async fn test_tls_unsupported_is_explicit() {
        let mut transport =
            TcpTransport::with_tls_support(Err("no TLS provider".to_string()));
        let err = transport
            .connect(
                "127.0.0.1",
                1,
                Some(&TlsOptions::default()),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.connection_kind(),
            Some(ConnectionErrorKind::TlsUnsupported)
        );
        assert!(!transport.is_connected());
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn test_silent_peer_times_out_during_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let mut transport = TcpTransport::new();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            transport.connect(
                "localhost",
                port,
                Some(&TlsOptions::default()),
                Duration::from_millis(200),
            ),
        )
        .await
        .expect("connect ignored its timeout");
        let err = outcome.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Timeout));
        assert!(!transport.is_connected());
        server.abort();
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn test_silent_peer_times_out_during_tls_upgrade() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(sock);
        });

        let mut transport = TcpTransport::new();
        transport
            .connect("127.0.0.1", port, None, Duration::from_millis(200))
            .await
            .unwrap();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            transport.upgrade_tls("localhost", &TlsOptions::default()),
        )
        .await
        .expect("upgrade ignored its timeout");
        let err = outcome.unwrap_err();
        assert_eq!(err.connection_kind(), Some(ConnectionErrorKind::Timeout));
        assert!(!transport.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut transport = TcpTransport::new();
        assert!(transport.send(b"x").await.is_err());
        assert!(transport.receive().await.is_err());
        transport.disconnect().await.unwrap();
    }
}
