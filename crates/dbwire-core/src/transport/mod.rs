//! Byte-stream transport.
//!
//! A [`Transport`] moves opaque bytes; it never looks inside them. Protocol
//! drivers own one transport each and pull bytes on demand with
//! [`Transport::receive`], framing them themselves.

mod tcp;
mod tls;

#[cfg(any(test, feature = "test-util"))]
mod scripted;

use std::time::Duration;

use crate::config::TlsOptions;
use crate::error::Result;

pub use tcp::TcpTransport;

#[cfg(any(test, feature = "test-util"))]
pub use scripted::{ScriptedTransport, SentLog};

/// A bidirectional byte stream to one server.
///
/// Every method takes `&mut self`, so at most one `receive` can be
/// outstanding per transport.
pub trait Transport: Send {
    /// Open the connection, optionally wrapping it in TLS from the first byte.
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        tls: Option<&TlsOptions>,
        timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next bytes from the peer, in arrival order.
    ///
    /// Returns whatever is available, never an empty chunk. End of stream is
    /// a `Disconnected` "connection closed" error.
    fn receive(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Upgrade an established plaintext connection to TLS in place.
    fn upgrade_tls(
        &mut self,
        server_name: &str,
        options: &TlsOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Close the connection. Idempotent.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Whether the current session is encrypted.
    fn is_secure(&self) -> bool;
}

/// Creates transports and remembers whether TLS can be offered.
///
/// Construct one at process start and pass it by reference; the TLS probe
/// runs once in [`TransportFactory::init`].
#[derive(Debug, Clone)]
pub struct TransportFactory {
    tls_support: std::result::Result<(), String>,
}

impl TransportFactory {
    pub fn init() -> Self {
        let tls_support = tls::probe();
        match &tls_support {
            Ok(()) => tracing::debug!("TLS support available"),
            Err(reason) => tracing::debug!(reason = %reason, "TLS support unavailable"),
        }
        Self { tls_support }
    }

    pub fn tls_available(&self) -> bool {
        self.tls_support.is_ok()
    }

    /// The cached reason TLS is unavailable, if it is.
    pub fn tls_error(&self) -> Option<&str> {
        self.tls_support.as_ref().err().map(String::as_str)
    }

    pub fn create(&self) -> TcpTransport {
        TcpTransport::with_tls_support(self.tls_support.clone())
    }
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::init()
    }
}
