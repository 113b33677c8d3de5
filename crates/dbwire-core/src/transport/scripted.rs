//! In-memory transport that replays scripted server bytes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Transport;
use crate::config::TlsOptions;
use crate::error::{Error, Result};

/// Shared record of everything a [`ScriptedTransport`] was asked to send.
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    messages: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    /// Each `send` call as a separate message.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.messages.lock().clone()
    }

    /// All sent bytes concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.messages.lock().concat()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    fn push(&self, bytes: &[u8]) {
        self.messages.lock().push(bytes.to_vec());
    }
}

/// A [`Transport`] that answers `receive` from a queue of scripted bytes.
///
/// Replies are served in order regardless of what was sent. With a chunk
/// size set, every reply is delivered in pieces of at most that many bytes,
/// which exercises the drivers' frame reassembly. When the script runs out
/// `receive` fails with "connection closed".
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    inbound: VecDeque<Vec<u8>>,
    chunk_size: Option<usize>,
    sent: SentLog,
    connected: bool,
    secure: bool,
    tls_supported: bool,
    upgrades: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            tls_supported: true,
            ..Self::default()
        }
    }

    /// Queue bytes the "server" will send.
    pub fn reply(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.inbound.push_back(bytes.into());
        self
    }

    /// Deliver inbound bytes in chunks of at most `size` bytes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Start out (or not) on an encrypted session.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Make TLS requests fail with "TLS unsupported".
    pub fn without_tls(mut self) -> Self {
        self.tls_supported = false;
        self
    }

    /// Handle to the log of sent messages; stays valid after the transport moves.
    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }

    /// Server names passed to `upgrade_tls`, shared like [`SentLog`].
    pub fn upgrades(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.upgrades)
    }

    fn check_tls(&self) -> Result<()> {
        if self.tls_supported {
            Ok(())
        } else {
            Err(super::tls::unsupported("scripted transport has TLS disabled"))
        }
    }
}

impl Transport for ScriptedTransport {
    async fn connect(
        &mut self,
        _host: &str,
        _port: u16,
        tls: Option<&TlsOptions>,
        _timeout: Duration,
    ) -> Result<()> {
        if tls.is_some() {
            self.check_tls()?;
            self.secure = true;
        }
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::not_connected());
        }
        self.sent.push(bytes);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(Error::not_connected());
        }
        loop {
            let Some(mut next) = self.inbound.pop_front() else {
                self.connected = false;
                return Err(Error::closed());
            };
            if next.is_empty() {
                continue;
            }
            if let Some(size) = self.chunk_size {
                if next.len() > size {
                    let rest = next.split_off(size);
                    self.inbound.push_front(rest);
                }
            }
            return Ok(next);
        }
    }

    async fn upgrade_tls(&mut self, server_name: &str, _options: &TlsOptions) -> Result<()> {
        self.check_tls()?;
        if !self.connected {
            return Err(Error::not_connected());
        }
        self.upgrades.lock().push(server_name.to_string());
        self.secure = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        self.secure = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}
