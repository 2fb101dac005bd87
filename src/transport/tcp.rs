//! TCP transport for LAN-attached instruments.
//!
//! The instrument exposes a raw socket (telnet port 23 by default). Nagle's algorithm
//! is disabled on connect so that short commands leave the host immediately instead
//! of being coalesced.

use super::{Transport, COMMAND_TERMINATOR, MAX_RESPONSE_BYTES, READ_CHUNK_BYTES};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Socket connection to one instrument.
///
/// Bytes received after a line terminator are kept for the next
/// [`Transport::receive`] call, so replies that arrive back to back are never lost.
/// A line cut short by a timeout or by the size ceiling is skipped up to its
/// terminator when it finally arrives.
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    pending: BytesMut,
    skip_partial: bool,
}

impl TcpTransport {
    /// Open a connection, failing with [`DaqError::ConnectFailure`] on resolution
    /// failure, refusal, or when `timeout` elapses first.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> AppResult<Self> {
        let connect_failure = |reason: String| DaqError::ConnectFailure {
            host: host.to_string(),
            port,
            reason,
        };

        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_failure(e.to_string())),
            Err(_) => return Err(connect_failure(format!("timed out after {timeout:?}"))),
        };
        stream
            .set_nodelay(true)
            .map_err(|e| connect_failure(format!("cannot disable send coalescing: {e}")))?;

        info!(host, port, "Connected to instrument");
        Ok(Self {
            host: host.to_string(),
            port,
            timeout,
            stream: Some(stream),
            pending: BytesMut::with_capacity(READ_CHUNK_BYTES),
            skip_partial: false,
        })
    }

    /// Remote host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Change the read budget used by [`Transport::send_and_receive`].
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Drop the tail of an abandoned line, through its terminator once it is buffered.
    fn skip_abandoned_tail(&mut self) {
        if !self.skip_partial {
            return;
        }
        match self.pending.iter().position(|&b| b == b'\n') {
            Some(lf) => {
                let _ = self.pending.split_to(lf + 1);
                self.skip_partial = false;
                trace!(bytes = lf + 1, "Skipped tail of abandoned line");
            }
            None => self.pending.clear(),
        }
    }

    /// Split the first complete line off the pending buffer, CR bytes removed.
    fn take_line(&mut self) -> AppResult<Option<String>> {
        let Some(lf) = self.pending.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let frame = self.pending.split_to(lf + 1);
        let line: Vec<u8> = frame[..lf].iter().copied().filter(|&b| b != b'\r').collect();
        Ok(Some(String::from_utf8(line)?))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, text: &str) -> AppResult<()> {
        let stream = self.stream.as_mut().ok_or(DaqError::NotConnected)?;

        let mut line = String::with_capacity(text.len() + COMMAND_TERMINATOR.len());
        line.push_str(text);
        line.push_str(COMMAND_TERMINATOR);

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DaqError::LinkLost(e.to_string()))?;
        debug!(command = text, "Sent command");
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> AppResult<String> {
        if self.stream.is_none() {
            return Err(DaqError::NotConnected);
        }

        // Budget runs from the call start, not from the last chunk.
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK_BYTES];

        loop {
            self.skip_abandoned_tail();
            if let Some(line) = self.take_line()? {
                debug!(response = %line, "Received response");
                return Ok(line);
            }
            if self.pending.len() > MAX_RESPONSE_BYTES {
                self.pending.clear();
                self.skip_partial = true;
                return Err(DaqError::ResponseTooLarge {
                    limit: MAX_RESPONSE_BYTES,
                });
            }

            let stream = self.stream.as_mut().ok_or(DaqError::NotConnected)?;
            match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                Err(_) => {
                    if !self.pending.is_empty() {
                        trace!(
                            bytes = self.pending.len(),
                            "Discarding partial line after timeout"
                        );
                        self.pending.clear();
                        self.skip_partial = true;
                    }
                    return Err(DaqError::ResponseTimeout(timeout));
                }
                Ok(Ok(0)) => {
                    return Err(DaqError::LinkLost("peer closed the connection".into()));
                }
                Ok(Ok(n)) => self.pending.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(DaqError::LinkLost(e.to_string())),
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; closing is best effort.
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Socket shutdown reported an error");
            }
            self.pending.clear();
            self.skip_partial = false;
            info!(host = %self.host, port = self.port, "Connection closed");
        }
        Ok(())
    }
}
