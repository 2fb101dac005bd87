//! Mock transport for testing
//!
//! Replays a queue of canned replies and records every command written, so sessions
//! and scripts can be exercised without an instrument on the network. It provides:
//! - Scripted replies, including timeouts
//! - Failure injection on send
//! - A shared log of sent commands for test verification

use super::Transport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One scripted reaction to a `receive` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Reply with this line
    Line(String),
    /// Behave as if no terminator arrived in time
    Timeout,
}

/// In-memory [`Transport`] with scripted replies.
///
/// # Example
///
/// ```
/// use hioki_daq::transport::{MockTransport, Transport};
///
/// # tokio_test::block_on(async {
/// let mut transport = MockTransport::new().with_reply("HIOKI,DM7275,0,1.00");
/// let sent = transport.sent_log();
/// let reply = transport.send_and_receive("*IDN?", true).await.unwrap();
/// assert_eq!(reply.as_deref(), Some("HIOKI,DM7275,0,1.00"));
/// assert_eq!(sent.lock().unwrap().as_slice(), ["*IDN?"]);
/// # })
/// ```
pub struct MockTransport {
    connected: bool,
    timeout: Duration,
    replies: VecDeque<MockReply>,
    failing_sends: usize,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    /// Create a connected mock with no replies queued.
    pub fn new() -> Self {
        Self {
            connected: true,
            timeout: Duration::from_millis(50),
            replies: VecDeque::new(),
            failing_sends: 0,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a reply line.
    pub fn with_reply(mut self, line: impl Into<String>) -> Self {
        self.replies.push_back(MockReply::Line(line.into()));
        self
    }

    /// Queue several reply lines in order.
    pub fn with_replies<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies
            .extend(lines.into_iter().map(|l| MockReply::Line(l.into())));
        self
    }

    /// Queue a receive that times out.
    pub fn with_timeout_reply(mut self) -> Self {
        self.replies.push_back(MockReply::Timeout);
        self
    }

    /// Make the next `count` sends fail with [`DaqError::LinkLost`].
    pub fn with_failing_sends(mut self, count: usize) -> Self {
        self.failing_sends = count;
        self
    }

    /// Shared handle on the list of commands written so far.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    /// Number of replies not yet consumed.
    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: &str) -> AppResult<()> {
        if !self.connected {
            return Err(DaqError::NotConnected);
        }
        if self.failing_sends > 0 {
            self.failing_sends -= 1;
            return Err(DaqError::LinkLost("mock send failure".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> AppResult<String> {
        if !self.connected {
            return Err(DaqError::NotConnected);
        }
        match self.replies.pop_front() {
            Some(MockReply::Line(line)) => Ok(line),
            Some(MockReply::Timeout) | None => Err(DaqError::ResponseTimeout(timeout)),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> AppResult<()> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order() {
        let mut transport = MockTransport::new().with_replies(["1", "2"]);
        assert_eq!(transport.receive(Duration::ZERO).await.unwrap(), "1");
        assert_eq!(transport.receive(Duration::ZERO).await.unwrap(), "2");
        assert!(transport
            .receive(Duration::ZERO)
            .await
            .unwrap_err()
            .is_response_timeout());
    }

    #[tokio::test]
    async fn test_send_without_wait_skips_reply() {
        let mut transport = MockTransport::new().with_reply("unused");
        let reply = transport.send_and_receive(":ABORt", false).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(transport.remaining_replies(), 1);
    }

    #[tokio::test]
    async fn test_closed_mock_rejects_io() {
        let mut transport = MockTransport::new();
        transport.close().await.unwrap();
        assert!(matches!(transport.send("*RST").await, Err(DaqError::NotConnected)));
    }
}
