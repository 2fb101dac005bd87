//! Line-framed transport to the instrument.
//!
//! The wire protocol is plain text: commands are terminated with CRLF, responses with
//! LF (a preceding CR is optional and stripped). One physical line carries one
//! compound command, so a single round trip is one `send` followed by at most one
//! `receive`.
//!
//! [`Transport`] is the seam between the session and the byte stream:
//!
//! - [`TcpTransport`] talks to the instrument over a socket
//! - [`MockTransport`] replays canned replies for tests

pub mod mock;
pub mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;

/// Terminator appended to every outgoing command.
pub const COMMAND_TERMINATOR: &str = "\r\n";

/// Maximum number of bytes buffered while waiting for a line terminator.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Size of a single socket read.
pub const READ_CHUNK_BYTES: usize = 4096;

/// Default read budget for one response line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response access to a line-oriented instrument link.
#[async_trait]
pub trait Transport: Send {
    /// Write `text` followed by [`COMMAND_TERMINATOR`].
    async fn send(&mut self, text: &str) -> AppResult<()>;

    /// Read one complete response line, waiting at most `timeout` from the call start.
    ///
    /// After [`DaqError::ResponseTimeout`] or [`DaqError::ResponseTooLarge`] the rest of a
    /// partially received line is discarded when it arrives. A reply that arrives
    /// entirely after its timeout is returned by the next call, so callers that need
    /// strict request/reply pairing should reconnect after a timeout.
    ///
    /// [`DaqError::ResponseTimeout`]: crate::error::DaqError::ResponseTimeout
    /// [`DaqError::ResponseTooLarge`]: crate::error::DaqError::ResponseTooLarge
    async fn receive(&mut self, timeout: Duration) -> AppResult<String>;

    /// Read budget applied by [`Transport::send_and_receive`].
    fn timeout(&self) -> Duration;

    /// Whether the link is currently open.
    fn is_connected(&self) -> bool;

    /// Close the link. Closing twice is not an error.
    async fn close(&mut self) -> AppResult<()>;

    /// One round trip: send, then read a reply only when one is expected.
    async fn send_and_receive(
        &mut self,
        text: &str,
        wait_for_reply: bool,
    ) -> AppResult<Option<String>> {
        self.send(text).await?;
        if !wait_for_reply {
            return Ok(None);
        }
        let timeout = self.timeout();
        self.receive(timeout).await.map(Some)
    }
}
