//! Command descriptors.
//!
//! A descriptor pairs a command stub with what may be done with it. Calling a
//! descriptor only stages a fragment into the batch it is given and returns the
//! fragment text for logging; nothing reaches the device until the session flushes.
//!
//! | Descriptor | `get`            | `set`          | `issue`        |
//! |------------|------------------|----------------|----------------|
//! | [`Query`]  | `stub?[ arg]`, waits | -          | -              |
//! | [`Control`]| `stub?[ arg]`, waits | `stub value`, no wait | -   |
//! | [`Setting`]| -                | -              | `stub`, no wait |

use super::batch::CommandBatch;
use std::fmt;

fn query_fragment(stub: &str, arg: Option<&str>) -> String {
    match arg {
        Some(arg) => format!("{stub}? {arg}"),
        None => format!("{stub}?"),
    }
}

/// Read-only command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    stub: &'static str,
}

impl Query {
    /// Describe a query on `stub`.
    pub const fn new(stub: &'static str) -> Self {
        Self { stub }
    }

    /// Command stub without the `?`.
    pub const fn stub(&self) -> &'static str {
        self.stub
    }

    /// Stage `stub?`.
    pub fn get(&self, batch: &mut CommandBatch) -> String {
        self.stage(batch, None)
    }

    /// Stage `stub? arg`.
    pub fn get_with(&self, batch: &mut CommandBatch, arg: &str) -> String {
        self.stage(batch, Some(arg))
    }

    fn stage(&self, batch: &mut CommandBatch, arg: Option<&str>) -> String {
        let fragment = query_fragment(self.stub, arg);
        batch.put(fragment.clone(), true);
        fragment
    }
}

/// Command that can be both queried and set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    query: Query,
}

impl Control {
    /// Describe a query/set pair on `stub`.
    pub const fn new(stub: &'static str) -> Self {
        Self {
            query: Query::new(stub),
        }
    }

    /// Command stub.
    pub const fn stub(&self) -> &'static str {
        self.query.stub()
    }

    /// The read half of this control.
    pub const fn as_query(&self) -> Query {
        self.query
    }

    /// Stage `stub?`.
    pub fn get(&self, batch: &mut CommandBatch) -> String {
        self.query.get(batch)
    }

    /// Stage `stub? arg`.
    pub fn get_with(&self, batch: &mut CommandBatch, arg: &str) -> String {
        self.query.get_with(batch, arg)
    }

    /// Stage `stub value`. Settings produce no reply.
    pub fn set(&self, batch: &mut CommandBatch, value: impl fmt::Display) -> String {
        let fragment = format!("{} {value}", self.stub());
        batch.put(fragment.clone(), false);
        fragment
    }
}

/// Bare command sent as its stub alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    stub: &'static str,
}

impl Setting {
    /// Describe a bare setting on `stub`.
    pub const fn new(stub: &'static str) -> Self {
        Self { stub }
    }

    /// Command stub.
    pub const fn stub(&self) -> &'static str {
        self.stub
    }

    /// Stage `stub`.
    pub fn issue(&self, batch: &mut CommandBatch) -> String {
        batch.put(self.stub, false);
        self.stub.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_fragments() {
        let mut batch = CommandBatch::new();
        let read = Query::new(":READ");
        assert_eq!(read.get(&mut batch), ":READ?");
        assert_eq!(read.get_with(&mut batch, "TEMP"), ":READ? TEMP");
        assert_eq!(batch.flush_text(), ":READ?;:READ? TEMP");
        assert!(batch.expects_reply());
    }

    #[test]
    fn test_control_set_does_not_wait() {
        let mut batch = CommandBatch::new();
        let range = Control::new(":SENSe:VOLTage:DC:RANGe");
        assert_eq!(range.set(&mut batch, "10"), ":SENSe:VOLTage:DC:RANGe 10");
        assert!(!batch.expects_reply());

        range.get(&mut batch);
        assert!(batch.expects_reply());
    }

    #[test]
    fn test_setting_is_bare_stub() {
        let mut batch = CommandBatch::new();
        assert_eq!(Setting::new("*RST").issue(&mut batch), "*RST");
        assert_eq!(batch.items(), ["*RST"]);
        assert!(!batch.expects_reply());
    }
}
