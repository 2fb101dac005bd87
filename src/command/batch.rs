//! Staging buffer for compound commands.

/// Separator between sub-commands on one physical line.
pub const FRAGMENT_SEPARATOR: &str = ";";

/// Ordered fragments waiting for the next flush.
///
/// `expects_reply` is the OR of every fragment's wait request since the last clear:
/// once one fragment asks for a reply, the whole line does. An empty batch reports
/// `true`, and the first fragment put into it replaces that default with its own
/// request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    items: Vec<String>,
    expects_reply: bool,
}

impl CommandBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            expects_reply: true,
        }
    }

    /// Append a fragment and fold its wait request into `expects_reply`.
    pub fn put(&mut self, fragment: impl Into<String>, wants_reply: bool) {
        if self.items.is_empty() {
            self.expects_reply = wants_reply;
        } else {
            self.expects_reply |= wants_reply;
        }
        self.items.push(fragment.into());
    }

    /// The compound command text. Does not modify the batch.
    pub fn flush_text(&self) -> String {
        self.items.join(FRAGMENT_SEPARATOR)
    }

    /// Whether the flushed line will produce a reply.
    pub fn expects_reply(&self) -> bool {
        self.expects_reply
    }

    /// Staged fragments in call order.
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Number of staged fragments.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reset to `{empty, expects_reply = true}`.
    pub fn clear(&mut self) {
        self.items.clear();
        self.expects_reply = true;
    }
}

impl Default for CommandBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expects_reply_is_or_of_requests() {
        let cases: &[&[bool]] = &[
            &[false],
            &[true],
            &[false, false, false],
            &[false, true, false],
            &[true, false],
            &[false, false, true],
        ];
        for requests in cases {
            let mut batch = CommandBatch::new();
            for (i, wants) in requests.iter().enumerate() {
                batch.put(format!("CMD{i}"), *wants);
            }
            let expected = requests.iter().any(|w| *w);
            assert_eq!(batch.expects_reply(), expected, "requests: {requests:?}");
        }
    }

    #[test]
    fn test_later_no_wait_cannot_lower_flag() {
        let mut batch = CommandBatch::new();
        batch.put(":READ?", true);
        batch.put(":IO:OUTPut 3", false);
        assert!(batch.expects_reply());
    }

    #[test]
    fn test_flush_text_joins_without_mutating() {
        let mut batch = CommandBatch::new();
        batch.put("*WAI", false);
        batch.put("*RST", false);
        batch.put("*WAI", false);

        let before = batch.clone();
        assert_eq!(batch.flush_text(), "*WAI;*RST;*WAI");
        assert_eq!(batch.flush_text(), "*WAI;*RST;*WAI");
        assert_eq!(batch, before);
    }

    #[test]
    fn test_clear_restores_default() {
        let mut batch = CommandBatch::new();
        batch.put(":ABORt", false);
        batch.clear();
        assert!(batch.is_empty());
        assert!(batch.expects_reply());
        assert_eq!(batch.flush_text(), "");
    }
}
