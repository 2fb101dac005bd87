//! Digital output sequencing for unattended runs.
//!
//! The sequencer walks an ordered list of 11-bit output patterns, holding each one
//! for a fixed number of samples. A looping sequence wraps around forever; a
//! non-looping one completes after one pass and then stays completed, which the run
//! loop takes as "no further value".

use crate::command::values::{parse_pattern, validate_pattern};
use crate::config::IoSequenceSettings;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// One configured pattern, written as an integer or a `"0b..."`/decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternValue {
    /// Integer literal
    Number(i64),
    /// Decimal or binary literal text
    Text(String),
}

impl PatternValue {
    /// Validated output pattern.
    pub fn resolve(&self) -> AppResult<u16> {
        match self {
            PatternValue::Number(n) => validate_pattern(*n),
            PatternValue::Text(text) => parse_pattern(text),
        }
    }
}

/// Declarative source of a pattern list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceSpec {
    /// `start` to `stop` inclusive, moving by `step`
    Range {
        /// First pattern
        start: i64,
        /// Last pattern (inclusive)
        stop: i64,
        /// Increment, negative to count down
        step: i64,
    },
    /// Explicit patterns in order
    List(Vec<PatternValue>),
}

impl SequenceSpec {
    /// Expand into validated patterns.
    pub fn patterns(&self) -> AppResult<Vec<u16>> {
        match self {
            SequenceSpec::Range { start, stop, step } => {
                if *step == 0 {
                    return Err(DaqError::Validation("sequence step must be non-zero".into()));
                }
                let mut patterns = Vec::new();
                let mut value = *start;
                while (*step > 0 && value <= *stop) || (*step < 0 && value >= *stop) {
                    patterns.push(validate_pattern(value)?);
                    value = match value.checked_add(*step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Ok(patterns)
            }
            SequenceSpec::List(values) => values.iter().map(PatternValue::resolve).collect(),
        }
    }
}

/// Where the sequencer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Nothing to output
    Disabled,
    /// Outputting the pattern at this index
    Active(usize),
    /// A non-looping pass has finished
    Completed,
}

/// What the caller should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep the current pattern
    Hold,
    /// Output this new pattern
    Advance(u16),
    /// No further value; stop changing the output
    Finished,
}

/// Pattern sequencer driven by observed samples.
#[derive(Debug, Clone)]
pub struct IoSequencer {
    patterns: Vec<u16>,
    samples_per_step: u32,
    looping: bool,
    samples_at_index: u32,
    state: SequenceState,
}

impl IoSequencer {
    /// Build from patterns already in range. Starts at index 0, or disabled when empty.
    pub fn new(patterns: Vec<u16>, samples_per_step: u32, looping: bool) -> AppResult<Self> {
        if samples_per_step == 0 {
            return Err(DaqError::Validation("samples_per_step must be at least 1".into()));
        }
        for pattern in &patterns {
            validate_pattern(i64::from(*pattern))?;
        }
        let state = if patterns.is_empty() {
            SequenceState::Disabled
        } else {
            SequenceState::Active(0)
        };
        Ok(Self {
            patterns,
            samples_per_step,
            looping,
            samples_at_index: 0,
            state,
        })
    }

    /// Build from a [`SequenceSpec`].
    pub fn from_spec(spec: &SequenceSpec, samples_per_step: u32, looping: bool) -> AppResult<Self> {
        Self::new(spec.patterns()?, samples_per_step, looping)
    }

    /// Build from the `[run.io_sequence]` configuration section.
    pub fn from_settings(settings: &IoSequenceSettings) -> AppResult<Self> {
        Self::from_spec(&settings.spec()?, settings.samples_per_step, settings.looping)
    }

    /// Current state.
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// True while a pattern is being output.
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, SequenceState::Active(_))
    }

    /// Pattern at the current index, if active.
    pub fn current(&self) -> Option<u16> {
        match self.state {
            SequenceState::Active(index) => self.patterns.get(index).copied(),
            SequenceState::Disabled | SequenceState::Completed => None,
        }
    }

    /// Count one sample on the current pattern, advancing once the step is full.
    pub fn observe_sample(&mut self) -> Step {
        if !self.is_enabled() {
            return Step::Finished;
        }
        self.samples_at_index += 1;
        if self.samples_at_index < self.samples_per_step {
            return Step::Hold;
        }
        match self.advance() {
            Some(pattern) => Step::Advance(pattern),
            None => Step::Finished,
        }
    }

    /// Move to the next pattern, returning it, or `None` once there is no further value.
    pub fn advance(&mut self) -> Option<u16> {
        let SequenceState::Active(index) = self.state else {
            return None;
        };
        self.samples_at_index = 0;
        let next = index + 1;
        self.state = if next < self.patterns.len() {
            SequenceState::Active(next)
        } else if self.looping {
            SequenceState::Active(0)
        } else {
            SequenceState::Completed
        };
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: i64, stop: i64, step: i64) -> SequenceSpec {
        SequenceSpec::Range { start, stop, step }
    }

    #[test]
    fn test_non_looping_completes_after_one_pass() {
        let mut seq = IoSequencer::from_spec(&range(0, 7, 1), 1, false).unwrap();
        assert_eq!(seq.state(), SequenceState::Active(0));

        for expected in 1..8u16 {
            assert_eq!(seq.observe_sample(), Step::Advance(expected));
        }
        assert_eq!(seq.observe_sample(), Step::Finished);
        assert_eq!(seq.state(), SequenceState::Completed);
        assert_eq!(seq.current(), None);

        // Stays completed.
        assert_eq!(seq.advance(), None);
        assert_eq!(seq.observe_sample(), Step::Finished);
    }

    #[test]
    fn test_looping_wraps_to_start() {
        let mut seq = IoSequencer::from_spec(&range(0, 7, 1), 1, true).unwrap();
        for _ in 0..7 {
            seq.advance();
        }
        assert_eq!(seq.state(), SequenceState::Active(7));
        assert_eq!(seq.advance(), Some(0));
        assert_eq!(seq.state(), SequenceState::Active(0));
    }

    #[test]
    fn test_samples_per_step_holds_pattern() {
        let spec = SequenceSpec::List(vec![
            PatternValue::Number(1),
            PatternValue::Text("0b10".into()),
        ]);
        let mut seq = IoSequencer::from_spec(&spec, 3, false).unwrap();
        assert_eq!(seq.current(), Some(1));
        assert_eq!(seq.observe_sample(), Step::Hold);
        assert_eq!(seq.observe_sample(), Step::Hold);
        assert_eq!(seq.observe_sample(), Step::Advance(2));
        assert_eq!(seq.observe_sample(), Step::Hold);
        assert_eq!(seq.observe_sample(), Step::Hold);
        assert_eq!(seq.observe_sample(), Step::Finished);
    }

    #[test]
    fn test_empty_sequence_is_disabled() {
        let seq = IoSequencer::from_spec(&SequenceSpec::List(vec![]), 1, true).unwrap();
        assert_eq!(seq.state(), SequenceState::Disabled);
        assert_eq!(seq.current(), None);
    }

    #[test]
    fn test_range_validation() {
        assert!(range(2040, 2050, 1).patterns().is_err());
        assert!(range(0, 4, 0).patterns().is_err());
        assert_eq!(range(6, 0, -3).patterns().unwrap(), vec![6, 3, 0]);
        assert_eq!(range(0, 10, 4).patterns().unwrap(), vec![0, 4, 8]);
    }

    #[test]
    fn test_zero_samples_per_step_rejected() {
        assert!(IoSequencer::new(vec![1], 0, false).is_err());
    }
}
