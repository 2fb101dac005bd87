//! Command construction.
//!
//! Descriptors from [`catalog`] stage fragments into a [`CommandBatch`] owned by the
//! caller's session. The batch is flushed as one compound line by
//! [`crate::session::DeviceSession::flush`].
//!
//! ```
//! use hioki_daq::command::{catalog::MEASURE, CommandBatch};
//!
//! let mut batch = CommandBatch::new();
//! MEASURE.speed.set(&mut batch, "FAST");
//! MEASURE.read.get(&mut batch);
//! assert_eq!(batch.flush_text(), ":SENSe:VOLTage:DC:NPLCycles FAST;:READ?");
//! assert!(batch.expects_reply());
//! ```

pub mod batch;
pub mod catalog;
pub mod descriptor;
pub mod values;

pub use batch::CommandBatch;
pub use descriptor::{Control, Query, Setting};
pub use values::{parse_pattern, validate_pattern, AcquisitionSpeed, VoltageRange};
