//! Sandboxed Rhai scripting for measurement sequences.
//!
//! A script receives one capability object, the [`ScriptApi`], and drives the
//! instrument only through it. Which language features are available depends on the
//! [`SandboxMode`] chosen for the invocation.
//!
//! # Architecture
//!
//! ```text
//! ScriptSandbox::execute (async supervisor, wall-clock budget)
//!     └── spawn_blocking worker
//!             ├── Engine for the chosen tier (restricted / trusted / developer)
//!             └── ScriptApi ──block_on──> Arc<Mutex<DeviceSession>>
//! ```
//!
//! # Entry points
//!
//! After the script body runs, `sequence(api)` is called if defined, else
//! `main(api)`. A script with neither returns the accumulated results.
//!
//! ```rhai
//! fn sequence(api) {
//!     api.set_range("10V");
//!     api.set_output(0b101);
//!     let values = api.take_measurements(5, 100);
//!     api.get_statistics()
//! }
//! ```

pub mod api;
pub mod deadline;
pub mod sandbox;
pub mod stats;

pub use api::ScriptApi;
pub use deadline::{Deadline, DeadlineGuard};
pub use sandbox::ScriptSandbox;
pub use stats::Statistics;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability tier a script runs under.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Core language, strings, arrays and maps only
    #[default]
    Restricted,
    /// Restricted plus math and statistics helpers
    Trusted,
    /// Full standard environment with file module imports. Local debugging only.
    Developer,
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxMode::Restricted => "restricted",
            SandboxMode::Trusted => "trusted",
            SandboxMode::Developer => "developer",
        };
        f.write_str(name)
    }
}
