//! Runs in its own test binary because `logging::init` installs the process-global
//! tracing subscriber, which conflicts with `#[traced_test]` in the library tests.

use hioki_daq::logging::{init, OutputFormat};

#[test]
fn test_init_is_idempotent() {
    init("info", OutputFormat::Compact).unwrap();
    init("debug", OutputFormat::Json).unwrap();
}
