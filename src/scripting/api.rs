//! The capability object handed to scripts.
//!
//! Scripts never see the connection. Every method validates its arguments before
//! touching the wire, and each instrument exchange locks the shared session for
//! exactly one round trip.
//!
//! # Async bridge
//!
//! Script workers run on blocking threads, so each call enters the runtime with
//! [`Handle::block_on`]. Calling these methods from inside an async task would
//! panic; use `spawn_blocking` as [`super::ScriptSandbox`] does.
//!
//! # Script surface
//!
//! ```rhai
//! api.set_output(0b101);              // or "0b101", or 5
//! api.set_range("10V");               // 100mV 1V 10V 100V 1000V AUTO MAX MIN DEFAULT
//! api.set_speed("medium");            // SLOW MEDIUM/MED FAST
//! let v = api.take_measurements(5, 100);
//! api.wait(0.5);
//! let s = api.get_statistics();       // #{mean, max, min, stdev, count}
//! api.set_metadata("dut", "board 7");
//! api.log(`mean ${s.mean}`);
//! let name = api.save_results("run.csv");
//! ```

use super::deadline::Deadline;
use super::stats::Statistics;
use crate::command::catalog::{EXTERNAL_IO, MEASURE};
use crate::command::values::{parse_pattern, validate_pattern, AcquisitionSpeed, VoltageRange};
use crate::command::CommandBatch;
use crate::error::{AppResult, DaqError};
use crate::session::{DeviceSession, Reply};
use crate::storage;
use chrono::Local;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Position};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Most samples one `take_measurements` call may request.
pub const MAX_SAMPLES_PER_CALL: i64 = 5000;

/// Longest single `wait`, in seconds.
pub const MAX_WAIT_SECS: f64 = 60.0;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct ScriptState {
    results: Vec<f64>,
    metadata: BTreeMap<String, Dynamic>,
}

/// Instrument capabilities exposed to one script invocation.
///
/// Clones share the same session, results and metadata.
#[derive(Clone)]
pub struct ScriptApi {
    session: Arc<Mutex<DeviceSession>>,
    runtime: Handle,
    state: Arc<StdMutex<ScriptState>>,
    output_dir: PathBuf,
    deadline: Option<Deadline>,
}

impl ScriptApi {
    /// Create an API over a shared session. Results are saved under `output_dir`.
    pub fn new(
        session: Arc<Mutex<DeviceSession>>,
        runtime: Handle,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session,
            runtime,
            state: Arc::default(),
            output_dir: output_dir.into(),
            deadline: None,
        }
    }

    /// A clone whose calls stop once `deadline` expires.
    pub fn with_deadline(&self, deadline: Deadline) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Directory results are saved into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        // State stays consistent across a panicking holder; every update is one push.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_deadline(&self) -> AppResult<()> {
        match &self.deadline {
            Some(deadline) => deadline.check(),
            None => Ok(()),
        }
    }

    /// Stage commands and flush them as one strict round trip.
    fn round_trip<F>(&self, stage: F) -> AppResult<Reply>
    where
        F: FnOnce(&mut CommandBatch) -> String + Send + 'static,
    {
        self.check_deadline()?;
        let session = Arc::clone(&self.session);
        self.runtime.block_on(async move {
            let mut session = session.lock().await;
            let command = stage(session.batch());
            debug!(%command, "Script command");
            session.flush().await
        })
    }

    /// Sleep in slices, stopping early with `ScriptTimeout` once the deadline passes.
    fn sleep_checked(&self, duration: Duration) -> AppResult<()> {
        let mut left = duration;
        while !left.is_zero() {
            self.check_deadline()?;
            let slice = left.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            left -= slice;
        }
        self.check_deadline()
    }

    /// Drive the digital output lines to `pattern` (0 to 2047).
    pub fn set_output(&self, pattern: u16) -> AppResult<()> {
        let pattern = validate_pattern(i64::from(pattern))?;
        self.round_trip(move |batch| EXTERNAL_IO.output.set(batch, pattern))?;
        Ok(())
    }

    /// Take `count` readings, `delay_ms` apart.
    ///
    /// Valid readings are accumulated; a reply that does not parse is returned as
    /// `None` and logged.
    pub fn take_measurements(&self, count: i64, delay_ms: i64) -> AppResult<Vec<Option<f64>>> {
        if !(1..=MAX_SAMPLES_PER_CALL).contains(&count) {
            return Err(DaqError::Validation(format!(
                "sample count {count} outside 1..={MAX_SAMPLES_PER_CALL}"
            )));
        }
        let delay = u64::try_from(delay_ms)
            .map(Duration::from_millis)
            .map_err(|_| DaqError::Validation(format!("negative delay {delay_ms} ms")))?;

        let mut samples = Vec::with_capacity(count as usize);
        for index in 0..count {
            if index > 0 && !delay.is_zero() {
                self.sleep_checked(delay)?;
            }
            let reply = self.round_trip(|batch| MEASURE.read.get(batch))?;
            let text = reply.text().unwrap_or_default();
            match parse_reading(text) {
                Some(value) => {
                    self.state().results.push(value);
                    samples.push(Some(value));
                }
                None => {
                    warn!(reply = %text.trim(), index, "Unparsable measurement reply");
                    samples.push(None);
                }
            }
        }
        Ok(samples)
    }

    /// Select a voltage range; `AUTO` enables auto-ranging.
    pub fn set_range(&self, range: &str) -> AppResult<()> {
        let range: VoltageRange = range.parse()?;
        self.round_trip(move |batch| match range.token() {
            None => MEASURE.voltage_range_auto.set(batch, "ON"),
            Some(token) => {
                MEASURE.voltage_range_auto.set(batch, "OFF");
                MEASURE.voltage_range.set(batch, token)
            }
        })?;
        Ok(())
    }

    /// Select the acquisition speed.
    pub fn set_speed(&self, speed: &str) -> AppResult<()> {
        let speed: AcquisitionSpeed = speed.parse()?;
        self.round_trip(move |batch| MEASURE.speed.set(batch, speed.token()))?;
        Ok(())
    }

    /// Block for `seconds` (0 to 60).
    pub fn wait(&self, seconds: f64) -> AppResult<()> {
        if !(0.0..=MAX_WAIT_SECS).contains(&seconds) {
            return Err(DaqError::Validation(format!(
                "wait of {seconds} s outside 0..={MAX_WAIT_SECS}"
            )));
        }
        self.sleep_checked(Duration::from_secs_f64(seconds))
    }

    /// Statistics over the accumulated results.
    pub fn statistics(&self) -> Statistics {
        Statistics::of(&self.state().results)
    }

    /// Copy of the accumulated results.
    pub fn results(&self) -> Vec<f64> {
        self.state().results.clone()
    }

    /// Drop all accumulated results.
    pub fn clear_results(&self) {
        self.state().results.clear();
    }

    /// Attach a metadata entry written with saved results.
    pub fn set_metadata(&self, key: &str, value: Dynamic) {
        self.state().metadata.insert(key.to_string(), value);
    }

    /// Metadata entry, or `()` when missing.
    pub fn get_metadata(&self, key: &str) -> Dynamic {
        self.state()
            .metadata
            .get(key)
            .cloned()
            .unwrap_or(Dynamic::UNIT)
    }

    /// Metadata rendered as text, in key order.
    pub fn metadata(&self) -> Vec<(String, String)> {
        self.state()
            .metadata
            .iter()
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect()
    }

    /// Save results to `name` (reduced to its base name) or a timestamped default.
    ///
    /// Returns the file name used.
    pub fn save_results(&self, name: Option<&str>) -> AppResult<String> {
        let name = match name {
            Some(name) => storage::sanitize_file_name(name)?,
            None => storage::script_results_file_name(&Local::now()),
        };
        let path = self.output_dir.join(&name);
        let (metadata, results) = (self.metadata(), self.results());
        storage::write_script_results(&path, &metadata, &results)?;
        Ok(name)
    }
}

/// First comma-separated field of a reply, as a finite number.
fn parse_reading(reply: &str) -> Option<f64> {
    reply
        .split(',')
        .next()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Convert a host error into a script error.
///
/// An expired deadline terminates the script outright instead of raising a
/// catchable error.
pub(crate) fn into_rhai(err: DaqError) -> Box<EvalAltResult> {
    match err {
        DaqError::ScriptTimeout(_) => {
            Box::new(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE))
        }
        other => Box::new(EvalAltResult::ErrorRuntime(
            other.to_string().into(),
            Position::NONE,
        )),
    }
}

fn pattern_from_int(value: i64) -> Result<u16, Box<EvalAltResult>> {
    validate_pattern(value).map_err(into_rhai)
}

fn pattern_from_text(value: &str) -> Result<u16, Box<EvalAltResult>> {
    parse_pattern(value).map_err(into_rhai)
}

/// Register the `ScriptApi` type and its methods.
pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptApi>("HiokiApi");

    engine.register_fn("set_output", |api: &mut ScriptApi, value: i64| {
        api.set_output(pattern_from_int(value)?).map_err(into_rhai)
    });
    engine.register_fn("set_output", |api: &mut ScriptApi, value: &str| {
        api.set_output(pattern_from_text(value)?).map_err(into_rhai)
    });

    engine.register_fn(
        "take_measurements",
        |api: &mut ScriptApi, count: i64, delay_ms: i64| -> Result<Array, Box<EvalAltResult>> {
            let samples = api.take_measurements(count, delay_ms).map_err(into_rhai)?;
            Ok(samples
                .into_iter()
                .map(|sample| sample.map_or(Dynamic::UNIT, Dynamic::from_float))
                .collect())
        },
    );

    engine.register_fn("set_range", |api: &mut ScriptApi, range: &str| {
        api.set_range(range).map_err(into_rhai)
    });
    engine.register_fn("set_speed", |api: &mut ScriptApi, speed: &str| {
        api.set_speed(speed).map_err(into_rhai)
    });

    engine.register_fn("wait", |api: &mut ScriptApi, seconds: f64| {
        api.wait(seconds).map_err(into_rhai)
    });
    engine.register_fn("wait", |api: &mut ScriptApi, seconds: i64| {
        api.wait(seconds as f64).map_err(into_rhai)
    });

    engine.register_fn("get_statistics", |api: &mut ScriptApi| -> Map {
        api.statistics().to_map()
    });

    engine.register_fn("log", |_api: &mut ScriptApi, message: &str| {
        info!(target: "script", "{message}");
    });

    engine.register_fn(
        "set_metadata",
        |api: &mut ScriptApi, key: &str, value: Dynamic| api.set_metadata(key, value),
    );
    engine.register_fn("get_metadata", |api: &mut ScriptApi, key: &str| {
        api.get_metadata(key)
    });

    engine.register_fn("clear_results", |api: &mut ScriptApi| api.clear_results());
    engine.register_get("results", |api: &mut ScriptApi| -> Array {
        api.results().into_iter().map(Dynamic::from_float).collect()
    });

    engine.register_fn("save_results", |api: &mut ScriptApi| {
        api.save_results(None).map_err(into_rhai)
    });
    engine.register_fn("save_results", |api: &mut ScriptApi, name: &str| {
        api.save_results(Some(name)).map_err(into_rhai)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;
    use tracing_test::traced_test;

    fn api_with(transport: MockTransport, dir: &Path) -> (Runtime, ScriptApi) {
        let runtime = Runtime::new().unwrap();
        let session = Arc::new(Mutex::new(DeviceSession::new(transport)));
        let api = ScriptApi::new(session, runtime.handle().clone(), dir);
        (runtime, api)
    }

    #[test]
    #[traced_test]
    fn test_take_measurements_with_bad_reply() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new().with_replies(["1.0", "2.0", "abc"]);
        let log = transport.sent_log();
        let (_rt, api) = api_with(transport, dir.path());

        let samples = api.take_measurements(3, 0).unwrap();
        assert_eq!(samples, vec![Some(1.0), Some(2.0), None]);
        assert_eq!(api.results(), vec![1.0, 2.0]);
        assert_eq!(log.lock().unwrap().as_slice(), [":READ?", ":READ?", ":READ?"]);
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("Unparsable measurement reply"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one warning, got {n}")),
            }
        });
    }

    #[test]
    fn test_non_finite_replies_are_unparsable() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new().with_replies(["NaN", "inf", "-infinity", "2.0"]);
        let (_rt, api) = api_with(transport, dir.path());

        let samples = api.take_measurements(4, 0).unwrap();
        assert_eq!(samples, vec![None, None, None, Some(2.0)]);
        assert_eq!(api.results(), vec![2.0]);
        assert_eq!(api.statistics().mean, Some(2.0));
    }

    #[test]
    fn test_metadata_cannot_add_result_rows() {
        let dir = tempdir().unwrap();
        let (_rt, api) = api_with(MockTransport::new().with_reply("1"), dir.path());
        api.take_measurements(1, 0).unwrap();
        api.set_metadata("note", Dynamic::from("x\n99,666".to_string()));

        api.save_results(Some("r.csv")).unwrap();
        let text = std::fs::read_to_string(dir.path().join("r.csv")).unwrap();
        assert_eq!(text, "# note=x\\n99,666\n0,1\n");
    }

    #[test]
    fn test_compound_reply_uses_first_field() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new().with_reply("+1.25E+00,+2.51E+01");
        let (_rt, api) = api_with(transport, dir.path());
        assert_eq!(api.take_measurements(1, 0).unwrap(), vec![Some(1.25)]);
    }

    #[test]
    fn test_validation_happens_before_io() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new();
        let log = transport.sent_log();
        let (_rt, api) = api_with(transport, dir.path());

        assert!(matches!(api.take_measurements(0, 0), Err(DaqError::Validation(_))));
        assert!(matches!(api.take_measurements(5001, 0), Err(DaqError::Validation(_))));
        assert!(matches!(api.set_output(2048), Err(DaqError::Validation(_))));
        assert!(matches!(api.set_range("5V"), Err(DaqError::Validation(_))));
        assert!(matches!(api.set_speed("turbo"), Err(DaqError::Validation(_))));
        assert!(matches!(api.wait(61.0), Err(DaqError::Validation(_))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_range_and_speed_commands() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new();
        let log = transport.sent_log();
        let (_rt, api) = api_with(transport, dir.path());

        api.set_range("auto").unwrap();
        api.set_range("100mV").unwrap();
        api.set_speed("medium").unwrap();
        api.set_output(0b101).unwrap();
        assert_eq!(
            log.lock().unwrap().as_slice(),
            [
                ":SENSe:VOLTage:DC:RANGe:AUTO ON",
                ":SENSe:VOLTage:DC:RANGe:AUTO OFF;:SENSe:VOLTage:DC:RANGe 100E-3",
                ":SENSe:VOLTage:DC:NPLCycles MED",
                ":IO:OUTPut 5",
            ]
        );
    }

    #[test]
    fn test_save_results_stays_in_output_dir() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new().with_replies(["1.5", "2.5"]);
        let (_rt, api) = api_with(transport, dir.path());
        api.take_measurements(2, 0).unwrap();
        api.set_metadata("operator", Dynamic::from("kim".to_string()));

        let name = api.save_results(Some("../../etc/passwd")).unwrap();
        assert_eq!(name, "passwd");
        let text = std::fs::read_to_string(dir.path().join("passwd")).unwrap();
        assert_eq!(text, "# operator=kim\n0,1.5\n1,2.5\n");
    }

    #[test]
    fn test_metadata_and_clear() {
        let dir = tempdir().unwrap();
        let (_rt, api) = api_with(MockTransport::new().with_reply("3"), dir.path());
        assert!(api.get_metadata("missing").is_unit());
        api.take_measurements(1, 0).unwrap();
        assert_eq!(api.statistics().count, 1);
        api.clear_results();
        assert!(api.results().is_empty());
    }

    #[test]
    fn test_expired_deadline_blocks_round_trips() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new().with_reply("1.0");
        let log = transport.sent_log();
        let (_rt, api) = api_with(transport, dir.path());

        let deadline = Deadline::after(Duration::from_secs(60));
        let bounded = api.with_deadline(deadline.clone());
        deadline.cancel();
        assert!(matches!(
            bounded.take_measurements(1, 0),
            Err(DaqError::ScriptTimeout(_))
        ));
        assert!(log.lock().unwrap().is_empty());
    }
}
