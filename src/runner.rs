//! Top-level run: connect, configure, then either a script or a sampling loop.

use crate::command::catalog::{EXTERNAL_IO, MEASURE, SYSTEM};
use crate::config::{RunSettings, ScriptSettings, Settings};
use crate::error::AppResult;
use crate::scripting::{ScriptApi, ScriptSandbox};
use crate::sequencer::{IoSequencer, SequenceState, Step};
use crate::session::{DeviceSession, Reply};
use crate::storage::RunRecorder;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// What a run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Sampling run file, if a sampling loop ran
    pub run_file: Option<PathBuf>,
    /// Rows written, timeouts included
    pub samples: usize,
    /// Samples that got no reply
    pub timeouts: usize,
    /// Saved script results file name
    pub results_file: Option<String>,
    /// Rendered return value of the script
    pub script_value: Option<String>,
}

/// Connect to the configured instrument and run. The connection is closed on every
/// exit path.
pub async fn run(settings: &Settings) -> AppResult<RunSummary> {
    let session = DeviceSession::connect(&settings.host).await?;
    info!(host = %settings.host.host, port = settings.host.port, "Connected");
    let session = Arc::new(Mutex::new(session));
    let outcome = run_on(Arc::clone(&session), settings).await;
    close(&session).await;
    outcome
}

/// Run against an already open session.
pub async fn run_on(
    session: Arc<Mutex<DeviceSession>>,
    settings: &Settings,
) -> AppResult<RunSummary> {
    let temperature = session.lock().await.apply_configuration(settings).await?;
    let Some(run) = &settings.run else {
        info!("No [run] section; configuration only");
        return Ok(RunSummary::default());
    };
    let output_dir = &settings.application.output_dir;

    if let Some(script) = &run.script {
        return run_script(session, script, output_dir).await;
    }

    let mut session = session.lock().await;
    sample(&mut session, run, temperature, output_dir).await
}

/// Execute one script against the session, saving its results when configured.
///
/// Results are saved even when the script fails or times out.
#[instrument(skip_all, fields(script = %script.path.display(), mode = %script.mode))]
pub async fn run_script(
    session: Arc<Mutex<DeviceSession>>,
    script: &ScriptSettings,
    output_dir: &Path,
) -> AppResult<RunSummary> {
    let api = ScriptApi::new(session, Handle::current(), output_dir);
    let sandbox = ScriptSandbox::new(script.mode);
    let outcome = sandbox
        .execute_file(&script.path, &api, script.timeout())
        .await;

    let mut summary = RunSummary::default();
    if script.autosave && !api.results().is_empty() {
        match api.save_results(None) {
            Ok(name) => summary.results_file = Some(name),
            Err(err) => warn!(error = %err, "Could not save script results"),
        }
    }

    let value = outcome?;
    info!(result = %value, "Script finished");
    summary.script_value = Some(value.to_string());
    Ok(summary)
}

/// Connect, read back the instrument setup and close.
pub async fn snapshot(settings: &Settings) -> AppResult<Vec<(String, String)>> {
    let session = Arc::new(Mutex::new(DeviceSession::connect(&settings.host).await?));
    let outcome = session.lock().await.settings_snapshot().await;
    close(&session).await;
    outcome
}

async fn close(session: &Mutex<DeviceSession>) {
    if let Err(err) = session.lock().await.close().await {
        warn!(error = %err, "Error while closing connection");
    }
}

async fn set_output(session: &mut DeviceSession, pattern: u16) -> AppResult<()> {
    EXTERNAL_IO.output.set(session.batch(), pattern);
    session.flush().await?;
    Ok(())
}

/// The unattended sampling loop.
#[instrument(skip_all, fields(samples = run.samples))]
async fn sample(
    session: &mut DeviceSession,
    run: &RunSettings,
    temperature: bool,
    output_dir: &Path,
) -> AppResult<RunSummary> {
    let snapshot = if run.settings_dump {
        session.settings_snapshot().await?
    } else {
        Vec::new()
    };
    let mut recorder = RunRecorder::create(output_dir, &snapshot)?;

    let mut sequencer = run
        .io_sequence
        .as_ref()
        .map(IoSequencer::from_settings)
        .transpose()?;

    SYSTEM.wait.issue(session.batch());
    session.flush().await?;

    let mut pattern = sequencer.as_ref().and_then(IoSequencer::current);
    if let Some(first) = pattern {
        set_output(session, first).await?;
    }

    let interval = run.polling_interval();
    let mut next_tick = Instant::now();
    let mut timeouts = 0;
    for index in 1..=run.samples {
        tokio::time::sleep_until(next_tick).await;
        next_tick += interval;

        let taken_at = Local::now();
        if temperature {
            MEASURE.read.get_with(session.batch(), "TEMP");
        } else {
            MEASURE.read.get(session.batch());
        }
        match session.flush_lenient().await? {
            Reply::Line(line) => {
                recorder.write_sample(&taken_at, &line, pattern)?;
                info!(reply = %line.trim(), "Sample {index}/{}", run.samples);
            }
            Reply::TimedOut | Reply::Ack => {
                timeouts += 1;
                recorder.write_timeout(&taken_at, pattern)?;
                warn!("Sample {index}/{} timed out", run.samples);
            }
        }

        let Some(seq) = sequencer.as_mut() else {
            continue;
        };
        match seq.observe_sample() {
            Step::Hold => {}
            Step::Advance(next) => {
                set_output(session, next).await?;
                pattern = Some(next);
            }
            Step::Finished => {
                if run.stop_when_sequence_done && seq.state() == SequenceState::Completed {
                    info!(samples = index, "IO sequence complete, ending run");
                    break;
                }
            }
        }
    }

    let samples = recorder.rows();
    let run_file = recorder.finish()?;
    Ok(RunSummary {
        run_file: Some(run_file),
        samples,
        timeouts,
        ..RunSummary::default()
    })
}
