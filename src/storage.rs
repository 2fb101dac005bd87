//! CSV output for runs and script results.
//!
//! Both file kinds start with optional `#`-prefixed metadata lines followed by plain
//! CSV records:
//!
//! - run files: `# command=reply` lines, then `timestamp,<reply fields>[,io_pattern]`
//! - script results: `# key=value` lines, then `index,value`

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Timestamp format of run rows.
pub const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Reply text recorded for a sample that timed out.
pub const TIMEOUT_MARKER: &str = "timeout";

/// Default run file name, e.g. `20240131_120000_HIOKI.csv`.
pub fn run_file_name(now: &DateTime<Local>) -> String {
    format!("{}_HIOKI.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Default script results file name, e.g. `20240131_120000_script_results.csv`.
pub fn script_results_file_name(now: &DateTime<Local>) -> String {
    format!("{}_script_results.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Reduce a caller-supplied name to its final path component.
///
/// `../../etc/passwd` becomes `passwd`; names with no usable component are rejected.
pub fn sanitize_file_name(name: &str) -> AppResult<String> {
    Path::new(name.trim())
        .file_name()
        .and_then(|base| base.to_str())
        .filter(|base| !base.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DaqError::Validation(format!("invalid results file name '{name}'")))
}

fn create_with_metadata<'a, I>(path: &Path, metadata: I) -> AppResult<File>
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    for (key, value) in metadata {
        writeln!(file, "# {}={}", single_line(key), single_line(&value))?;
    }
    Ok(file)
}

/// Escape line breaks so one metadata entry stays on one `#` line.
fn single_line(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

/// Write accumulated script results as `index,value` rows under metadata lines.
pub fn write_script_results(
    path: &Path,
    metadata: &[(String, String)],
    results: &[f64],
) -> AppResult<()> {
    let file = create_with_metadata(
        path,
        metadata.iter().map(|(key, value)| (key.as_str(), value.clone())),
    )?;
    let mut writer = csv::Writer::from_writer(file);
    for (index, value) in results.iter().enumerate() {
        writer.write_record([index.to_string(), value.to_string()])?;
    }
    writer.flush()?;
    info!(path = %path.display(), count = results.len(), "Script results saved");
    Ok(())
}

/// Row-by-row writer for one sampling run.
pub struct RunRecorder {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl RunRecorder {
    /// Create the run file in `dir`, writing the snapshot as metadata lines.
    pub fn create(dir: &Path, snapshot: &[(String, String)]) -> AppResult<Self> {
        let path = dir.join(run_file_name(&Local::now()));
        let file = create_with_metadata(
            &path,
            snapshot.iter().map(|(command, reply)| (command.as_str(), reply.clone())),
        )?;
        let writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        info!(path = %path.display(), "Run file created");
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Location of the run file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one sample: the reply's comma-separated fields after the timestamp.
    pub fn write_sample(
        &mut self,
        timestamp: &DateTime<Local>,
        reply: &str,
        io_pattern: Option<u16>,
    ) -> AppResult<()> {
        let mut record = vec![timestamp.format(ROW_TIMESTAMP_FORMAT).to_string()];
        record.extend(reply.trim().split(',').map(|field| field.trim().to_string()));
        if let Some(pattern) = io_pattern {
            record.push(pattern.to_string());
        }
        self.writer.write_record(&record)?;
        // Rows must survive an abrupt end of the run.
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Append a row marking a sample that got no reply.
    pub fn write_timeout(
        &mut self,
        timestamp: &DateTime<Local>,
        io_pattern: Option<u16>,
    ) -> AppResult<()> {
        self.write_sample(timestamp, TIMEOUT_MARKER, io_pattern)
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> AppResult<PathBuf> {
        self.writer.flush()?;
        info!(path = %self.path.display(), rows = self.rows, "Run file closed");
        Ok(self.path)
    }
}
