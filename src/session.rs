//! One instrument session: a connection plus the batch being built for it.
//!
//! Everything the tool does to the instrument is "stage descriptors, then flush".
//! The session owns its [`CommandBatch`] exclusively, so two sessions never see each
//! other's fragments.
//!
//! # Timeout policy
//!
//! - [`DeviceSession::flush`] is strict: a missing reply is an error. Configuration,
//!   the settings snapshot and every script capability use it.
//! - [`DeviceSession::flush_lenient`] turns a missing reply into
//!   [`Reply::TimedOut`]. Only the unattended sampling loop uses it, so one flaky
//!   exchange does not end a long run.

use crate::command::catalog::{DISPLAY, LABEL, MEASURE, PANEL, SYSTEM};
use crate::command::{CommandBatch, Query, Setting};
use crate::config::{HostSettings, Settings};
use crate::error::{AppResult, DaqError};
use crate::transport::{TcpTransport, Transport};
use tracing::{debug, info, instrument, warn};

/// Outcome of one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The reply line, when the batch expected one
    Line(String),
    /// The batch expected no reply and was written
    Ack,
    /// The batch was written but no reply arrived (lenient flush only)
    TimedOut,
}

impl Reply {
    /// Reply text, if a line was received.
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Line(line) => Some(line),
            Reply::Ack | Reply::TimedOut => None,
        }
    }
}

#[derive(Clone, Copy)]
enum Probe {
    Query(Query),
    Setting(Setting),
}

/// Settings read back by [`DeviceSession::settings_snapshot`], in order.
const SNAPSHOT_PROBES: [Probe; 18] = [
    Probe::Query(SYSTEM.device_id),
    Probe::Query(SYSTEM.installed_options),
    Probe::Query(DISPLAY.brightness.as_query()),
    Probe::Query(DISPLAY.kind.as_query()),
    Probe::Query(DISPLAY.state.as_query()),
    Probe::Query(DISPLAY.view.as_query()),
    Probe::Query(MEASURE.sample_count.as_query()),
    Probe::Query(MEASURE.voltage_range.as_query()),
    Probe::Query(MEASURE.voltage_range_auto.as_query()),
    Probe::Query(MEASURE.dc_voltage.as_query()),
    Probe::Query(MEASURE.format.as_query()),
    Probe::Query(MEASURE.aperture_control.as_query()),
    Probe::Query(MEASURE.aperture_time.as_query()),
    Probe::Query(MEASURE.impedance_auto.as_query()),
    Probe::Setting(MEASURE.immediate),
    Probe::Query(MEASURE.voltage_digits.as_query()),
    Probe::Query(MEASURE.trigger_delay.as_query()),
    Probe::Query(MEASURE.trigger_delay_auto.as_query()),
];

/// A connected instrument and its staging batch.
pub struct DeviceSession {
    transport: Box<dyn Transport>,
    batch: CommandBatch,
}

impl DeviceSession {
    /// Wrap an already open transport.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            batch: CommandBatch::new(),
        }
    }

    /// Open a TCP connection to the configured host.
    pub async fn connect(host: &HostSettings) -> AppResult<Self> {
        let transport = TcpTransport::connect(&host.host, host.port, host.timeout()).await?;
        Ok(Self::new(transport))
    }

    /// The batch descriptors stage into.
    pub fn batch(&mut self) -> &mut CommandBatch {
        &mut self.batch
    }

    /// Read-only view of what is staged.
    pub fn pending(&self) -> &CommandBatch {
        &self.batch
    }

    /// Whether the underlying link is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send the staged batch as one line and collect its reply, if any.
    ///
    /// The batch is cleared once the line has been written. When the write itself
    /// fails the batch is kept so the caller can replay it.
    pub async fn flush(&mut self) -> AppResult<Reply> {
        if self.batch.is_empty() {
            debug!("Flush with nothing staged");
            return Ok(Reply::Ack);
        }

        let text = self.batch.flush_text();
        let wait = self.batch.expects_reply();
        match self.transport.send_and_receive(&text, wait).await {
            Ok(reply) => {
                self.batch.clear();
                Ok(reply.map_or(Reply::Ack, Reply::Line))
            }
            Err(err) => {
                // These only arise after the line was written.
                if matches!(
                    err,
                    DaqError::ResponseTimeout(_)
                        | DaqError::ResponseTooLarge { .. }
                        | DaqError::DecodeFailure(_)
                ) {
                    self.batch.clear();
                }
                Err(err)
            }
        }
    }

    /// Like [`DeviceSession::flush`], but a missing reply becomes [`Reply::TimedOut`].
    pub async fn flush_lenient(&mut self) -> AppResult<Reply> {
        match self.flush().await {
            Err(DaqError::ResponseTimeout(timeout)) => {
                warn!(?timeout, "No reply from instrument, continuing");
                Ok(Reply::TimedOut)
            }
            other => other,
        }
    }

    /// Flush and require a reply line.
    pub async fn flush_for_line(&mut self) -> AppResult<String> {
        match self.flush().await? {
            Reply::Line(line) => Ok(line),
            Reply::Ack | Reply::TimedOut => Err(DaqError::InvalidCommand(
                "flushed batch did not request a reply".into(),
            )),
        }
    }

    /// Push the configured instrument setup, one flush per section.
    ///
    /// Returns whether temperature readout was requested.
    #[instrument(skip_all)]
    pub async fn apply_configuration(&mut self, settings: &Settings) -> AppResult<bool> {
        if settings.system.reset {
            SYSTEM.wait.issue(&mut self.batch);
            SYSTEM.reset.issue(&mut self.batch);
            SYSTEM.wait.issue(&mut self.batch);
            self.flush().await?;
            info!("Instrument reset");
        }

        let display = &settings.display;
        let display_fields = [
            (DISPLAY.brightness, &display.brightness),
            (DISPLAY.view, &display.view),
            (DISPLAY.state, &display.state),
            (DISPLAY.kind, &display.kind),
        ];
        for (control, value) in display_fields {
            if let Some(value) = value {
                control.set(&mut self.batch, value);
            }
        }
        self.flush().await?;

        let measure = &settings.measure;
        let measure_fields = [
            (MEASURE.voltage_range, &measure.voltage_range),
            (MEASURE.voltage_range_auto, &measure.voltage_range_auto),
            (MEASURE.speed, &measure.speed),
            (MEASURE.sample_count, &measure.sample_count),
            (MEASURE.format, &measure.format),
            (MEASURE.continuous, &measure.continuous),
            (MEASURE.impedance_auto, &measure.impedance_auto),
        ];
        for (control, value) in measure_fields {
            if let Some(value) = value {
                control.set(&mut self.batch, value);
            }
        }
        self.flush().await?;

        if let Some(panel) = &settings.panel.load {
            PANEL.load.set(&mut self.batch, panel);
        } else if let Some(panel) = &settings.panel.save {
            PANEL.save.set(&mut self.batch, panel);
        }
        self.flush().await?;

        if let Some(state) = &settings.label.state {
            LABEL.state.set(&mut self.batch, state);
        }
        if let Some(text) = &settings.label.text {
            LABEL.set_text(&mut self.batch, text);
        }
        self.flush().await?;

        info!(temperature = measure.temperature, "Configuration applied");
        Ok(measure.temperature)
    }

    /// Read back the instrument setup as `(command, reply)` pairs.
    #[instrument(skip_all)]
    pub async fn settings_snapshot(&mut self) -> AppResult<Vec<(String, String)>> {
        let mut snapshot = Vec::with_capacity(SNAPSHOT_PROBES.len());
        for probe in SNAPSHOT_PROBES {
            let command = match probe {
                Probe::Query(query) => query.get(&mut self.batch),
                Probe::Setting(setting) => setting.issue(&mut self.batch),
            };
            let value = match self.flush().await? {
                Reply::Line(line) => line.trim().to_string(),
                Reply::Ack | Reply::TimedOut => "ack".to_string(),
            };
            snapshot.push((command, value));
        }
        Ok(snapshot)
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) -> AppResult<()> {
        self.transport.close().await
    }
}
