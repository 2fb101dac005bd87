//! Static catalogue of instrument commands.
//!
//! Grouped the way the instrument manual groups them. Comments list the accepted
//! arguments where the device documents them.

use super::batch::CommandBatch;
use super::descriptor::{Control, Query, Setting};
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use regex::Regex;
use std::sync::OnceLock;

/// Identity, reset and clock commands.
pub struct System {
    /// `*IDN?`
    pub device_id: Query,
    /// `*OPT?`
    pub installed_options: Query,
    /// `*RST`
    pub reset: Setting,
    /// `*TST?`
    pub self_test: Query,
    /// `<year>,<month>,<day>`
    pub date: Control,
    /// `<hour 00-23>,<minute>,<second 00-59>`
    pub time: Control,
    /// `*WAI`
    pub wait: Setting,
}

/// System command table.
pub const SYSTEM: System = System {
    device_id: Query::new("*IDN"),
    installed_options: Query::new("*OPT"),
    reset: Setting::new("*RST"),
    self_test: Query::new("*TST"),
    date: Control::new(":SYSTem:DATE"),
    time: Control::new(":SYSTem:TIME"),
    wait: Setting::new("*WAI"),
};

/// Front panel display commands.
pub struct Display {
    /// 1/0/ON/OFF
    pub state: Control,
    /// 0 to 100 or MAX/MIN/DEFault
    pub brightness: Control,
    /// 0 to 1 or MAX/MIN/DEFault
    pub kind: Control,
    /// NUMeric, TCHart, METer, STATistics, HISTogram
    pub view: Control,
}

/// Display command table.
pub const DISPLAY: Display = Display {
    state: Control::new(":DISPlay:STATe"),
    brightness: Control::new(":DISPlay:BACKlight"),
    kind: Control::new(":DISPlay:TYPe"),
    view: Control::new(":DISPlay:VIEW"),
};

/// Measurement and trigger commands.
pub struct Measure {
    /// FIX/FLOAT
    pub format: Control,
    /// 0/1/OFF/ON
    pub continuous: Control,
    /// Trigger and read one value
    pub read: Query,
    /// Read the last value without triggering
    pub fetch: Query,
    /// 1 to 5000 or MAX/MIN/DEFault
    pub sample_count: Control,
    /// Most recent stored value
    pub last: Control,
    /// 100 mV/1 V/10 V/100 V/1000 V
    pub dc_voltage: Control,
    /// NPLC 0.02 to 100 or SLOW/MED/FAST
    pub speed: Control,
    /// Internal temperature
    pub temperature: Query,
    /// 1/0/ON/OFF
    pub aperture_control: Control,
    /// Integration time in seconds or MAX/MIN/DEFault
    pub aperture_time: Control,
    /// Range or MAX/MIN/DEFault
    pub voltage_range: Control,
    /// 1/0/ON/OFF
    pub voltage_range_auto: Control,
    /// 4 to 8 or MAX/MIN/DEFault
    pub voltage_digits: Control,
    /// 1/0/ON/OFF
    pub impedance_auto: Control,
    /// IMMediate/EXTernal/BUS
    pub trigger_source: Control,
    /// 0 to 9.999 or MAX/MIN/DEFault
    pub trigger_delay: Control,
    /// 1/0/ON/OFF
    pub trigger_delay_auto: Control,
    /// Start one measurement
    pub immediate: Setting,
    /// Stop the current measurement
    pub abort: Setting,
}

/// Measure command table.
pub const MEASURE: Measure = Measure {
    format: Control::new(":SYSTem:COMMunicate:FORMat"),
    continuous: Control::new(":INITiate:CONTinuous"),
    read: Query::new(":READ"),
    fetch: Query::new(":FETCh"),
    sample_count: Control::new(":SAMPle:COUNt"),
    last: Control::new(":DATA:LAST"),
    dc_voltage: Control::new(":MEASure:VOLTage:DC"),
    speed: Control::new(":SENSe:VOLTage:DC:NPLCycles"),
    temperature: Query::new(":MEASure:TEMPerature"),
    aperture_control: Control::new(":SENSe:VOLTage:DC:APERture:ENABled"),
    aperture_time: Control::new(":SENSe:VOLTage:DC:APERture"),
    voltage_range: Control::new(":SENSe:VOLTage:DC:RANGe"),
    voltage_range_auto: Control::new(":SENSe:VOLTage:DC:RANGe:AUTO"),
    voltage_digits: Control::new(":SENSe:VOLTage:DIGits"),
    impedance_auto: Control::new("SENSe:VOLTage:DC:IMPedance:AUTO"),
    trigger_source: Control::new(":TRIGGER:SOURCE"),
    trigger_delay: Control::new(":TRIGger:DELay"),
    trigger_delay_auto: Control::new(":TRIGger:DELay:AUTO"),
    immediate: Setting::new(":INITiate:IMMediate"),
    abort: Setting::new(":ABORt"),
};

/// External digital I/O connector.
pub struct ExternalIo {
    /// Connector mode
    pub mode: Query,
    /// Input pins
    pub input: Query,
    /// Output pattern 0 to 2047
    pub output: Control,
}

/// External I/O command table.
pub const EXTERNAL_IO: ExternalIo = ExternalIo {
    mode: Query::new(":IO:MODE"),
    input: Query::new(":IO:INPut"),
    output: Control::new(":IO:OUTPut"),
};

/// Panel memory save/recall.
pub struct Panel {
    /// `*SAV <n>`
    pub save: Control,
    /// `*RCL <n>`
    pub load: Control,
}

/// Panel command table.
pub const PANEL: Panel = Panel {
    save: Control::new("*SAV"),
    load: Control::new("*RCL"),
};

/// On-screen label.
pub struct Label {
    /// Quoted text, at most 8 characters
    pub text: Control,
    /// ON/OFF
    pub state: Control,
}

/// Label command table.
pub const LABEL: Label = Label {
    text: Control::new(":SYSTem:LABel"),
    state: Control::new(":SYSTem:LABel:STATe"),
};

/// Longest label the display accepts.
pub const LABEL_MAX_CHARS: usize = 8;

fn date_mask_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:%.){1,4}").ok())
        .as_ref()
}

/// Expand the last run of strftime directives in `text` using `now`.
///
/// Text is first cut to [`LABEL_MAX_CHARS`] and trimmed. A run containing an
/// unknown directive is left as written.
pub fn render_label_text<Tz>(text: &str, now: &chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let clipped: String = text.chars().take(LABEL_MAX_CHARS).collect();
    let clipped = clipped.trim();

    let Some(mask) = date_mask_pattern().and_then(|re| re.find_iter(clipped).last()) else {
        return clipped.to_string();
    };
    let items: Vec<Item<'_>> = StrftimeItems::new(mask.as_str()).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return clipped.to_string();
    }
    let stamp = now.format_with_items(items.into_iter()).to_string();
    clipped.replace(mask.as_str(), &stamp)
}

impl Label {
    /// Turn the label on and stage its text, with date directives expanded.
    pub fn set_text(&self, batch: &mut CommandBatch, text: &str) -> String {
        self.state.set(batch, "ON");
        let rendered = render_label_text(text, &Local::now());
        self.text.set(batch, format!("\"{rendered}\""))
    }
}
