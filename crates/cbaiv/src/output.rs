use std::io::IsTerminal;

use cbaiv_device::DeviceStatus;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One status reading tagged with the unit it came from.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub serial: u32,
    /// Seconds since the command started.
    pub elapsed: f64,
    #[serde(flatten)]
    pub status: DeviceStatus,
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn status_table<'a>(readings: impl IntoIterator<Item = &'a Reading>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "SERIAL", "ELAPSED", "VOLTS", "SET A", "MEAS A", "RUNNING", "LIMITED", "HIGH TEMP",
        ]);
    for reading in readings {
        let s = &reading.status;
        table.add_row(vec![
            reading.serial.to_string(),
            format!("{:.1}s", reading.elapsed),
            format!("{:.3}", s.voltage),
            format!("{:.3}", s.set_current),
            format!("{:.2}", s.measured_current),
            yes_no(s.running).to_string(),
            yes_no(s.power_limited).to_string(),
            yes_no(s.high_temp).to_string(),
        ]);
    }
    table
}

pub fn pretty_line(reading: &Reading) -> String {
    let s = &reading.status;
    let mut line = format!(
        "[{:>7.1}s] serial={} voltage={:.3}V set={:.3}A measured={:.2}A {}",
        reading.elapsed,
        reading.serial,
        s.voltage,
        s.set_current,
        s.measured_current,
        if s.running { "running" } else { "idle" },
    );
    if s.power_limited {
        line.push_str(" power-limited");
    }
    if s.high_temp {
        line.push_str(" HIGH-TEMP");
    }
    line
}

/// Print a single reading in `format`.
pub fn print_reading(reading: &Reading, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(reading),
        OutputFormat::Table => println!("{}", status_table([reading])),
        OutputFormat::Pretty => println!("{}", pretty_line(reading)),
        OutputFormat::Raw => println!("{:.6}", reading.status.voltage),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
