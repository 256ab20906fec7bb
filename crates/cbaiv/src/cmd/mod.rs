use std::time::Duration;

use cbaiv_device::sim::SimBackend;
use cbaiv_device::{DeviceSession, SessionConfig};
use cbaiv_transport::BackendRegistry;
use clap::{Args, Subcommand};

use crate::exit::{device_error, CliResult};
use crate::output::OutputFormat;

pub mod doctor;
pub mod info;
pub mod run;
pub mod scan;
pub mod status;
pub mod stop;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List attached analyzers by serial number.
    Scan,
    /// Check the USB stack and attached analyzers.
    Doctor,
    /// Show serial number and current readings of one analyzer.
    Info,
    /// Print one status reading.
    Status,
    /// Run a constant-current discharge test, printing readings.
    Run(RunArgs),
    /// Stop any test running on an analyzer.
    Stop,
    /// Show version information.
    Version(VersionArgs),
}

/// How to reach the analyzer; shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct DeviceArgs {
    /// Register N simulated analyzers (serials 1..=N) instead of real hardware.
    #[arg(long, value_name = "N", env = "CBAIV_SIMULATE", global = true)]
    pub simulate: Option<usize>,

    /// Serial number of the analyzer to use. Default: the first one found.
    #[arg(long, env = "CBAIV_SERIAL", global = true)]
    pub serial: Option<u32>,

    /// How long to wait for each device response (e.g. 1s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "1s", value_parser = parse_duration, global = true)]
    pub timeout: Duration,
}

impl DeviceArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            response_timeout: self.timeout,
            ..SessionConfig::default()
        }
    }

    /// Backends available to this invocation.
    ///
    /// No hardware backend ships in this build, so without `--simulate`
    /// the registry is empty and device commands report the USB stack as
    /// unavailable.
    pub fn registry(&self) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        if let Some(count) = self.simulate {
            let serials: Vec<u32> = (1..).take(count).collect();
            registry.register(SimBackend::with_serials(&serials));
        }
        registry
    }

    /// Open a session on the selected analyzer.
    pub fn connect(&self, registry: &BackendRegistry) -> CliResult<DeviceSession> {
        cbaiv_device::connect_with_config(registry, self.serial, self.session_config())
            .map_err(|err| device_error("connect failed", err))
    }
}

pub fn run(command: Command, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Scan => scan::run(device, format),
        Command::Doctor => doctor::run(device, format),
        Command::Info => info::run(device, format),
        Command::Status => status::run(device, format),
        Command::Run(args) => run::run(args, device, format),
        Command::Stop => stop::run(device, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Load current in amps.
    #[arg(long)]
    pub amps: f64,

    /// Stop automatically when the battery falls below this voltage.
    #[arg(long, default_value_t = 0.0)]
    pub vstop: f64,

    /// Stop after this long (e.g. 90s, 1500ms). Default: run until Ctrl-C
    /// or until the analyzer ends the test.
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Time between printed readings.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
