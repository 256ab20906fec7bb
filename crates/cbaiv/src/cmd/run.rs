use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cbaiv_device::DeviceSession;
use serde::Serialize;

use crate::cmd::{DeviceArgs, RunArgs};
use crate::exit::{device_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{pretty_line, print_json, status_table, OutputFormat, Reading};

/// Granularity of the Ctrl-C check while waiting between readings.
const POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum EndReason {
    Duration,
    Interrupted,
    DeviceStopped,
}

#[derive(Serialize)]
struct RunSummary {
    kind: &'static str,
    serial: u32,
    amps: f64,
    vstop: f64,
    readings: usize,
    elapsed: f64,
    ended_by: EndReason,
}

pub fn run(args: RunArgs, device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let registry = device.registry();
    let mut session = device.connect(&registry)?;

    session
        .start(args.amps, args.vstop)
        .map_err(|err| device_error("start failed", err))?;
    tracing::info!(
        serial = session.serial_number(),
        amps = args.amps,
        vstop = args.vstop,
        "discharge test started"
    );

    let started = Instant::now();
    let mut readings = Vec::new();
    let ended_by = monitor(&session, &args, &running, started, |reading| {
        emit(reading, format);
        readings.push(reading.clone());
    });

    session.stop();
    tracing::info!(serial = session.serial_number(), ?ended_by, "discharge test ended");

    let summary = RunSummary {
        kind: "run",
        serial: session.serial_number(),
        amps: args.amps,
        vstop: args.vstop,
        readings: readings.len(),
        elapsed: started.elapsed().as_secs_f64(),
        ended_by,
    };
    session.close();

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            println!("{}", status_table(&readings));
            println!("ended by: {ended_by:?} after {:.1}s", summary.elapsed);
        }
        OutputFormat::Pretty => {
            println!("ended by: {ended_by:?} after {:.1}s", summary.elapsed);
        }
        OutputFormat::Raw => {}
    }
    Ok(SUCCESS)
}

/// Sample readings every `args.interval` until the duration elapses, the
/// user interrupts, or the analyzer ends the test on its own.
fn monitor(
    session: &DeviceSession,
    args: &RunArgs,
    running: &AtomicBool,
    started: Instant,
    mut on_reading: impl FnMut(&Reading),
) -> EndReason {
    let deadline = args.duration.map(|d| started + d);

    loop {
        let reading = Reading {
            serial: session.serial_number(),
            elapsed: started.elapsed().as_secs_f64(),
            status: session.snapshot(),
        };
        on_reading(&reading);

        if !reading.status.running {
            if reading.status.high_temp {
                tracing::warn!("analyzer aborted the test: over temperature");
            } else {
                tracing::warn!(voltage = reading.status.voltage, "analyzer ended the test");
            }
            return EndReason::DeviceStopped;
        }

        let next = Instant::now() + args.interval;
        let wake = deadline.map_or(next, |d| d.min(next));
        while Instant::now() < wake {
            if !running.load(Ordering::SeqCst) {
                return EndReason::Interrupted;
            }
            thread::sleep(POLL_SLICE.min(wake.saturating_duration_since(Instant::now())));
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return EndReason::Duration;
        }
    }
}

fn emit(reading: &Reading, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(reading),
        OutputFormat::Pretty => println!("{}", pretty_line(reading)),
        OutputFormat::Raw => println!("{:.3} {:.6}", reading.elapsed, reading.status.voltage),
        // Collected and printed as one table at the end.
        OutputFormat::Table => {}
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
