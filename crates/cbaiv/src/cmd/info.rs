use cbaiv_device::DeviceStatus;
use serde::Serialize;

use crate::cmd::DeviceArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct TimingInfo {
    response_timeout_ms: u128,
    write_timeout_ms: u128,
    keepalive_period_ms: u128,
}

#[derive(Serialize)]
struct InfoOutput {
    kind: &'static str,
    serial: u32,
    configured: bool,
    connected: bool,
    status: DeviceStatus,
    timing: TimingInfo,
}

pub fn run(device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = device.registry();
    let session = device.connect(&registry)?;
    let config = session.config();

    let out = InfoOutput {
        kind: "info",
        serial: session.serial_number(),
        configured: session.device_config().is_some(),
        connected: session.is_valid(),
        status: session.snapshot(),
        timing: TimingInfo {
            response_timeout_ms: config.response_timeout.as_millis(),
            write_timeout_ms: config.write_timeout.as_millis(),
            keepalive_period_ms: config.keepalive_period.as_millis(),
        },
    };

    print_info(&out, format);
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Analyzer Info:");
            if out.configured {
                println!("  Serial:           {}", out.serial);
            } else {
                println!("  Serial:           unknown (no config response)");
            }
            println!("  Voltage:          {:.3} V", out.status.voltage);
            println!(
                "  Load:             {:.3} A set, {:.2} A measured",
                out.status.set_current, out.status.measured_current
            );
            println!(
                "  Test running:     {}",
                if out.status.running { "yes" } else { "no" }
            );
            println!(
                "  Limits:           power-limited={} high-temp={}",
                out.status.power_limited, out.status.high_temp
            );
            println!(
                "  Keep-alive:       every {} ms, response timeout {} ms",
                out.timing.keepalive_period_ms, out.timing.response_timeout_ms
            );
        }
        OutputFormat::Raw => {
            println!("{}", out.serial);
        }
    }
}
