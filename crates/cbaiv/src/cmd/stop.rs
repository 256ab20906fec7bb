use serde::Serialize;

use crate::cmd::DeviceArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct StopOutput {
    kind: &'static str,
    serial: u32,
    running: bool,
}

pub fn run(device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = device.registry();
    let mut session = device.connect(&registry)?;

    session.stop();
    let out = StopOutput {
        kind: "stop",
        serial: session.serial_number(),
        running: session.is_running(),
    };
    session.close();

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let state = if out.running { "still running" } else { "stopped" };
            println!("CBA IV serial {}: {state}", out.serial);
        }
        OutputFormat::Raw => println!("{}", out.serial),
    }
    Ok(SUCCESS)
}
