use std::time::Instant;

use crate::cmd::DeviceArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_reading, OutputFormat, Reading};

pub fn run(device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let started = Instant::now();
    let registry = device.registry();
    let session = device.connect(&registry)?;

    // Unlike the getters, a failed query here is an error, not a zero reading.
    let frame = session
        .status()
        .map_err(|err| device_error("status query failed", err))?;

    let reading = Reading {
        serial: session.serial_number(),
        elapsed: started.elapsed().as_secs_f64(),
        status: frame.into(),
    };
    print_reading(&reading, format);
    Ok(SUCCESS)
}
