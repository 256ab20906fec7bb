use cbaiv_device::{discover_with_config, DiscoveredDevice};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::cmd::DeviceArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct DeviceEntry {
    id: String,
    backend: &'static str,
    serial: u32,
}

#[derive(Serialize)]
struct ScanOutput {
    kind: &'static str,
    count: usize,
    devices: Vec<DeviceEntry>,
}

pub fn run(device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = device.registry();
    let found = discover_with_config(&registry, &device.session_config())
        .map_err(|err| device_error("scan failed", err))?;

    let out = ScanOutput {
        kind: "scan",
        count: found.len(),
        devices: found.iter().map(entry).collect(),
    };
    print_scan(&out, format);
    Ok(SUCCESS)
}

fn entry(device: &DiscoveredDevice) -> DeviceEntry {
    DeviceEntry {
        id: device.id.to_string(),
        backend: device.id.backend(),
        serial: device.serial,
    }
}

fn print_scan(out: &ScanOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERIAL", "DEVICE", "BACKEND"]);
            for d in &out.devices {
                table.add_row(vec![d.serial.to_string(), d.id.clone(), d.backend.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if out.devices.is_empty() {
                println!("No analyzers found");
            }
            for d in &out.devices {
                println!("CBA IV serial {} ({})", d.serial, d.id);
            }
        }
        OutputFormat::Raw => {
            for d in &out.devices {
                println!("{}", d.serial);
            }
        }
    }
}
