use serde::Serialize;

use crate::cmd::DeviceArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    kind: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(device: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = device.registry();

    let mut checks = vec![backends_check(&registry), usb_library_check(&registry)];
    // Device probing needs a working USB stack.
    if matches!(checks[1].status, CheckStatus::Pass) {
        checks.push(devices_check(&registry));
    } else {
        checks.push(CheckResult::new(
            "devices",
            CheckStatus::Skip,
            "USB stack unavailable",
        ));
    }
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let output = DoctorOutput {
        kind: "doctor",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn backends_check(registry: &cbaiv_transport::BackendRegistry) -> CheckResult {
    let names: Vec<String> = registry
        .backends()
        .map(|b| format!("{} ({})", b.name(), b.kind()))
        .collect();
    if names.is_empty() {
        CheckResult::new(
            "backends",
            CheckStatus::Fail,
            "no USB backend registered (use --simulate N for a simulated analyzer)",
        )
    } else {
        CheckResult::new("backends", CheckStatus::Pass, names.join(", "))
    }
}

fn usb_library_check(registry: &cbaiv_transport::BackendRegistry) -> CheckResult {
    match registry.test() {
        None => CheckResult::new("usb_library", CheckStatus::Pass, "USB stack usable"),
        Some(diag) => CheckResult::new("usb_library", CheckStatus::Fail, diag),
    }
}

fn devices_check(registry: &cbaiv_transport::BackendRegistry) -> CheckResult {
    match cbaiv_device::scan(registry) {
        Ok(serials) if serials.is_empty() => CheckResult::new(
            "devices",
            CheckStatus::Fail,
            cbaiv_device::NO_DEVICES_FOUND,
        ),
        Ok(serials) => CheckResult::new(
            "devices",
            CheckStatus::Pass,
            format!("{} analyzer(s) attached", serials.len()),
        ),
        Err(err) => CheckResult::new("devices", CheckStatus::Fail, err.to_string()),
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "device") {
        features.push("device");
    }
    if cfg!(feature = "sim") {
        features.push("sim");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("cbaiv doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            kind: "doctor",
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn empty_registry_fails_backend_check() {
        let registry = cbaiv_transport::BackendRegistry::new();
        assert!(matches!(backends_check(&registry).status, CheckStatus::Fail));
        assert!(matches!(usb_library_check(&registry).status, CheckStatus::Fail));
    }

    #[test]
    fn simulated_registry_passes() {
        let args = DeviceArgs {
            simulate: Some(2),
            ..DeviceArgs::default()
        };
        let registry = args.registry();
        assert!(matches!(backends_check(&registry).status, CheckStatus::Pass));
        let devices = devices_check(&registry);
        assert!(matches!(devices.status, CheckStatus::Pass));
        assert!(devices.detail.starts_with('2'));
    }

    #[test]
    fn simulated_registry_without_devices_fails() {
        let args = DeviceArgs {
            simulate: Some(0),
            ..DeviceArgs::default()
        };
        let devices = devices_check(&args.registry());
        assert!(matches!(devices.status, CheckStatus::Fail));
        assert_eq!(devices.detail, cbaiv_device::NO_DEVICES_FOUND);
    }
}
