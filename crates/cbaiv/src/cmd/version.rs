use cbaiv_protocol::{COMMAND_FRAME_SIZE, RESPONSE_FRAME_SIZE};
use cbaiv_transport::{USB_PRODUCT_ID, USB_VENDOR_ID};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cbaiv {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: cbaiv");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CBAIV_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CBAIV_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("usb_id: {USB_VENDOR_ID:04x}:{USB_PRODUCT_ID:04x}");
    println!("frames: command={COMMAND_FRAME_SIZE} response={RESPONSE_FRAME_SIZE}");
    println!(
        "features: device={}, sim={}, cli=true",
        cfg!(feature = "device"),
        cfg!(feature = "sim")
    );

    Ok(SUCCESS)
}
