//! Fixed-layout frame codec for the CBA IV battery analyzer.
//!
//! Every exchange with the device is a single frame whose first byte is an
//! opcode:
//! - 16-byte command frames from host to device
//! - 65-byte response frames from device to host
//!
//! Currents and voltages travel as little-endian `u32` micro-units
//! (value × 1,000,000). This crate is pure: no I/O, no clocks.

pub mod codec;
pub mod error;
pub mod opcode;

pub use codec::{
    decode_config, decode_status, encode_config_request, encode_keepalive, encode_start,
    encode_stop, flags, from_micro, to_micro, CommandFrame, ConfigFrame, StatusFrame,
    COMMAND_FRAME_SIZE, MICRO_SCALE, RESPONSE_FRAME_SIZE,
};
pub use error::{FrameKind, ProtocolError, Result};
pub use opcode::{CONFIG_REQUEST, CONFIG_RESPONSE, SET_STATUS, STATUS_RESPONSE};
