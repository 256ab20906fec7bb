//! Frame opcodes.
//!
//! Upper-case letters are host commands; the matching lower-case letter is
//! the device's response.

/// Request the device configuration block (`'C'`). Sent as a single byte.
pub const CONFIG_REQUEST: u8 = 0x43;

/// Configuration block response (`'c'`).
pub const CONFIG_RESPONSE: u8 = 0x63;

/// Set or maintain the load state (`'S'`).
pub const SET_STATUS: u8 = 0x53;

/// Status response (`'s'`).
pub const STATUS_RESPONSE: u8 = 0x73;

/// Returns a human-readable name for an opcode.
pub fn opcode_name(op: u8) -> &'static str {
    match op {
        CONFIG_REQUEST => "CONFIG_REQUEST",
        CONFIG_RESPONSE => "CONFIG_RESPONSE",
        SET_STATUS => "SET_STATUS",
        STATUS_RESPONSE => "STATUS_RESPONSE",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_are_lowercase_commands() {
        assert_eq!(CONFIG_REQUEST | 0x20, CONFIG_RESPONSE);
        assert_eq!(SET_STATUS | 0x20, STATUS_RESPONSE);
    }

    #[test]
    fn unknown_opcode() {
        assert_eq!(opcode_name(0x00), "UNKNOWN");
        assert_eq!(opcode_name(STATUS_RESPONSE), "STATUS_RESPONSE");
    }
}
