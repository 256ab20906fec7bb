use cbaiv_protocol::{decode_config, encode_config_request, ConfigFrame, CONFIG_RESPONSE};
use cbaiv_transport::{Transport, TransportError};

use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::exchange::transact;

/// Request the device's configuration block.
///
/// Sends the single-byte config request and waits up to
/// `config.response_timeout` for the matching response.
pub fn request_config(transport: &mut dyn Transport, config: &SessionConfig) -> Result<ConfigFrame> {
    if !transport.is_valid() {
        return Err(DeviceError::Transport(TransportError::Closed));
    }

    let frame = transact(transport, &encode_config_request(), CONFIG_RESPONSE, config)?
        .ok_or(DeviceError::HandshakeTimeout(config.response_timeout))?;
    let device_config = decode_config(&frame)?;

    tracing::debug!(serial = device_config.serial_number(), "handshake complete");
    Ok(device_config)
}
