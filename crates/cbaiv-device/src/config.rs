use std::time::Duration;

/// Default bound on every blocking wait for a device response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default bound on waiting for the OUT endpoint to accept a frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default watchdog tick period. Comfortably inside the device's own
/// keep-alive window.
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_millis(750);

/// Timing configuration for a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Timeout for each wait on a config or status response.
    pub response_timeout: Duration,
    /// Timeout handed to the transport for each frame write.
    pub write_timeout: Duration,
    /// Interval between watchdog keep-alive frames while a test runs.
    pub keepalive_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            keepalive_period: DEFAULT_KEEPALIVE_PERIOD,
        }
    }
}

impl SessionConfig {
    /// Longest time [`DeviceSession::stop`] can block on the watchdog:
    /// one tick period plus one response timeout.
    ///
    /// [`DeviceSession::stop`]: crate::DeviceSession::stop
    pub fn worst_case_stop_latency(&self) -> Duration {
        self.keepalive_period + self.response_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_timing() {
        let config = SessionConfig::default();
        assert_eq!(config.response_timeout, Duration::from_secs(1));
        assert_eq!(config.keepalive_period, Duration::from_millis(750));
        assert_eq!(
            config.worst_case_stop_latency(),
            Duration::from_millis(1750)
        );
    }
}
