use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::TryLockError;

use cbaiv_protocol::{
    decode_status, encode_keepalive, encode_start, encode_stop, ConfigFrame, StatusFrame,
    MICRO_SCALE, STATUS_RESPONSE,
};
use cbaiv_transport::{Transport, TransportError};

use crate::cache::status_cache;
use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::exchange::{lock, shared, transact, SharedTransport};
use crate::handshake::request_config;
use crate::status::DeviceStatus;
use crate::watchdog::{Watchdog, WatchdogMonitor, WatchdogState};

/// Largest setpoint (amps or volts) that fits the 32-bit micro-unit field.
const MAX_SETPOINT: f64 = u32::MAX as f64 / MICRO_SCALE;

/// A connection to one analyzer.
///
/// Owns the transport, the configuration block read at open time, and at
/// most one watchdog (present exactly while a test is running).
///
/// Queries fail soft: if the device is unplugged, unpowered, or never
/// answered the handshake, the getters report an idle, unloaded device
/// rather than erroring.
pub struct DeviceSession {
    transport: SharedTransport,
    config: SessionConfig,
    device_config: Option<ConfigFrame>,
    watchdog: Option<Watchdog>,
    /// Transport validity as last seen while holding the lock.
    valid: AtomicBool,
    /// A stop frame went out after the last start.
    stop_sent: bool,
}

impl DeviceSession {
    /// Open a session on `transport` with default timing.
    pub fn open(transport: Box<dyn Transport>) -> Self {
        Self::open_with_config(transport, SessionConfig::default())
    }

    /// Open a session with explicit timing.
    ///
    /// Performs the config handshake. If it fails the session is still
    /// returned, unconfigured: [`serial_number`](Self::serial_number) reads 0.
    pub fn open_with_config(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        let valid = AtomicBool::new(transport.is_valid());
        let transport = shared(transport);

        let device_config = {
            let mut guard = lock(&transport);
            match request_config(&mut **guard, &config) {
                Ok(device_config) => Some(device_config),
                Err(err) => {
                    tracing::warn!(error = %err, "handshake failed, session unconfigured");
                    None
                }
            }
        };

        Self {
            transport,
            config,
            device_config,
            watchdog: None,
            valid,
            stop_sent: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Configuration block from the handshake, if it succeeded.
    pub fn device_config(&self) -> Option<&ConfigFrame> {
        self.device_config.as_ref()
    }

    /// Serial number from the handshake, or 0 if it never completed.
    pub fn serial_number(&self) -> u32 {
        self.device_config
            .as_ref()
            .map_or(0, ConfigFrame::serial_number)
    }

    /// Whether the transport handle is still open.
    ///
    /// Never waits for the transport: while a watchdog tick holds it, the
    /// answer from the last uncontended check is returned.
    pub fn is_valid(&self) -> bool {
        let valid = match self.transport.try_lock() {
            Ok(transport) => transport.is_valid(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_valid(),
            Err(TryLockError::WouldBlock) => return self.valid.load(Ordering::Acquire),
        };
        self.valid.store(valid, Ordering::Release);
        valid
    }

    /// Start a constant-current test drawing `amps`, auto-stopping when the
    /// battery falls below `vstop` volts (`0.0` disables the threshold).
    ///
    /// Any running test is stopped first (watchdog joined, stop frame sent).
    /// The start frame is sent and its status response seeds a fresh cache;
    /// then a new watchdog is spawned. A missing or malformed response still
    /// spawns the watchdog with an empty cache. If the transport fails, a
    /// stop frame is attempted before the error is returned.
    /// Returns once the watchdog exists, not once it has ticked.
    pub fn start(&mut self, amps: f64, vstop: f64) -> Result<()> {
        validate_setpoint("amps", amps)?;
        validate_setpoint("vstop", vstop)?;

        self.stop();

        if !self.is_valid() {
            return Err(DeviceError::Transport(TransportError::Closed));
        }

        let (publisher, cache) = status_cache();
        let frame = encode_start(amps, vstop);
        self.stop_sent = false;
        let seed = {
            let mut transport = lock(&self.transport);
            transact(&mut **transport, frame.as_bytes(), STATUS_RESPONSE, &self.config)
        };
        match seed.map(|bytes| bytes.map(|b| decode_status(&b))) {
            Ok(Some(Ok(status))) => publisher.publish(status),
            Ok(Some(Err(err))) => {
                tracing::warn!(amps, vstop, error = %err, "bad status response to start command");
            }
            Ok(None) => tracing::warn!(amps, vstop, "no status response to start command"),
            Err(err) => {
                tracing::warn!(amps, vstop, error = %err, "start command failed");
                self.stop();
                return Err(err);
            }
        }

        let watchdog = Watchdog::spawn(
            SharedTransport::clone(&self.transport),
            publisher,
            cache,
            self.config,
        );
        match watchdog {
            Ok(watchdog) => self.watchdog = Some(watchdog),
            Err(err) => {
                tracing::warn!(error = %err, "watchdog spawn failed, stopping test");
                self.stop();
                return Err(err);
            }
        }

        tracing::info!(amps, vstop, serial = self.serial_number(), "test started");
        Ok(())
    }

    /// Stop the running test.
    ///
    /// Joins the watchdog if there is one, then sends the stop frame whether
    /// or not the watchdog's last tick was answered. Safe to call any number
    /// of times; with no test running it still sends the stop frame.
    pub fn stop(&mut self) {
        let was_running = self.stop_watchdog();

        let mut transport = lock(&self.transport);
        let valid = transport.is_valid();
        self.valid.store(valid, Ordering::Release);
        if !valid {
            return;
        }

        self.stop_sent = true;
        match transact(
            &mut **transport,
            encode_stop().as_bytes(),
            STATUS_RESPONSE,
            &self.config,
        ) {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!("no status response to stop command"),
            Err(err) => tracing::warn!(error = %err, "stop command failed"),
        }

        if was_running {
            tracing::info!(serial = self.serial_number(), "test stopped");
        }
    }

    /// Join the watchdog, if any. Returns whether one was running.
    fn stop_watchdog(&mut self) -> bool {
        match self.watchdog.take() {
            Some(mut watchdog) => {
                watchdog.stop();
                true
            }
            None => false,
        }
    }

    /// Latest status.
    ///
    /// While a test runs this copies the watchdog's cached frame without
    /// touching the transport. Otherwise it sends a keep-alive and waits for
    /// the response.
    pub fn status(&self) -> Result<StatusFrame> {
        if let Some(watchdog) = &self.watchdog {
            return watchdog
                .cache()
                .latest()
                .ok_or(DeviceError::CommunicationTimeout(self.config.response_timeout));
        }

        let response = {
            let mut transport = lock(&self.transport);
            transact(
                &mut **transport,
                encode_keepalive().as_bytes(),
                STATUS_RESPONSE,
                &self.config,
            )?
        };
        let bytes =
            response.ok_or(DeviceError::CommunicationTimeout(self.config.response_timeout))?;
        Ok(decode_status(&bytes)?)
    }

    /// All readings from a single status query; offline reads as default.
    pub fn snapshot(&self) -> DeviceStatus {
        self.status().map(DeviceStatus::from).unwrap_or_default()
    }

    /// Battery voltage in volts (0.0 if the device is not answering).
    pub fn voltage(&self) -> f64 {
        self.status().map_or(0.0, |s| s.voltage())
    }

    /// Target current in amps (0.0 unless a test is running).
    pub fn set_current(&self) -> f64 {
        self.status().map_or(0.0, |s| s.set_current())
    }

    /// Current the unit reports drawing, in amps. Coarse: use it to spot
    /// blown fuses or power limiting, not for measurement.
    pub fn measured_current(&self) -> f64 {
        self.status().map_or(0.0, |s| s.measured_current())
    }

    pub fn is_running(&self) -> bool {
        self.status().is_ok_and(|s| s.is_running())
    }

    /// Whether the unit is holding the load below target to stay inside its
    /// power or current limits.
    pub fn is_power_limited(&self) -> bool {
        self.status().is_ok_and(|s| s.is_power_limited())
    }

    /// Whether the test was aborted because the unit overheated.
    pub fn is_high_temp(&self) -> bool {
        self.status().is_ok_and(|s| s.is_high_temp())
    }

    /// State of the current watchdog, `Idle` when no test is running.
    pub fn watchdog_state(&self) -> WatchdogState {
        self.watchdog
            .as_ref()
            .map_or(WatchdogState::Idle, |w| w.monitor().state())
    }

    /// Observer for the current watchdog, if a test is running.
    pub fn watchdog_monitor(&self) -> Option<WatchdogMonitor> {
        self.watchdog.as_ref().map(|w| w.monitor().clone())
    }

    /// Stop any test and release the transport. Idempotent.
    ///
    /// The stop frame is skipped if one was already sent since the last
    /// start.
    pub fn close(&mut self) {
        if self.watchdog.is_some() || !self.stop_sent {
            self.stop();
        }
        let mut transport = lock(&self.transport);
        if transport.is_valid() {
            tracing::debug!(serial = self.serial_number(), "closing session");
        }
        transport.close();
        self.valid.store(false, Ordering::Release);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("serial_number", &self.serial_number())
            .field("config", &self.config)
            .field("watchdog", &self.watchdog_state())
            .finish()
    }
}

fn validate_setpoint(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 || value > MAX_SETPOINT {
        return Err(DeviceError::InvalidSetpoint { name, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use super::*;
    use crate::sim::SimDevice;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            response_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(100),
            keepalive_period: Duration::from_millis(30),
        }
    }

    fn open(device: &SimDevice) -> DeviceSession {
        DeviceSession::open_with_config(Box::new(device.connect()), fast_config())
    }

    #[test]
    fn open_reads_serial_number() {
        let device = SimDevice::new(1);
        let session = open(&device);
        assert_eq!(session.serial_number(), 1);
        assert!(session.device_config().is_some());
        assert!(session.is_valid());
    }

    #[test]
    fn failed_handshake_leaves_session_unconfigured() {
        let device = SimDevice::new(1234);
        device.set_config_responsive(false);
        let session = open(&device);

        assert_eq!(session.serial_number(), 0);
        assert!(session.device_config().is_none());
        // Still usable for status queries.
        assert!(session.status().is_ok());
    }

    #[test]
    fn idle_status_is_a_direct_transaction() {
        let device = SimDevice::new(1);
        device.set_battery_voltage(12.5);
        let session = open(&device);

        let before = device.keepalive_count();
        let status = session.status().unwrap();
        assert_eq!(device.keepalive_count(), before + 1);
        assert!(!status.is_running());
        assert_eq!(status.set_current(), 0.0);
        assert_eq!(status.voltage(), 12.5);
    }

    #[test]
    fn idle_status_times_out_when_silent() {
        let device = SimDevice::new(1);
        let session = open(&device);
        device.set_responsive(false);

        let err = session.status().unwrap_err();
        assert!(matches!(err, DeviceError::CommunicationTimeout(_)));
        assert_eq!(session.voltage(), 0.0);
        assert!(!session.is_running());
        assert_eq!(session.snapshot(), DeviceStatus::default());
    }

    #[test]
    fn start_runs_one_watchdog() {
        let device = SimDevice::new(1);
        let mut session = open(&device);

        session.start(0.5, 0.0).unwrap();
        assert_eq!(session.watchdog_state(), WatchdogState::Running);
        assert!(session.is_running());
        assert_eq!(session.set_current(), 0.5);
        assert_eq!(device.last_load_micro(), 500_000);

        session.stop();
        assert_eq!(session.watchdog_state(), WatchdogState::Idle);
        assert!(!device.is_running());
    }

    #[test]
    fn restart_stops_previous_watchdog_first() {
        let device = SimDevice::new(1);
        let mut session = open(&device);

        session.start(0.2, 0.0).unwrap();
        let first = session.watchdog_monitor().unwrap();
        let stops = device.stop_count();

        session.start(0.3, 0.0).unwrap();
        let second = session.watchdog_monitor().unwrap();

        assert_eq!(device.stop_count(), stops + 1);
        assert_eq!(first.state(), WatchdogState::Exited);
        assert_eq!(second.state(), WatchdogState::Running);
        assert_eq!(session.set_current(), 0.3);

        session.stop();
        assert_eq!(second.state(), WatchdogState::Exited);
    }

    #[test]
    fn stop_is_idempotent_and_always_sends_stop_frame() {
        let device = SimDevice::new(1);
        let mut session = open(&device);

        session.stop();
        session.stop();
        assert_eq!(device.stop_count(), 2);
        assert_eq!(session.watchdog_state(), WatchdogState::Idle);

        // Start stops first, so the device sees one more stop frame here.
        session.start(1.0, 0.0).unwrap();
        assert_eq!(device.stop_count(), 3);
        session.stop();
        session.stop();
        assert_eq!(device.stop_count(), 5);
    }

    #[test]
    fn malformed_start_response_still_spawns_watchdog() {
        let device = SimDevice::new(1);
        let mut session = open(&device);

        // The stop sent ahead of the start reads the first short frame.
        let short = Bytes::from_static(&[STATUS_RESPONSE, 0x02, 0x00]);
        device.inject_frame(short.clone());
        device.inject_frame(short);
        session.start(1.0, 0.0).unwrap();

        assert!(device.is_running());
        assert_eq!(session.watchdog_state(), WatchdogState::Running);

        let monitor = session.watchdog_monitor().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(session.is_running());
        assert!(monitor.ticks() > 0);

        session.stop();
        assert!(!device.is_running());
    }

    #[test]
    fn is_valid_does_not_wait_for_a_busy_transport() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        assert!(session.is_valid());

        {
            let _busy = lock(&session.transport);
            assert!(session.is_valid());
        }

        session.close();
        let _busy = lock(&session.transport);
        assert!(!session.is_valid());
    }

    #[test]
    fn close_after_stop_sends_one_stop_frame() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        session.start(1.0, 0.0).unwrap();
        let stops = device.stop_count();

        session.stop();
        session.close();
        assert_eq!(device.stop_count(), stops + 1);
    }

    #[test]
    fn close_on_fresh_session_sends_stop_frame() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        session.close();
        assert_eq!(device.stop_count(), 1);
    }

    #[test]
    fn stop_sends_frame_even_after_missed_ticks() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        session.start(1.0, 0.0).unwrap();
        let monitor = session.watchdog_monitor().unwrap();

        device.set_responsive(false);
        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.missed() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(monitor.missed() > 0);

        let stops = device.stop_count();
        session.stop();
        assert_eq!(device.stop_count(), stops + 1);
        assert!(!device.is_running());
    }

    #[test]
    fn status_during_test_reads_cache_only() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        session.start(2.0, 0.0).unwrap();
        let monitor = session.watchdog_monitor().unwrap();

        // Freeze the device: the cache keeps serving the last reading.
        device.set_responsive(false);
        thread::sleep(Duration::from_millis(150));
        let ticks = monitor.ticks();
        for _ in 0..20 {
            assert!(session.status().unwrap().is_running());
        }
        assert!(monitor.ticks() <= ticks + 2);

        session.stop();
    }

    #[test]
    fn watchdog_keeps_device_alive() {
        let device = SimDevice::new(1);
        device.set_keepalive_window(Duration::from_millis(200));
        let mut session = open(&device);

        session.start(1.0, 0.0).unwrap();
        thread::sleep(Duration::from_millis(600));
        assert!(device.is_running());
        assert!(session.is_running());

        session.stop();
    }

    #[test]
    fn fresh_start_begins_with_empty_cache() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        session.start(1.0, 0.0).unwrap();
        session.stop();

        device.set_responsive(false);
        session.start(1.0, 0.0).unwrap();
        // The start response was lost and the watchdog has not heard anything.
        assert!(matches!(
            session.status(),
            Err(DeviceError::CommunicationTimeout(_))
        ));
        session.stop();
    }

    #[test]
    fn vstop_sets_flag_and_threshold() {
        let device = SimDevice::new(1);
        let mut session = open(&device);

        session.start(1.0, 10.5).unwrap();
        assert_eq!(device.last_vstop_micro(), Some(10_500_000));
        session.stop();

        session.start(1.0, 0.0).unwrap();
        assert_eq!(device.last_vstop_micro(), None);
        session.stop();
    }

    #[test]
    fn limit_flags_surface_through_getters() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        device.set_power_limit_watts(5.0);
        device.set_battery_voltage(12.0);

        session.start(2.0, 0.0).unwrap();
        assert!(session.is_power_limited());
        assert!(!session.is_high_temp());
        session.stop();

        device.set_high_temp(true);
        let status = session.status().unwrap();
        assert!(status.is_high_temp());
        assert!(!status.is_running());
    }

    #[test]
    fn rejects_unrepresentable_setpoints() {
        let device = SimDevice::new(1);
        let mut session = open(&device);

        for (amps, vstop) in [(-1.0, 0.0), (f64::NAN, 0.0), (1.0, -0.5), (5000.0, 0.0)] {
            let err = session.start(amps, vstop).unwrap_err();
            assert!(matches!(err, DeviceError::InvalidSetpoint { .. }));
        }
        assert_eq!(session.watchdog_state(), WatchdogState::Idle);
    }

    #[test]
    fn close_stops_test_and_invalidates() {
        let device = SimDevice::new(1);
        let mut session = open(&device);
        session.start(1.0, 0.0).unwrap();

        session.close();
        assert!(!session.is_valid());
        assert!(!device.is_running());
        assert_eq!(device.open_handles(), 0);

        session.close();
        assert!(session.start(1.0, 0.0).is_err());
        assert_eq!(session.voltage(), 0.0);
    }

    #[test]
    fn drop_releases_device() {
        let device = SimDevice::new(1);
        {
            let mut session = open(&device);
            session.start(1.0, 0.0).unwrap();
            assert_eq!(device.open_handles(), 1);
        }
        assert_eq!(device.open_handles(), 0);
        assert!(!device.is_running());
    }
}
