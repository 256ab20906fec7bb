//! In-process analyzer model.
//!
//! [`SimBackend`] plugs into a [`BackendRegistry`](cbaiv_transport::BackendRegistry)
//! like a real USB stack; each [`SimDevice`] answers config requests and
//! set-status commands the way the hardware does, including its own
//! keep-alive timeout, the vstop abort and power/current limiting.
//!
//! Fault injection (`set_responsive`, `inject_frame`, ...) lets tests drive
//! the timeout and malformed-frame paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use cbaiv_protocol::{
    flags, to_micro, COMMAND_FRAME_SIZE, CONFIG_REQUEST, CONFIG_RESPONSE, RESPONSE_FRAME_SIZE,
    SET_STATUS, STATUS_RESPONSE,
};
use cbaiv_transport::{Backend, BackendKind, DeviceId, Result, Transport, TransportError};

const BACKEND_NAME: &str = "sim";

/// How long the hardware keeps a test running without hearing from the host.
pub const DEFAULT_KEEPALIVE_WINDOW: Duration = Duration::from_secs(3);

const DEFAULT_BATTERY_VOLTAGE: f64 = 12.6;
const DEFAULT_INTERNAL_RESISTANCE: f64 = 0.02;
const DEFAULT_MAX_WATTS: f64 = 150.0;
const DEFAULT_MAX_AMPS: f64 = 40.0;

/// A backend serving a fixed set of simulated analyzers.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    devices: Vec<SimDevice>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: SimDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// One device per serial, in order.
    pub fn with_serials(serials: &[u32]) -> Self {
        Self {
            devices: serials.iter().copied().map(SimDevice::new).collect(),
        }
    }

    /// Handle to the device at `index`, for inspection and fault injection.
    pub fn device(&self, index: usize) -> Option<&SimDevice> {
        self.devices.get(index)
    }
}

impl Backend for SimBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn test(&self) -> Option<String> {
        None
    }

    fn device_count(&self) -> Result<usize> {
        Ok(self.devices.len())
    }

    fn open(&self, index: usize) -> Result<Box<dyn Transport>> {
        let device = self
            .devices
            .get(index)
            .ok_or_else(|| TransportError::NotFound(DeviceId::new(BACKEND_NAME, index)))?;
        Ok(Box::new(device.connect()))
    }
}

#[derive(Debug)]
struct SimState {
    serial: u32,
    responsive: bool,
    config_responsive: bool,
    injected: VecDeque<Bytes>,
    outboxes: HashMap<u64, VecDeque<Bytes>>,
    next_handle: u64,

    running: bool,
    load_micro: u32,
    vstop_micro: Option<u32>,
    high_temp: bool,
    keepalive_window: Duration,
    last_heard: Instant,

    battery_voltage: f64,
    internal_resistance: f64,
    max_watts: f64,
    max_amps: f64,

    keepalives: u64,
    stops: u64,
}

impl SimState {
    fn new(serial: u32) -> Self {
        Self {
            serial,
            responsive: true,
            config_responsive: true,
            injected: VecDeque::new(),
            outboxes: HashMap::new(),
            next_handle: 0,
            running: false,
            load_micro: 0,
            vstop_micro: None,
            high_temp: false,
            keepalive_window: DEFAULT_KEEPALIVE_WINDOW,
            last_heard: Instant::now(),
            battery_voltage: DEFAULT_BATTERY_VOLTAGE,
            internal_resistance: DEFAULT_INTERNAL_RESISTANCE,
            max_watts: DEFAULT_MAX_WATTS,
            max_amps: DEFAULT_MAX_AMPS,
            keepalives: 0,
            stops: 0,
        }
    }

    /// Drop the load if the host has been silent for too long.
    fn expire(&mut self) {
        if self.running && self.last_heard.elapsed() > self.keepalive_window {
            tracing::debug!(serial = self.serial, "sim keep-alive window expired");
            self.running = false;
        }
    }

    /// Process one command frame and return the reply, if any.
    fn handle(&mut self, frame: &[u8]) -> Option<Bytes> {
        self.expire();
        match frame.first() {
            Some(&CONFIG_REQUEST) => {
                (self.config_responsive && self.responsive).then(|| self.config_frame())
            }
            Some(&SET_STATUS) if frame.len() >= COMMAND_FRAME_SIZE => {
                self.last_heard = Instant::now();
                self.apply_set_status(frame);
                let reply = self.status_frame();
                self.responsive.then_some(reply)
            }
            _ => None,
        }
    }

    fn has_reply(&self, handle: u64) -> bool {
        !self.injected.is_empty() || self.outboxes.get(&handle).is_some_and(|q| !q.is_empty())
    }

    /// Injected frames are seen by whichever handle reads first.
    fn next_reply(&mut self, handle: u64) -> Option<Bytes> {
        self.injected
            .pop_front()
            .or_else(|| self.outboxes.get_mut(&handle)?.pop_front())
    }

    fn apply_set_status(&mut self, frame: &[u8]) {
        let flag_bits = frame[1];
        let load = u32::from_le_bytes([frame[3], frame[4], frame[5], frame[6]]);
        let vstop = u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]);

        if flag_bits & flags::RUNNING != 0 {
            self.running = !self.high_temp;
            self.load_micro = load;
            self.vstop_micro = (flag_bits & flags::VSTOP_ENABLED != 0).then_some(vstop);
        } else if flag_bits & flags::STOP != 0 {
            self.stops += 1;
            self.running = false;
            self.load_micro = 0;
            self.vstop_micro = None;
        } else {
            self.keepalives += 1;
        }
    }

    /// Current actually drawn: the target clamped to the unit's limits.
    fn drawn_amps(&self) -> f64 {
        if !self.running {
            return 0.0;
        }
        let target = f64::from(self.load_micro) / 1_000_000.0;
        let by_power = self.max_watts / self.battery_voltage.max(f64::EPSILON);
        target.min(self.max_amps).min(by_power)
    }

    fn status_frame(&mut self) -> Bytes {
        if self.high_temp {
            self.running = false;
        }

        let mut drawn = self.drawn_amps();
        let mut voltage = self.battery_voltage - drawn * self.internal_resistance;
        if let Some(vstop) = self.vstop_micro {
            if self.running && to_micro(voltage) < vstop {
                tracing::debug!(serial = self.serial, voltage, "sim vstop reached");
                self.running = false;
                drawn = 0.0;
                voltage = self.battery_voltage;
            }
        }

        let target = if self.running { self.load_micro } else { 0 };
        let mut flag_bits = 0;
        if self.running {
            flag_bits |= flags::RUNNING;
            if to_micro(drawn) < target {
                flag_bits |= flags::POWER_LIMITED;
            }
        }
        if self.high_temp {
            flag_bits |= flags::HIGH_TEMP;
        }

        let mut buf = BytesMut::with_capacity(RESPONSE_FRAME_SIZE);
        buf.put_u8(STATUS_RESPONSE);
        buf.put_u8(flag_bits);
        buf.put_u8(0);
        buf.put_u32_le(target);
        buf.put_bytes(0, 9);
        buf.put_u32_le(to_micro(drawn));
        buf.put_u32_le(to_micro(voltage));
        buf.resize(RESPONSE_FRAME_SIZE, 0);
        buf.freeze()
    }

    fn config_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_FRAME_SIZE);
        buf.put_u8(CONFIG_RESPONSE);
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.serial);
        buf.resize(RESPONSE_FRAME_SIZE, 0);
        buf.freeze()
    }
}

#[derive(Debug)]
struct SimInner {
    state: Mutex<SimState>,
    replies: Condvar,
}

/// One simulated analyzer. Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimDevice {
    inner: Arc<SimInner>,
}

impl SimDevice {
    pub fn new(serial: u32) -> Self {
        Self {
            inner: Arc::new(SimInner {
                state: Mutex::new(SimState::new(serial)),
                replies: Condvar::new(),
            }),
        }
    }

    /// Open a new handle to this device. Each handle receives only the
    /// replies to its own commands.
    pub fn connect(&self) -> SimTransport {
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.outboxes.insert(handle, VecDeque::new());
        SimTransport {
            device: self.clone(),
            handle,
            open: true,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn serial(&self) -> u32 {
        self.state().serial
    }

    /// When `false`, commands still take effect but no response is sent.
    pub fn set_responsive(&self, responsive: bool) {
        self.state().responsive = responsive;
    }

    /// When `false`, config requests go unanswered.
    pub fn set_config_responsive(&self, responsive: bool) {
        self.state().config_responsive = responsive;
    }

    /// Queue a raw frame for the host to read next.
    pub fn inject_frame(&self, frame: Bytes) {
        self.state().injected.push_back(frame);
        self.inner.replies.notify_all();
    }

    /// Over-temperature: aborts any test and raises the HIGH_TEMP flag.
    pub fn set_high_temp(&self, high_temp: bool) {
        let mut state = self.state();
        state.high_temp = high_temp;
        if high_temp {
            state.running = false;
        }
    }

    pub fn set_battery_voltage(&self, volts: f64) {
        self.state().battery_voltage = volts;
    }

    pub fn set_internal_resistance(&self, ohms: f64) {
        self.state().internal_resistance = ohms;
    }

    pub fn set_power_limit_watts(&self, watts: f64) {
        self.state().max_watts = watts;
    }

    pub fn set_current_limit_amps(&self, amps: f64) {
        self.state().max_amps = amps;
    }

    /// How long a test survives without host traffic.
    pub fn set_keepalive_window(&self, window: Duration) {
        self.state().keepalive_window = window;
    }

    /// Whether the device is drawing current right now.
    pub fn is_running(&self) -> bool {
        let mut state = self.state();
        state.expire();
        state.running
    }

    /// Keep-alive frames received.
    pub fn keepalive_count(&self) -> u64 {
        self.state().keepalives
    }

    /// Stop frames received.
    pub fn stop_count(&self) -> u64 {
        self.state().stops
    }

    /// Load setpoint from the last start command, in micro-amps.
    pub fn last_load_micro(&self) -> u32 {
        self.state().load_micro
    }

    /// Stop threshold from the last start command, if it enabled one.
    pub fn last_vstop_micro(&self) -> Option<u32> {
        self.state().vstop_micro
    }

    /// Handles opened with [`connect`](Self::connect) and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.state().outboxes.len()
    }
}

/// A handle to a [`SimDevice`].
#[derive(Debug)]
pub struct SimTransport {
    device: SimDevice,
    handle: u64,
    open: bool,
}

impl Transport for SimTransport {
    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize> {
        if !self.open {
            return Ok(0);
        }
        let mut state = self.device.state();
        if let Some(reply) = state.handle(data) {
            if let Some(outbox) = state.outboxes.get_mut(&self.handle) {
                outbox.push_back(reply);
            }
            self.device.inner.replies.notify_all();
        }
        Ok(data.len())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        if !self.open {
            return Ok(None);
        }
        let handle = self.handle;
        let state = self.device.state();
        let (mut state, _) = self
            .device
            .inner
            .replies
            .wait_timeout_while(state, timeout, |s| !s.has_reply(handle))
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state.next_reply(handle))
    }

    fn is_valid(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.device.state().outboxes.remove(&self.handle);
        }
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        self.close();
    }
}
