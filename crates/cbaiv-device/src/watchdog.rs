//! Background keep-alive task.
//!
//! The analyzer drops its load if it stops hearing from the host, so while a
//! test runs a dedicated thread re-sends the keep-alive frame every tick and
//! publishes each status response into the session's [`StatusCache`].
//!
//! Lifecycle: `Idle -> Running -> Stopping -> Exited`. Cancellation is
//! cooperative: [`Watchdog::stop`] cancels the token, wakes the thread, and
//! joins it, so once it returns nothing else is using the transport.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cbaiv_protocol::{decode_status, encode_keepalive, STATUS_RESPONSE};
use tokio_util::sync::CancellationToken;

use crate::cache::{StatusCache, StatusPublisher};
use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::exchange::{lock, transact, SharedTransport};

const THREAD_NAME: &str = "cbaiv-watchdog";

/// Lifecycle state of a watchdog task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchdogState {
    /// Not started (also reported by a session with no test running).
    Idle = 0,
    /// Spawned and ticking.
    Running = 1,
    /// Cancellation requested, waiting for the thread to notice.
    Stopping = 2,
    /// Thread has returned.
    Exited = 3,
}

impl WatchdogState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WatchdogState::Idle,
            1 => WatchdogState::Running,
            2 => WatchdogState::Stopping,
            _ => WatchdogState::Exited,
        }
    }

    /// Whether the task counts as active (spawned and not yet exited).
    pub fn is_active(self) -> bool {
        matches!(self, WatchdogState::Running | WatchdogState::Stopping)
    }
}

#[derive(Debug, Default)]
struct MonitorInner {
    state: AtomicU8,
    ticks: AtomicU64,
    missed: AtomicU64,
}

/// Read-only view of one watchdog's progress. Outlives the watchdog.
#[derive(Debug, Clone, Default)]
pub struct WatchdogMonitor {
    inner: Arc<MonitorInner>,
}

impl WatchdogMonitor {
    pub fn state(&self) -> WatchdogState {
        WatchdogState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Keep-alive frames sent so far.
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::Relaxed)
    }

    /// Ticks that got no usable status response.
    pub fn missed(&self) -> u64 {
        self.inner.missed.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: WatchdogState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to a running keep-alive thread.
#[derive(Debug)]
pub(crate) struct Watchdog {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    monitor: WatchdogMonitor,
    cache: StatusCache,
}

impl Watchdog {
    /// Spawn the keep-alive thread. `publisher` moves into the thread, making
    /// it the cache's only writer for the rest of its life.
    pub(crate) fn spawn(
        transport: SharedTransport,
        publisher: StatusPublisher,
        cache: StatusCache,
        config: SessionConfig,
    ) -> Result<Self> {
        let token = CancellationToken::new();
        let monitor = WatchdogMonitor::default();
        monitor.set_state(WatchdogState::Running);

        let worker = Worker {
            transport,
            publisher,
            token: token.clone(),
            monitor: monitor.clone(),
            config,
        };

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                monitor.set_state(WatchdogState::Exited);
                DeviceError::WatchdogSpawn(err)
            })?;

        tracing::debug!(period = ?config.keepalive_period, "watchdog spawned");
        Ok(Self {
            token,
            handle: Some(handle),
            monitor,
            cache,
        })
    }

    pub(crate) fn cache(&self) -> &StatusCache {
        &self.cache
    }

    pub(crate) fn monitor(&self) -> &WatchdogMonitor {
        &self.monitor
    }

    /// Cancel and block until the thread has exited.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.monitor.set_state(WatchdogState::Stopping);
        self.token.cancel();
        handle.thread().unpark();

        if handle.join().is_err() {
            tracing::error!("watchdog thread panicked");
        }
        self.monitor.set_state(WatchdogState::Exited);
        tracing::debug!(
            ticks = self.monitor.ticks(),
            missed = self.monitor.missed(),
            "watchdog stopped"
        );
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    transport: SharedTransport,
    publisher: StatusPublisher,
    token: CancellationToken,
    monitor: WatchdogMonitor,
    config: SessionConfig,
}

impl Worker {
    fn run(self) {
        while self.sleep_until_next_tick() {
            self.tick();
        }
        self.monitor.set_state(WatchdogState::Exited);
    }

    /// Wait one period. Returns `false` once cancelled.
    fn sleep_until_next_tick(&self) -> bool {
        let next = Instant::now() + self.config.keepalive_period;
        loop {
            if self.token.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= next {
                return true;
            }
            thread::park_timeout(next - now);
        }
    }

    fn tick(&self) {
        let keepalive = encode_keepalive();
        let response = {
            let mut transport = lock(&self.transport);
            transact(
                &mut **transport,
                keepalive.as_bytes(),
                STATUS_RESPONSE,
                &self.config,
            )
        };
        self.monitor.inner.ticks.fetch_add(1, Ordering::Relaxed);

        // On a miss the previous reading stays: stale beats blank.
        match response {
            Ok(Some(frame)) => match decode_status(&frame) {
                Ok(status) => self.publisher.publish(status),
                Err(err) => self.miss(&err),
            },
            Ok(None) => self.miss(&DeviceError::CommunicationTimeout(
                self.config.response_timeout,
            )),
            Err(err) => self.miss(&err),
        }
    }

    fn miss(&self, err: &dyn std::fmt::Display) {
        self.monitor.inner.missed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "keep-alive got no status response");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::status_cache;
    use crate::exchange::shared;
    use crate::sim::SimDevice;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            response_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(100),
            keepalive_period: Duration::from_millis(20),
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn ticks_fill_the_cache() {
        let device = SimDevice::new(1);
        let (publisher, cache) = status_cache();
        let mut watchdog = Watchdog::spawn(
            shared(Box::new(device.connect())),
            publisher,
            cache,
            fast_config(),
        )
        .unwrap();

        assert_eq!(watchdog.monitor().state(), WatchdogState::Running);
        assert!(wait_until(Duration::from_secs(2), || watchdog
            .cache()
            .has_data()));
        assert!(device.keepalive_count() >= 1);

        watchdog.stop();
        assert_eq!(watchdog.monitor().state(), WatchdogState::Exited);
    }

    #[test]
    fn missed_ticks_keep_last_reading() {
        let device = SimDevice::new(1);
        let (publisher, cache) = status_cache();
        let mut watchdog = Watchdog::spawn(
            shared(Box::new(device.connect())),
            publisher,
            cache,
            fast_config(),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(2), || watchdog
            .cache()
            .has_data()));
        let before = watchdog.cache().latest();

        device.set_responsive(false);
        let missed_before = watchdog.monitor().missed();
        assert!(wait_until(Duration::from_secs(2), || watchdog.monitor().missed()
            >= missed_before + 2));

        assert_eq!(watchdog.cache().latest(), before);
        assert_eq!(watchdog.monitor().state(), WatchdogState::Running);
        watchdog.stop();
    }

    #[test]
    fn stop_is_bounded_by_tick_plus_timeout() {
        let device = SimDevice::new(1);
        device.set_responsive(false);
        let config = fast_config();
        let (publisher, cache) = status_cache();
        let mut watchdog =
            Watchdog::spawn(shared(Box::new(device.connect())), publisher, cache, config)
                .unwrap();

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        watchdog.stop();
        assert!(start.elapsed() <= config.worst_case_stop_latency() + Duration::from_millis(200));
        assert_eq!(watchdog.monitor().state(), WatchdogState::Exited);
    }

    #[test]
    fn stop_twice_is_harmless() {
        let device = SimDevice::new(1);
        let (publisher, cache) = status_cache();
        let mut watchdog = Watchdog::spawn(
            shared(Box::new(device.connect())),
            publisher,
            cache,
            fast_config(),
        )
        .unwrap();

        watchdog.stop();
        watchdog.stop();
        assert_eq!(watchdog.monitor().state(), WatchdogState::Exited);
    }

    #[test]
    fn monitor_outlives_watchdog() {
        let device = SimDevice::new(1);
        let (publisher, cache) = status_cache();
        let watchdog = Watchdog::spawn(
            shared(Box::new(device.connect())),
            publisher,
            cache,
            fast_config(),
        )
        .unwrap();
        let monitor = watchdog.monitor().clone();

        drop(watchdog);
        assert_eq!(monitor.state(), WatchdogState::Exited);
        assert!(!monitor.state().is_active());
    }
}
