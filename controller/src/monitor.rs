//! Background polling of the pad's fan speed reports.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Context as _;
use parking_lot::Mutex;
use shared::{RpmDecoder, STATUS_FRAME_LEN};

use crate::{AnyResult, hid::HidBackend, session::DeviceSession};

pub type Subscriber = Arc<dyn Fn(u32) -> AnyResult<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Pause between two reads.
    pub poll_interval: Duration,
    /// How long a single read may block.
    pub read_timeout: Duration,
    /// Pause before reopening the device after a failure.
    pub reconnect_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            read_timeout: Duration::from_millis(250),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

struct Inner<B: HidBackend> {
    session: Arc<DeviceSession<B>>,
    decoder: RpmDecoder,
    config: MonitorConfig,
    subscribers: Mutex<Vec<Subscriber>>,
    current_rpm: Mutex<Option<u32>>,
    stop: AtomicBool,
}

/// Polls status reports on the session's shared handle and publishes fan
/// speed changes to subscribers.
pub struct TelemetryMonitor<B: HidBackend + 'static> {
    inner: Arc<Inner<B>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: HidBackend + 'static> TelemetryMonitor<B> {
    #[must_use]
    pub fn new(session: Arc<DeviceSession<B>>, decoder: RpmDecoder, config: MonitorConfig) -> Self {
        let inner = Inner {
            session,
            decoder,
            config,
            subscribers: Mutex::default(),
            current_rpm: Mutex::default(),
            stop: AtomicBool::new(false),
        };

        Self {
            inner: Arc::new(inner),
            worker: Mutex::default(),
        }
    }

    /// Registers a callback invoked with every new fan speed.
    ///
    /// Callbacks run on the monitor thread. A failing or panicking callback
    /// is logged and does not affect the others.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(u32) -> AnyResult<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.lock().push(Arc::new(subscriber));
    }

    /// Last published fan speed.
    #[must_use]
    pub fn current_rpm(&self) -> Option<u32> {
        *self.inner.current_rpm.lock()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Puts the session in shared mode and spawns the polling thread.
    /// Does nothing if the monitor is already running.
    ///
    /// # Errors
    pub fn start(&self) -> AnyResult<()> {
        let mut worker = self.worker.lock();

        if worker.is_some() {
            tracing::debug!("telemetry monitor already running");
            return Ok(());
        }

        self.inner.stop.store(false, Ordering::Release);
        self.inner.session.share();

        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("telemetry".to_owned())
            .spawn(move || inner.run())
            .context("spawning telemetry thread")?;

        *worker = Some(handle);
        Ok(())
    }

    /// Stops the polling thread and waits for it to exit.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.inner.stop.store(true, Ordering::Release);
        handle.thread().unpark();

        if handle.join().is_err() {
            tracing::error!("telemetry thread panicked");
            self.inner.session.release();
        }
    }
}

impl<B: HidBackend + 'static> Drop for TelemetryMonitor<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<B: HidBackend + 'static> fmt::Debug for TelemetryMonitor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryMonitor")
            .field("config", &self.inner.config)
            .field("subscribers", &self.inner.subscribers.lock().len())
            .field("current_rpm", &self.current_rpm())
            .finish_non_exhaustive()
    }
}

impl<B: HidBackend> Inner<B> {
    fn run(&self) {
        tracing::info!("telemetry monitor started");

        while !self.stop.load(Ordering::Acquire) {
            let wait = self.poll();
            // `stop` unparks the thread, so long waits end early.
            thread::park_timeout(wait);
        }

        self.session.release();
        tracing::info!("telemetry monitor stopped");
    }

    /// Performs one read and returns how long to wait before the next one.
    fn poll(&self) -> Duration {
        if let Err(e) = self.session.acquire() {
            tracing::debug!("device unavailable: {e}");
            return self.config.reconnect_delay;
        }

        match self
            .session
            .read(STATUS_FRAME_LEN, self.config.read_timeout)
        {
            Ok(Some(report)) => match self.decoder.decode_rpm(&report) {
                Some(rpm) => self.publish(rpm),
                None => tracing::trace!("ignoring report: {report:02x?}"),
            },
            Ok(None) => (),
            Err(e) => {
                tracing::warn!("telemetry read failed: {e}");
                self.session.close();
                return self.config.reconnect_delay;
            }
        }

        self.config.poll_interval
    }

    fn publish(&self, rpm: u32) {
        {
            let mut current = self.current_rpm.lock();

            if *current == Some(rpm) {
                return;
            }

            *current = Some(rpm);
        }

        tracing::info!("fan speed: {rpm} RPM");

        let subscribers = self.subscribers.lock().clone();

        for subscriber in subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber(rpm))) {
                Ok(Ok(())) => (),
                Ok(Err(e)) => tracing::warn!("subscriber failed: {e:#}"),
                Err(_) => tracing::error!("subscriber panicked"),
            }
        }
    }
}
