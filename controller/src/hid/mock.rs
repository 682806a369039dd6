//! Scripted in-memory HID stack for tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    DeviceError,
    hid::{DeviceDescriptor, HidBackend, HidHandle, OpenConvention},
};

pub fn pad() -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: 0x37D7,
        product_id: 0x1001,
        path: Some("/dev/hidraw3".to_owned()),
        product_string: "BS2PRO".to_owned(),
        manufacturer_string: "Flydigi".to_owned(),
    }
}

/// Shared between the backend and every handle it opened.
#[derive(Debug, Default)]
pub struct MockState {
    pub attempts: Mutex<Vec<OpenConvention>>,
    pub failing: Mutex<Vec<OpenConvention>>,
    pub enumerate_fails: AtomicBool,
    pub enumerations: AtomicU32,
    pub opened: AtomicU32,
    pub writes: AtomicU32,
    pub write_failures: AtomicU32,
    pub written: Mutex<Vec<Vec<u8>>>,
    pub reads: AtomicU32,
    pub reports: Mutex<VecDeque<Result<Vec<u8>, DeviceError>>>,
    pub io_delay: Mutex<Duration>,
    busy: AtomicBool,
    pub overlaps: AtomicU32,
}

impl MockState {
    pub fn fail(&self, convention: OpenConvention) {
        self.failing.lock().push(convention);
    }

    pub fn fail_writes(&self, count: u32) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    pub fn push_report(&self, report: Result<Vec<u8>, DeviceError>) {
        self.reports.lock().push_back(report);
    }

    pub fn attempts(&self) -> Vec<OpenConvention> {
        self.attempts.lock().clone()
    }

    /// Runs `f` as one device transaction, recording any overlap with another.
    fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let delay = *self.io_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = f();
        self.busy.store(false, Ordering::SeqCst);
        result
    }
}

#[derive(Debug, Default)]
pub struct MockBackend {
    pub devices: Vec<DeviceDescriptor>,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            state: Arc::default(),
        }
    }

    pub fn with_pad() -> Self {
        Self::new(vec![pad()])
    }

    fn open(&self, convention: OpenConvention) -> Result<MockHandle, DeviceError> {
        self.state.attempts.lock().push(convention);

        if self.state.failing.lock().contains(&convention) {
            return Err(DeviceError::OpenFailed(format!("{convention} refused")));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);

        Ok(MockHandle {
            state: self.state.clone(),
        })
    }
}

impl HidBackend for MockBackend {
    type Handle = MockHandle;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        self.state.enumerations.fetch_add(1, Ordering::SeqCst);

        if self.state.enumerate_fails.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable("no hidraw".to_owned()));
        }

        Ok(self.devices.clone())
    }

    fn open_by_path(&self, _: &str) -> Result<Self::Handle, DeviceError> {
        self.open(OpenConvention::ByPath)
    }

    fn open_by_ids(&self, _: u16, _: u16) -> Result<Self::Handle, DeviceError> {
        self.open(OpenConvention::ByIds)
    }

    fn construct_then_open(&self, _: u16, _: u16) -> Result<Self::Handle, DeviceError> {
        self.open(OpenConvention::ConstructThenOpen)
    }
}

#[derive(Debug)]
pub struct MockHandle {
    state: Arc<MockState>,
}

impl HidHandle for MockHandle {
    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        self.state.transaction(|| {
            self.state.writes.fetch_add(1, Ordering::SeqCst);

            let failed = self
                .state
                .write_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();

            if failed {
                return Err(DeviceError::Io("write stalled".to_owned()));
            }

            self.state.written.lock().push(data.to_vec());
            Ok(data.len())
        })
    }

    fn read_timeout(&mut self, buf: &mut [u8], _: Duration) -> Result<usize, DeviceError> {
        self.state.transaction(|| {
            self.state.reads.fetch_add(1, Ordering::SeqCst);

            match self.state.reports.lock().pop_front() {
                Some(Ok(report)) => {
                    let len = report.len().min(buf.len());
                    buf[..len].copy_from_slice(&report[..len]);
                    Ok(len)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        })
    }
}
