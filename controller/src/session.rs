//! Ownership of the pad's HID handle.
//!
//! The command path and the telemetry path talk to the same physical device.
//! HID handles do not support concurrent transactions, so a session keeps at
//! most one shared handle behind a single lock. The lock guards creation,
//! every read and write, and closing. It is taken for one transaction at a
//! time and never held while a caller sleeps.
//!
//! The shared handle only exists in shared mode. Outside of it every caller
//! opens a private handle, so the two never coexist.

use std::{collections::VecDeque, fmt, time::Duration};

use parking_lot::Mutex;

use crate::{
    DeviceError,
    hid::{DeviceDescriptor, HidBackend, HidHandle, OpenConvention},
    locator::{self, DetectionRules},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

/// Reports kept for the next [`DeviceSession::read`].
const BACKLOG_LEN: usize = 4;

struct Slot<H> {
    sharing: bool,
    handle: Option<H>,
    backlog: VecDeque<Vec<u8>>,
}

pub struct DeviceSession<B: HidBackend> {
    backend: B,
    rules: DetectionRules,
    conventions: Vec<OpenConvention>,
    slot: Mutex<Slot<B::Handle>>,
}

impl<B: HidBackend> DeviceSession<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_rules(backend, DetectionRules::default())
    }

    #[must_use]
    pub fn with_rules(backend: B, rules: DetectionRules) -> Self {
        Self {
            backend,
            rules,
            conventions: OpenConvention::DEFAULT_ORDER.to_vec(),
            slot: Mutex::new(Slot {
                sharing: false,
                handle: None,
                backlog: VecDeque::new(),
            }),
        }
    }

    /// Replaces the order in which opening conventions are tried.
    #[must_use]
    pub fn with_conventions(mut self, conventions: Vec<OpenConvention>) -> Self {
        self.conventions = conventions;
        self
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    #[must_use]
    pub fn rules(&self) -> &DetectionRules {
        &self.rules
    }

    /// Finds the pad among the enumerated devices.
    ///
    /// # Errors
    /// Returns [`DeviceError::NotFound`] if nothing matches.
    pub fn locate(&self) -> Result<DeviceDescriptor, DeviceError> {
        locator::find_device(&self.backend, &self.rules)
            .map(|located| located.descriptor)
            .ok_or(DeviceError::NotFound)
    }

    /// Opens a private handle, trying each convention in order until one
    /// succeeds. The handle closes when dropped.
    ///
    /// # Errors
    /// Returns [`DeviceError::OpenFailed`] once every convention failed.
    pub fn open(&self, descriptor: &DeviceDescriptor) -> Result<B::Handle, DeviceError> {
        let mut last_error = None;

        for convention in &self.conventions {
            let Some(result) = convention.open(&self.backend, descriptor) else {
                tracing::trace!("{convention} does not apply to {descriptor}");
                continue;
            };

            match result {
                Ok(handle) => {
                    tracing::debug!("opened {descriptor} with {convention}");
                    return Ok(handle);
                }
                Err(e) => {
                    tracing::debug!("{convention} failed for {descriptor}: {e}");
                    last_error = Some(e);
                }
            }
        }

        let reason = match last_error {
            Some(DeviceError::OpenFailed(reason)) => reason,
            Some(e) => e.to_string(),
            None => String::from("no applicable opening convention"),
        };

        Err(DeviceError::OpenFailed(reason))
    }

    /// Locates the pad and opens a private handle to it.
    ///
    /// # Errors
    pub fn open_private(&self) -> Result<B::Handle, DeviceError> {
        let descriptor = self.locate()?;
        self.open(&descriptor)
    }

    /// Enables shared handle mode until [`DeviceSession::release`].
    pub fn share(&self) {
        self.slot.lock().sharing = true;
    }

    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.slot.lock().sharing
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.slot.lock().handle.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Makes sure the shared handle is open.
    ///
    /// # Errors
    /// Returns [`DeviceError::NotShared`] outside shared mode.
    pub fn acquire(&self) -> Result<(), DeviceError> {
        self.with_handle(|_| Ok(()))
    }

    /// Runs one transaction on the shared handle, opening it first if needed.
    ///
    /// # Errors
    /// Returns [`DeviceError::NotShared`] outside shared mode.
    pub fn with_handle<R, F>(&self, f: F) -> Result<R, DeviceError>
    where
        F: FnOnce(&mut B::Handle) -> Result<R, DeviceError>,
    {
        self.try_shared(f).unwrap_or(Err(DeviceError::NotShared))
    }

    /// Like [`DeviceSession::with_handle`], but returns `None` when the
    /// session is not shared so that the caller can use a private handle
    /// instead.
    pub fn try_shared<R, F>(&self, f: F) -> Option<Result<R, DeviceError>>
    where
        F: FnOnce(&mut B::Handle) -> Result<R, DeviceError>,
    {
        let mut slot = self.slot.lock();

        if !slot.sharing {
            return None;
        }

        Some(self.ensure_open(&mut slot).and_then(f))
    }

    /// # Errors
    /// Returns [`DeviceError::NotShared`] outside shared mode.
    pub fn write(&self, frame: &[u8]) -> Result<usize, DeviceError> {
        self.with_handle(|handle| handle.write(frame))
    }

    /// Reads one report of at most `max_len` bytes on the shared handle.
    ///
    /// Reports handed back through [`DeviceSession::unread`] come first. A
    /// timeout without data is `Ok(None)`.
    ///
    /// # Errors
    /// Returns [`DeviceError::NotShared`] outside shared mode.
    pub fn read(&self, max_len: usize, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        let mut slot = self.slot.lock();

        if !slot.sharing {
            return Err(DeviceError::NotShared);
        }

        if let Some(mut report) = slot.backlog.pop_front() {
            report.truncate(max_len);
            return Ok(Some(report));
        }

        let handle = self.ensure_open(&mut slot)?;
        read_report(handle, max_len, timeout)
    }

    /// Hands a report read on the shared handle back to the next reader.
    /// Dropped outside shared mode.
    pub fn unread(&self, report: Vec<u8>) {
        let mut slot = self.slot.lock();

        if !slot.sharing {
            return;
        }

        if slot.backlog.len() == BACKLOG_LEN {
            slot.backlog.pop_front();
        }

        slot.backlog.push_back(report);
    }

    /// Drops the shared handle, if any. Sharing stays enabled so the next
    /// transaction reopens the device.
    pub fn close(&self) {
        if self.slot.lock().handle.take().is_some() {
            tracing::debug!("shared handle closed");
        }
    }

    /// Drops the shared handle and leaves shared mode.
    pub fn release(&self) {
        let mut slot = self.slot.lock();
        slot.sharing = false;
        slot.backlog.clear();

        if slot.handle.take().is_some() {
            tracing::info!("shared handle released");
        }
    }

    fn ensure_open<'a>(
        &self,
        slot: &'a mut Slot<B::Handle>,
    ) -> Result<&'a mut B::Handle, DeviceError> {
        let handle = match slot.handle.take() {
            Some(handle) => handle,
            None => {
                let descriptor = self.locate()?;
                let handle = self.open(&descriptor)?;
                tracing::info!("shared handle opened on {descriptor}");
                handle
            }
        };

        Ok(slot.handle.insert(handle))
    }
}

impl<B: HidBackend> fmt::Debug for DeviceSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("rules", &self.rules)
            .field("conventions", &self.conventions)
            .finish_non_exhaustive()
    }
}

/// Reads one report from `handle`, mapping a timeout to `None`.
///
/// # Errors
pub fn read_report<H>(
    handle: &mut H,
    max_len: usize,
    timeout: Duration,
) -> Result<Option<Vec<u8>>, DeviceError>
where
    H: HidHandle + ?Sized,
{
    let mut buf = vec![0; max_len];
    let len = handle.read_timeout(&mut buf, timeout)?;

    if len == 0 {
        return Ok(None);
    }

    buf.truncate(len);
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, atomic::Ordering},
        thread,
        time::Duration,
    };

    use super::{DeviceSession, SessionState};
    use crate::{
        DeviceError,
        hid::{
            DeviceDescriptor, OpenConvention,
            mock::{MockBackend, pad},
        },
    };

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_open_prefers_path() {
        let session = DeviceSession::new(MockBackend::with_pad());

        session.open(&pad()).unwrap();
        assert_eq!(session.backend().state.attempts(), [OpenConvention::ByPath]);
    }

    #[test]
    fn test_open_falls_back_in_order() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();
        state.fail(OpenConvention::ByPath);
        state.fail(OpenConvention::ByIds);

        session.open(&pad()).unwrap();
        assert_eq!(
            state.attempts(),
            [
                OpenConvention::ByPath,
                OpenConvention::ByIds,
                OpenConvention::ConstructThenOpen
            ]
        );
        assert_eq!(state.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_skips_path_when_unknown() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let descriptor = DeviceDescriptor {
            path: None,
            ..pad()
        };

        session.open(&descriptor).unwrap();
        assert_eq!(session.backend().state.attempts(), [OpenConvention::ByIds]);
    }

    #[test]
    fn test_open_fails_when_every_convention_fails() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();
        state.fail(OpenConvention::ByPath);
        state.fail(OpenConvention::ByIds);
        state.fail(OpenConvention::ConstructThenOpen);

        let err = session.open(&pad()).unwrap_err();
        assert_eq!(
            err,
            DeviceError::OpenFailed("construct then open refused".to_owned())
        );
        assert_eq!(state.attempts().len(), 3);
    }

    #[test]
    fn test_custom_convention_order() {
        let session = DeviceSession::new(MockBackend::with_pad())
            .with_conventions(vec![OpenConvention::ConstructThenOpen, OpenConvention::ByPath]);

        session.open(&pad()).unwrap();
        assert_eq!(
            session.backend().state.attempts(),
            [OpenConvention::ConstructThenOpen]
        );
    }

    #[test]
    fn test_locate_not_found() {
        let session = DeviceSession::new(MockBackend::new(Vec::new()));

        assert_eq!(session.locate(), Err(DeviceError::NotFound));

        session.share();
        assert_eq!(session.acquire(), Err(DeviceError::NotFound));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_shared_handle_is_created_lazily_once() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(state.opened.load(Ordering::SeqCst), 0);

        session.share();
        session.write(&[0x5A, 0xA5]).unwrap();
        session.write(&[0x5A, 0xA5]).unwrap();
        assert_eq!(session.read(32, TIMEOUT), Ok(None));

        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(state.opened.load(Ordering::SeqCst), 1);
        assert_eq!(state.written.lock().len(), 2);
    }

    #[test]
    fn test_close_and_release_are_idempotent() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();

        session.close();
        session.release();

        session.share();
        session.acquire().unwrap();
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.is_shared());

        session.acquire().unwrap();
        assert_eq!(state.opened.load(Ordering::SeqCst), 2);

        session.release();
        session.release();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_shared());
    }

    #[test]
    fn test_try_shared_requires_shared_mode() {
        let session = DeviceSession::new(MockBackend::with_pad());

        assert!(session.try_shared(|_| Ok(())).is_none());
        assert_eq!(session.state(), SessionState::Closed);

        session.share();
        assert_eq!(session.try_shared(|_| Ok(1)), Some(Ok(1)));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_io_requires_shared_mode() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();

        assert_eq!(session.write(&[0x5A, 0xA5]), Err(DeviceError::NotShared));
        assert_eq!(session.read(32, TIMEOUT), Err(DeviceError::NotShared));
        assert_eq!(session.acquire(), Err(DeviceError::NotShared));
        assert_eq!(session.with_handle(|_| Ok(())), Err(DeviceError::NotShared));

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(state.opened.load(Ordering::SeqCst), 0);
        assert_eq!(state.writes.load(Ordering::SeqCst), 0);

        // Releasing closes the handle, so later I/O cannot resurrect it.
        session.share();
        session.write(&[0x5A, 0xA5]).unwrap();
        session.release();
        assert_eq!(session.write(&[0x5A, 0xA5]), Err(DeviceError::NotShared));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_unread_reports_come_first() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();
        session.share();

        state.push_report(Ok(vec![0x03, 0x5A, 0xA5, 0x01]));
        session.unread(vec![0x03, 0x5A, 0xA5, 0x02]);

        assert_eq!(session.read(32, TIMEOUT), Ok(Some(vec![0x03, 0x5A, 0xA5, 0x02])));
        assert_eq!(session.read(32, TIMEOUT), Ok(Some(vec![0x03, 0x5A, 0xA5, 0x01])));
        assert_eq!(session.read(32, TIMEOUT), Ok(None));
    }

    #[test]
    fn test_unread_backlog_is_bounded_and_cleared() {
        let session = DeviceSession::new(MockBackend::with_pad());

        session.unread(vec![0xFF]);
        session.share();
        assert_eq!(session.read(32, TIMEOUT), Ok(None));

        for i in 0..6 {
            session.unread(vec![i]);
        }

        assert_eq!(session.read(32, TIMEOUT), Ok(Some(vec![2])));

        session.release();
        session.share();
        assert_eq!(session.read(32, TIMEOUT), Ok(None));
    }

    #[test]
    fn test_read_returns_report() {
        let session = DeviceSession::new(MockBackend::with_pad());
        let state = session.backend().state.clone();
        session.share();

        state.push_report(Ok(vec![0x03, 0x5A, 0xA5, 0xEF]));
        state.push_report(Err(DeviceError::Io("unplugged".to_owned())));

        assert_eq!(
            session.read(32, TIMEOUT),
            Ok(Some(vec![0x03, 0x5A, 0xA5, 0xEF]))
        );
        assert_eq!(
            session.read(32, TIMEOUT),
            Err(DeviceError::Io("unplugged".to_owned()))
        );
    }

    #[test]
    fn test_concurrent_read_and_write_never_overlap() {
        let session = Arc::new(DeviceSession::new(MockBackend::with_pad()));
        let state = session.backend().state.clone();
        *state.io_delay.lock() = Duration::from_millis(1);
        session.share();

        let writer = {
            let session = session.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    session.write(&[0x5A, 0xA5, 0x26]).unwrap();
                }
            })
        };

        let reader = {
            let session = session.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    session.read(32, TIMEOUT).unwrap();
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(state.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(state.writes.load(Ordering::SeqCst), 50);
        assert_eq!(state.reads.load(Ordering::SeqCst), 50);
        assert_eq!(state.opened.load(Ordering::SeqCst), 1);
    }
}
