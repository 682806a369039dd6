use std::{ffi::CString, fmt, time::Duration};

use hidapi::{DeviceInfo, HidApi, HidDevice, HidError};
use parking_lot::Mutex;

use crate::{
    DeviceError,
    hid::{DeviceDescriptor, HidBackend, HidHandle},
};

/// [`HidBackend`] over the system `hidapi` library.
pub struct HidApiBackend {
    api: Mutex<HidApi>,
}

impl HidApiBackend {
    ///
    /// # Errors
    pub fn new() -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        Ok(Self {
            api: Mutex::new(api),
        })
    }

    fn descriptor(info: &DeviceInfo) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            path: info.path().to_str().ok().map(ToOwned::to_owned),
            product_string: info.product_string().unwrap_or_default().to_owned(),
            manufacturer_string: info.manufacturer_string().unwrap_or_default().to_owned(),
        }
    }
}

impl fmt::Debug for HidApiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidApiBackend").finish_non_exhaustive()
    }
}

#[expect(clippy::needless_pass_by_value, reason = "used in a `map_err`")]
fn open_error(err: HidError) -> DeviceError {
    DeviceError::OpenFailed(err.to_string())
}

#[expect(clippy::needless_pass_by_value, reason = "used in a `map_err`")]
fn io_error(err: HidError) -> DeviceError {
    DeviceError::Io(err.to_string())
}

impl HidBackend for HidApiBackend {
    type Handle = HidDevice;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut api = self.api.lock();

        api.refresh_devices()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        Ok(api.device_list().map(Self::descriptor).collect())
    }

    fn open_by_path(&self, path: &str) -> Result<Self::Handle, DeviceError> {
        let path = CString::new(path).map_err(|e| DeviceError::OpenFailed(e.to_string()))?;
        self.api.lock().open_path(&path).map_err(open_error)
    }

    fn open_by_ids(&self, vendor_id: u16, product_id: u16) -> Result<Self::Handle, DeviceError> {
        self.api.lock().open(vendor_id, product_id).map_err(open_error)
    }

    fn construct_then_open(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Self::Handle, DeviceError> {
        HidApi::new_without_enumerate()
            .and_then(|api| api.open(vendor_id, product_id))
            .map_err(open_error)
    }
}

impl HidHandle for HidDevice {
    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        HidDevice::write(self, data).map_err(io_error)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        HidDevice::read_timeout(self, buf, timeout_ms).map_err(io_error)
    }
}
