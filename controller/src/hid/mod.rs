mod hidapi_backend;
#[cfg(test)]
pub mod mock;

use std::{fmt, time::Duration};

pub use hidapi_backend::HidApiBackend;

use crate::DeviceError;

/// An enumerated HID device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// OS specific path, when the enumeration reports one.
    pub path: Option<String>,
    pub product_string: String,
    pub manufacturer_string: String,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let product = if self.product_string.is_empty() {
            "unnamed device"
        } else {
            &self.product_string
        };

        write!(
            f,
            "{product} (VID: {:04x}, PID: {:04x})",
            self.vendor_id, self.product_id
        )
    }
}

/// An open connection to a HID device.
///
/// Implementations are blocking and must not be used for concurrent
/// transactions, hence `&mut self`.
pub trait HidHandle: Send {
    /// # Errors
    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError>;

    /// Reads one report into `buf`, returning `0` when the timeout elapses
    /// without data.
    ///
    /// # Errors
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, DeviceError>;
}

/// Enumeration and the opening conventions a HID stack offers.
pub trait HidBackend: Send + Sync {
    type Handle: HidHandle;

    /// # Errors
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// # Errors
    fn open_by_path(&self, path: &str) -> Result<Self::Handle, DeviceError>;

    /// # Errors
    fn open_by_ids(&self, vendor_id: u16, product_id: u16) -> Result<Self::Handle, DeviceError>;

    /// Builds a fresh stack context and opens the device through it.
    ///
    /// # Errors
    fn construct_then_open(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Self::Handle, DeviceError>;
}

/// A way of turning a [`DeviceDescriptor`] into an open handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenConvention {
    /// Disambiguates devices sharing the same ids, so it goes first.
    ByPath,
    ByIds,
    ConstructThenOpen,
}

impl OpenConvention {
    pub const DEFAULT_ORDER: [Self; 3] = [Self::ByPath, Self::ByIds, Self::ConstructThenOpen];

    /// Attempts to open the device, returning `None` if the convention does
    /// not apply to this descriptor.
    pub fn open<B>(
        self,
        backend: &B,
        descriptor: &DeviceDescriptor,
    ) -> Option<Result<B::Handle, DeviceError>>
    where
        B: HidBackend + ?Sized,
    {
        let DeviceDescriptor {
            vendor_id,
            product_id,
            ..
        } = *descriptor;

        match self {
            Self::ByPath => descriptor
                .path
                .as_deref()
                .map(|path| backend.open_by_path(path)),
            Self::ByIds => Some(backend.open_by_ids(vendor_id, product_id)),
            Self::ConstructThenOpen => Some(backend.construct_then_open(vendor_id, product_id)),
        }
    }
}

impl fmt::Display for OpenConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ByPath => "open by path",
            Self::ByIds => "open by ids",
            Self::ConstructThenOpen => "construct then open",
        };

        f.write_str(name)
    }
}
