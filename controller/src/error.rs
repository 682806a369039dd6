use thiserror::Error as ThisError;

/// Failures of device discovery and HID I/O.
#[derive(Clone, Debug, ThisError)]
#[cfg_attr(test, derive(PartialEq))]
pub enum DeviceError {
    #[error("BS2PRO device not found")]
    NotFound,
    #[error("HID subsystem unavailable: {0}")]
    Unavailable(String),
    #[error("unable to open device: {0}")]
    OpenFailed(String),
    #[error("HID I/O error: {0}")]
    Io(String),
    #[error("no shared handle outside shared mode")]
    NotShared,
}

impl DeviceError {
    /// Whether the failed operation may be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OpenFailed(_) | Self::Io(_))
    }
}
