pub mod dispatch;
mod error;
pub mod hid;
pub mod locator;
pub mod logging;
pub mod monitor;
pub mod retry;
pub mod session;
pub mod smart;
pub mod temperature;
pub mod udev;

pub use anyhow::Result as AnyResult;
pub use dispatch::{CommandDispatcher, Severity, StatusSink};
pub use error::DeviceError;
pub use hid::{DeviceDescriptor, HidApiBackend, HidBackend, HidHandle, OpenConvention};
pub use locator::{Confidence, DetectionRules, LocatedDevice, find_device};
pub use monitor::{MonitorConfig, TelemetryMonitor};
pub use retry::RetryPolicy;
pub use session::{DeviceSession, SessionState};
pub use smart::{FanCurveController, Phase, RangeSet, SmartConfig, SmartMode, Step, TemperatureRange};
pub use temperature::{HwmonTemperature, SystemTemperature, TemperatureSource};
