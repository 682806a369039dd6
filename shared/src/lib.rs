#![no_std]

mod command;
mod fan_speed;
mod frame;
mod status;

pub use command::{Command, CommandNameError};
pub use fan_speed::{FanSpeed, FanSpeedConvError};
pub use frame::{COMMAND_HEADER, CommandFrame, FRAME_LEN, FrameParseError};
pub use status::{
    CANDIDATES, Candidate, Endianness, MIN_STATUS_LEN, RpmBounds, RpmDecoder, RpmReading,
    STATUS_MARKER, is_status_frame,
};

/// Substring of the HID product string that identifies the pad.
pub const PRODUCT_MARKER: &str = "BS2PRO";
/// Uppercased manufacturer names the pad has been seen to report.
pub const KNOWN_VENDOR_NAMES: &[&str] = &["FLYDIGI"];
pub const KNOWN_VENDOR_IDS: &[u16] = &[0x37D7];
/// Size of the reports read back from the pad.
pub const STATUS_FRAME_LEN: usize = 32;
