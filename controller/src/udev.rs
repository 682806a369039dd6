//! udev rules granting unprivileged access to the pad.

use std::{fmt::Write as _, path::Path};

pub const RULES_DIR: &str = "/etc/udev/rules.d";

#[must_use]
pub fn rules_file_name(vendor_id: u16, product_id: u16) -> String {
    format!("99-bs2pro-{vendor_id:04x}-{product_id:04x}.rules")
}

/// Rules covering both the hidraw node and the raw USB device.
#[must_use]
pub fn rules_for(vendor_id: u16, product_id: u16) -> String {
    let mut rules = String::from("# BS2PRO controller udev rules\n");

    for subsystem in ["hidraw", "usb"] {
        // Writing into a `String` cannot fail.
        let _ = writeln!(
            rules,
            r#"SUBSYSTEM=="{subsystem}", ATTRS{{idVendor}}=="{vendor_id:04x}", ATTRS{{idProduct}}=="{product_id:04x}", MODE="0666", GROUP="plugdev""#
        );
    }

    rules
}

/// Whether rules for the device are present in `dir`.
#[must_use]
pub fn rules_installed(dir: &Path, vendor_id: u16, product_id: u16) -> bool {
    dir.join(rules_file_name(vendor_id, product_id)).exists()
}
