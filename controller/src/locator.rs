//! Picks the pad out of the host's HID devices.

use std::fmt;

use shared::{KNOWN_VENDOR_IDS, KNOWN_VENDOR_NAMES, PRODUCT_MARKER};

use crate::hid::{DeviceDescriptor, HidBackend};

/// What a device has to look like to be considered the pad.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionRules {
    /// Uppercase substring of the product string.
    pub marker: String,
    /// Uppercase substrings of the manufacturer string.
    pub vendor_names: Vec<String>,
    pub vendor_ids: Vec<u16>,
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self {
            marker: PRODUCT_MARKER.to_owned(),
            vendor_names: KNOWN_VENDOR_NAMES.iter().map(|&s| s.to_owned()).collect(),
            vendor_ids: KNOWN_VENDOR_IDS.to_vec(),
        }
    }
}

/// How strongly a device matched. Orders from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    /// Only the vendor id matched, on a device that reports no strings at all.
    VendorId,
    /// Only the manufacturer string matched.
    VendorName,
    /// The product string carries the marker. The flags record whether the
    /// vendor name and vendor id agree as well.
    Marker { vendor_name: bool, vendor_id: bool },
}

impl Confidence {
    #[must_use]
    pub fn is_weak(self) -> bool {
        !matches!(self, Self::Marker { .. })
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marker {
                vendor_name: true,
                vendor_id: true,
            } => f.write_str("product, vendor name and vendor id match"),
            Self::Marker {
                vendor_name: true, ..
            } => f.write_str("product and vendor name match"),
            Self::Marker {
                vendor_id: true, ..
            } => f.write_str("product and vendor id match"),
            Self::Marker { .. } => f.write_str("product match"),
            Self::VendorName => f.write_str("vendor name match only"),
            Self::VendorId => f.write_str("vendor id match only"),
        }
    }
}

/// A device chosen by [`find_device`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedDevice {
    pub descriptor: DeviceDescriptor,
    pub confidence: Confidence,
}

/// Applies the detection rules to a single device.
#[must_use]
pub fn classify(device: &DeviceDescriptor, rules: &DetectionRules) -> Option<Confidence> {
    let product = device.product_string.to_uppercase();
    let manufacturer = device.manufacturer_string.to_uppercase();

    let vendor_name = rules
        .vendor_names
        .iter()
        .any(|name| manufacturer.contains(name.as_str()));
    let vendor_id = rules.vendor_ids.contains(&device.vendor_id);

    if product.contains(rules.marker.as_str()) {
        return Some(Confidence::Marker {
            vendor_name,
            vendor_id,
        });
    }

    if vendor_name {
        return Some(Confidence::VendorName);
    }

    if vendor_id && product.is_empty() && manufacturer.is_empty() {
        return Some(Confidence::VendorId);
    }

    None
}

/// Enumerates HID devices and returns the best match for the pad.
///
/// Absence is a normal outcome: enumeration failures are logged and turned
/// into `None`. When several devices match equally well the first one
/// enumerated wins.
pub fn find_device<B>(backend: &B, rules: &DetectionRules) -> Option<LocatedDevice>
where
    B: HidBackend + ?Sized,
{
    let devices = match backend.enumerate() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("HID enumeration failed: {e}");
            return None;
        }
    };

    let located = devices
        .into_iter()
        .filter_map(|descriptor| {
            let confidence = classify(&descriptor, rules)?;
            Some(LocatedDevice {
                descriptor,
                confidence,
            })
        })
        .reduce(|best, next| {
            if next.confidence > best.confidence {
                next
            } else {
                best
            }
        });

    match &located {
        Some(device) if device.confidence.is_weak() => {
            tracing::warn!(
                "using {} on a weak signal ({})",
                device.descriptor,
                device.confidence
            );
        }
        Some(device) => tracing::debug!("found {} ({})", device.descriptor, device.confidence),
        None => tracing::debug!("no matching HID device"),
    }

    located
}
