//! Fan speed extraction from the pad's status reports.
//!
//! The report layout is undocumented. The fan speed has been observed at a
//! handful of offsets and byte orders depending on firmware, so the decoder
//! probes an ordered list of candidate fields and keeps the first one that
//! yields a plausible RPM. The order was established empirically and should
//! only change with new captures from real hardware.

/// Leading bytes of a status report: report id `0x03` followed by the vendor header.
pub const STATUS_MARKER: [u8; 3] = [0x03, 0x5A, 0xA5];
/// Shortest report that can carry a fan speed.
pub const MIN_STATUS_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// One interpretation of the report: a 16 bit field and a multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub offset: usize,
    pub endianness: Endianness,
    pub scale: u32,
}

impl Candidate {
    const fn new(offset: usize, endianness: Endianness, scale: u32) -> Self {
        Self {
            offset,
            endianness,
            scale,
        }
    }

    /// Raw scaled value of the field, if the frame is long enough to hold it.
    #[must_use]
    pub fn extract(&self, frame: &[u8]) -> Option<u32> {
        let bytes = frame.get(self.offset..self.offset + 2)?;
        let bytes = [bytes[0], bytes[1]];

        let value = match self.endianness {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        };

        Some(u32::from(value) * self.scale)
    }
}

/// Candidate fields in probing order.
pub const CANDIDATES: [Candidate; 10] = [
    Candidate::new(8, Endianness::Little, 1),
    Candidate::new(8, Endianness::Big, 1),
    Candidate::new(10, Endianness::Little, 1),
    Candidate::new(10, Endianness::Big, 1),
    Candidate::new(13, Endianness::Little, 1),
    Candidate::new(13, Endianness::Big, 1),
    Candidate::new(14, Endianness::Little, 10),
    Candidate::new(14, Endianness::Big, 10),
    Candidate::new(14, Endianness::Little, 100),
    Candidate::new(14, Endianness::Big, 100),
];

/// Inclusive range of fan speeds considered physically plausible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpmBounds {
    pub min: u32,
    pub max: u32,
}

impl RpmBounds {
    #[inline]
    #[must_use]
    pub fn contains(&self, rpm: u32) -> bool {
        (self.min..=self.max).contains(&rpm)
    }
}

impl Default for RpmBounds {
    fn default() -> Self {
        Self {
            min: 1000,
            max: 3000,
        }
    }
}

/// A decoded fan speed along with the field it was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpmReading {
    pub rpm: u32,
    pub candidate: Candidate,
}

#[must_use]
pub fn is_status_frame(frame: &[u8]) -> bool {
    frame.len() >= MIN_STATUS_LEN && frame.starts_with(&STATUS_MARKER)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RpmDecoder {
    bounds: RpmBounds,
}

impl RpmDecoder {
    #[must_use]
    pub fn new(bounds: RpmBounds) -> Self {
        Self { bounds }
    }

    /// Returns the fan speed carried by a status report.
    ///
    /// `None` means the frame is not a status report or that no candidate
    /// field holds a plausible value. Callers should treat both as "no new
    /// reading", not as a failure.
    #[must_use]
    pub fn decode_rpm(&self, frame: &[u8]) -> Option<u32> {
        self.decode(frame).map(|reading| reading.rpm)
    }

    #[must_use]
    pub fn decode(&self, frame: &[u8]) -> Option<RpmReading> {
        if !is_status_frame(frame) {
            return None;
        }

        CANDIDATES.iter().find_map(|candidate| {
            candidate
                .extract(frame)
                .filter(|rpm| self.bounds.contains(*rpm))
                .map(|rpm| RpmReading {
                    rpm,
                    candidate: *candidate,
                })
        })
    }
}
