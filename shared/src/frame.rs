use core::fmt;

use thiserror::Error as ThisError;

/// Size of every command frame written to the pad.
pub const FRAME_LEN: usize = 32;
/// Leading bytes of every vendor command frame.
pub const COMMAND_HEADER: [u8; 2] = [0x5A, 0xA5];

/// A vendor command frame, zero-padded to [`FRAME_LEN`].
///
/// Frames are taken verbatim from the command table. The length/checksum
/// byte is part of the literal, so nothing here computes or verifies it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    /// Decodes a hex literal such as `5aa52605...`.
    ///
    /// Both digit cases are accepted and surrounding whitespace is ignored.
    /// Literals shorter than a frame are padded with zeroes.
    ///
    /// # Errors
    /// Returns an error on an odd digit count, a non-hex digit or a literal
    /// that does not fit in a frame.
    pub fn from_hex(literal: &str) -> Result<Self, FrameParseError> {
        let digits = literal.trim().as_bytes();
        let len = digits.len() / 2;

        if len > FRAME_LEN {
            return Err(FrameParseError::TooLong(len));
        }

        let mut bytes = [0; FRAME_LEN];

        hex::decode_to_slice(digits, &mut bytes[..len]).map_err(|e| match e {
            hex::FromHexError::OddLength => FrameParseError::OddLength,
            hex::FromHexError::InvalidHexCharacter { index, .. } => {
                FrameParseError::InvalidDigit(index)
            }
            hex::FromHexError::InvalidStringLength => FrameParseError::TooLong(len),
        })?;

        Ok(Self(bytes))
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn has_header(&self) -> bool {
        self.0.starts_with(&COMMAND_HEADER)
    }

    #[inline]
    #[must_use]
    pub fn command_class(&self) -> u8 {
        self.0[2]
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::LowerHex for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut digits = [0; FRAME_LEN * 2];
        hex::encode_to_slice(self.0, &mut digits).map_err(|_| fmt::Error)?;
        f.write_str(core::str::from_utf8(&digits).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandFrame")
            .field(&format_args!("{self:x}"))
            .finish()
    }
}

#[derive(Clone, Copy, Debug, ThisError)]
#[cfg_attr(test, derive(PartialEq))]
pub enum FrameParseError {
    #[error("hex frame has an odd number of digits")]
    OddLength,
    #[error("invalid hex digit at position {0}")]
    InvalidDigit(usize),
    #[error("hex frame holds {0} bytes which does not fit in a command frame")]
    TooLong(usize),
}
