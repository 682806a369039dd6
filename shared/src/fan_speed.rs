use thiserror::Error as ThisError;

/// Fan speeds the pad firmware accepts as setpoints, slowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(test, derive(strum::EnumIter))]
pub enum FanSpeed {
    Rpm1300,
    Rpm1700,
    Rpm1900,
    Rpm2100,
    Rpm2400,
    Rpm2700,
}

impl FanSpeed {
    pub const ALL: [Self; 6] = [
        Self::Rpm1300,
        Self::Rpm1700,
        Self::Rpm1900,
        Self::Rpm2100,
        Self::Rpm2400,
        Self::Rpm2700,
    ];

    #[must_use]
    pub fn rpm(self) -> u32 {
        match self {
            Self::Rpm1300 => 1300,
            Self::Rpm1700 => 1700,
            Self::Rpm1900 => 1900,
            Self::Rpm2100 => 2100,
            Self::Rpm2400 => 2400,
            Self::Rpm2700 => 2700,
        }
    }

    /// Hex literal of the setpoint frame.
    #[must_use]
    pub fn frame(self) -> &'static str {
        match self {
            Self::Rpm1300 => "5aa52605001405440000000000000000000000000000000000000000000000",
            Self::Rpm1700 => "5aa5260500a406d50000000000000000000000000000000000000000000000",
            Self::Rpm1900 => "5aa52605006c079e0000000000000000000000000000000000000000000000",
            Self::Rpm2100 => "5aa52605013408680000000000000000000000000000000000000000000000",
            Self::Rpm2400 => "5aa52605016009950000000000000000000000000000000000000000000000",
            Self::Rpm2700 => "5aa52605018c0ac20000000000000000000000000000000000000000000000",
        }
    }
}

impl From<FanSpeed> for u32 {
    fn from(value: FanSpeed) -> Self {
        value.rpm()
    }
}

impl TryFrom<u32> for FanSpeed {
    type Error = FanSpeedConvError;

    fn try_from(rpm: u32) -> Result<Self, Self::Error> {
        match rpm {
            1300 => Ok(Self::Rpm1300),
            1700 => Ok(Self::Rpm1700),
            1900 => Ok(Self::Rpm1900),
            2100 => Ok(Self::Rpm2100),
            2400 => Ok(Self::Rpm2400),
            2700 => Ok(Self::Rpm2700),
            _ => Err(FanSpeedConvError(rpm)),
        }
    }
}

#[derive(Clone, Copy, Debug, ThisError)]
#[cfg_attr(test, derive(PartialEq))]
#[error("no fan speed setpoint for {0} RPM")]
pub struct FanSpeedConvError(pub u32);
