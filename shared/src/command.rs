use core::{fmt, str::FromStr};

use thiserror::Error as ThisError;

/// Settings commands that the pad understands, besides fan speed.
///
/// Each command maps to one or more literal frames which are sent in order.
/// The pad firmware does not toggle anything on its own, so on/off pairs are
/// separate commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(test, derive(strum::EnumIter))]
pub enum Command {
    // Shows the measured fan speed on the pad display.
    RpmIndicatorOn,
    // Hides the measured fan speed.
    RpmIndicatorOff,
    // Pad stays off when the host powers up.
    AutostartOff,
    // Pad spins up together with the host.
    AutostartInstant,
    // Pad spins up a few seconds after the host.
    AutostartDelayed,
    // Pad starts as soon as USB power is present.
    StartWhenPoweredOn,
    // Pad waits for the power button after USB power is present.
    StartWhenPoweredOff,
}

impl Command {
    pub const ALL: [Self; 7] = [
        Self::RpmIndicatorOn,
        Self::RpmIndicatorOff,
        Self::AutostartOff,
        Self::AutostartInstant,
        Self::AutostartDelayed,
        Self::StartWhenPoweredOn,
        Self::StartWhenPoweredOff,
    ];

    /// Symbolic name used on the command line.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RpmIndicatorOn => "rpm_on",
            Self::RpmIndicatorOff => "rpm_off",
            Self::AutostartOff => "autostart_off",
            Self::AutostartInstant => "autostart_instant",
            Self::AutostartDelayed => "autostart_delayed",
            Self::StartWhenPoweredOn => "startwhenpowered_on",
            Self::StartWhenPoweredOff => "startwhenpowered_off",
        }
    }

    /// Hex literals of the frames making up the command, in sending order.
    #[must_use]
    pub fn frames(self) -> &'static [&'static str] {
        match self {
            Self::RpmIndicatorOn => {
                &["5aa54803014c00000000000000000000000000000000000000000000000000"]
            }
            Self::RpmIndicatorOff => {
                &["5aa54803004b00000000000000000000000000000000000000000000000000"]
            }
            Self::AutostartOff => {
                &["5aa50d03001000000000000000000000000000000000000000000000000000"]
            }
            Self::AutostartInstant => {
                &["5aa50d03011100000000000000000000000000000000000000000000000000"]
            }
            Self::AutostartDelayed => {
                &["5aa50d03021200000000000000000000000000000000000000000000000000"]
            }
            Self::StartWhenPoweredOn => {
                &["5aa50c03011000000000000000000000000000000000000000000000000000"]
            }
            Self::StartWhenPoweredOff => &[
                "5aa50c03011000000000000000000000000000000000000000000000000000",
                "5aa50c03021100000000000000000000000000000000000000000000000000",
            ],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = CommandNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.name().eq_ignore_ascii_case(s.trim()))
            .ok_or(CommandNameError)
    }
}

#[derive(Clone, Copy, Debug, ThisError)]
#[cfg_attr(test, derive(PartialEq))]
#[error("unknown command name")]
pub struct CommandNameError;
