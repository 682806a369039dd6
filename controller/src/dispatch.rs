//! Sending command frames to the pad.

use std::{fmt, sync::Arc, time::Duration};

use shared::{Command, CommandFrame, FRAME_LEN, FanSpeed, is_status_frame};
use tracing::instrument;

use crate::{
    DeviceError,
    hid::{HidBackend, HidHandle as _},
    retry::RetryPolicy,
    session::{DeviceSession, read_report},
};

/// How a status message should be presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Success,
    Danger,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Danger => "danger",
            Self::Warning => "warning",
            Self::Info => "info",
        };

        f.write_str(name)
    }
}

/// Receives human readable outcomes of dispatched commands.
pub trait StatusSink {
    fn report(&self, message: &str, severity: Severity);
}

impl<F> StatusSink for F
where
    F: Fn(&str, Severity),
{
    fn report(&self, message: &str, severity: Severity) {
        self(message, severity);
    }
}

#[derive(Debug)]
pub struct CommandDispatcher<B: HidBackend> {
    session: Arc<DeviceSession<B>>,
    policy: RetryPolicy,
    ack_timeout: Duration,
}

impl<B: HidBackend> CommandDispatcher<B> {
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);
    /// Upper bound on the ack wait while the telemetry reader shares the handle.
    pub const SHARED_ACK_TIMEOUT: Duration = Duration::from_millis(50);

    #[must_use]
    pub fn new(session: Arc<DeviceSession<B>>) -> Self {
        Self {
            session,
            policy: RetryPolicy::default(),
            ack_timeout: Self::DEFAULT_ACK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    #[must_use]
    pub fn session(&self) -> &Arc<DeviceSession<B>> {
        &self.session
    }

    /// Writes `frame` to the pad and waits briefly for an acknowledgement.
    ///
    /// Uses the shared handle while the session is in shared mode and a
    /// private handle otherwise. Transient failures are retried according to
    /// the [`RetryPolicy`]. The sink hears about the outcome exactly once.
    #[instrument(skip_all, fields(frame = %frame))]
    pub fn send(&self, frame: &CommandFrame, sink: Option<&dyn StatusSink>) -> bool {
        let result = self.policy.run(
            |attempt| {
                tracing::trace!("attempt {attempt}");
                self.attempt(frame)
            },
            DeviceError::is_retryable,
        );

        match result {
            Ok(()) => {
                tracing::info!("command sent");
                notify(sink, "Command sent successfully", Severity::Success);
                true
            }
            Err(e) => {
                tracing::error!("command failed: {e}");
                notify(sink, &e.to_string(), Severity::Danger);
                false
            }
        }
    }

    /// Sends every frame of `command`, stopping at the first failure.
    pub fn send_command(&self, command: Command, sink: Option<&dyn StatusSink>) -> bool {
        tracing::debug!("sending {command}");

        command
            .frames()
            .iter()
            .all(|hex| match CommandFrame::from_hex(hex) {
                Ok(frame) => self.send(&frame, sink),
                Err(e) => {
                    tracing::error!("invalid frame for {command}: {e}");
                    notify(sink, &format!("Invalid frame for {command}"), Severity::Danger);
                    false
                }
            })
    }

    pub fn set_speed(&self, speed: FanSpeed, sink: Option<&dyn StatusSink>) -> bool {
        tracing::debug!("setting fan speed to {} RPM", speed.rpm());

        match CommandFrame::from_hex(speed.frame()) {
            Ok(frame) => self.send(&frame, sink),
            Err(e) => {
                tracing::error!("invalid frame for {} RPM: {e}", speed.rpm());
                notify(sink, "Invalid fan speed frame", Severity::Danger);
                false
            }
        }
    }

    fn attempt(&self, frame: &CommandFrame) -> Result<(), DeviceError> {
        match self.session.try_shared(|handle| handle.write(frame.as_bytes())) {
            Some(Ok(_)) => {
                self.shared_ack();
                Ok(())
            }
            Some(Err(e)) => {
                self.session.close();
                Err(e)
            }
            None => {
                let mut handle = self.session.open_private()?;
                handle.write(frame.as_bytes())?;
                log_ack(read_report(&mut handle, FRAME_LEN, self.ack_timeout));
                Ok(())
            }
        }
    }

    /// Reads the ack on the shared handle in its own transaction. Status
    /// reports picked up here belong to the telemetry reader and are handed
    /// back to the session.
    fn shared_ack(&self) {
        let timeout = self.ack_timeout.min(Self::SHARED_ACK_TIMEOUT);

        match self
            .session
            .try_shared(|handle| read_report(handle, FRAME_LEN, timeout))
        {
            Some(Ok(Some(report))) if is_status_frame(&report) => {
                tracing::trace!("status report in place of ack");
                self.session.unread(report);
            }
            Some(ack) => log_ack(ack),
            None => tracing::trace!("shared mode ended before the ack"),
        }
    }
}

// The pad does not always answer; a missing ack is not a failure.
fn log_ack(ack: Result<Option<Vec<u8>>, DeviceError>) {
    match ack {
        Ok(Some(ack)) => tracing::trace!("ack: {ack:02x?}"),
        Ok(None) => tracing::trace!("no ack"),
        Err(e) => tracing::debug!("ack read failed: {e}"),
    }
}

fn notify(sink: Option<&dyn StatusSink>, message: &str, severity: Severity) {
    if let Some(sink) = sink {
        sink.report(message, severity);
    }
}
