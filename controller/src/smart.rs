//! Temperature driven fan speed selection ("Smart Mode").
//!
//! [`FanCurveController`] maps temperature samples to fan speeds. Rising
//! temperatures take effect on the sample that reports them. Falling
//! temperatures only take effect once they held for
//! [`SmartConfig::decrease_delay`], and changes below
//! [`SmartConfig::hysteresis`] are ignored, so the fans do not oscillate
//! around a range boundary.

use std::{
    cmp::Ordering as CmpOrdering,
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::FanSpeed;
use thiserror::Error as ThisError;

use crate::{
    AnyResult, dispatch::CommandDispatcher, hid::HidBackend, temperature::TemperatureSource,
};

/// Half-open temperature interval `[min_temp, max_temp)` and its fan speed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub min_temp: f64,
    pub max_temp: f64,
    pub rpm: u32,
    #[serde(default)]
    pub description: String,
}

impl TemperatureRange {
    #[must_use]
    pub fn new(min_temp: f64, max_temp: f64, rpm: u32, description: &str) -> Self {
        Self {
            min_temp,
            max_temp,
            rpm,
            description: description.to_owned(),
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, temp: f64) -> bool {
        self.min_temp <= temp && temp < self.max_temp
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> f64 {
        f64::midpoint(self.min_temp, self.max_temp)
    }
}

#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum RangeSetError {
    #[error("no temperature ranges configured")]
    Empty,
    #[error("range {index} does not end after it starts")]
    Inverted { index: usize },
}

/// Non-empty list of temperature ranges, sorted by their lower bound.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RangeSet(Vec<TemperatureRange>);

/// On-disk Smart Mode settings.
#[derive(Debug, Serialize, Deserialize)]
struct SmartModeFile {
    #[serde(default)]
    enabled: bool,
    temperature_ranges: Vec<TemperatureRange>,
}

impl RangeSet {
    /// # Errors
    pub fn new(mut ranges: Vec<TemperatureRange>) -> Result<Self, RangeSetError> {
        if ranges.is_empty() {
            return Err(RangeSetError::Empty);
        }

        if let Some(index) = ranges.iter().position(|r| r.min_temp >= r.max_temp) {
            return Err(RangeSetError::Inverted { index });
        }

        ranges.sort_by(|a, b| a.min_temp.total_cmp(&b.min_temp));
        Ok(Self(ranges))
    }

    /// Reads a Smart Mode settings file, returning its ranges and whether
    /// Smart Mode was left enabled.
    ///
    /// # Errors
    pub fn load(path: &Path) -> AnyResult<(Self, bool)> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;

        let file: SmartModeFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;

        let ranges = Self::new(file.temperature_ranges)
            .with_context(|| format!("validating {}", path.display()))?;

        Ok((ranges, file.enabled))
    }

    /// # Errors
    pub fn save(&self, path: &Path, enabled: bool) -> AnyResult<()> {
        let file = SmartModeFile {
            enabled,
            temperature_ranges: self.0.clone(),
        };

        let content = serde_json::to_string_pretty(&file).context("serializing ranges")?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))
    }

    /// Adds a range, keeping the set sorted.
    ///
    /// # Errors
    pub fn insert(&mut self, range: TemperatureRange) -> Result<(), RangeSetError> {
        if range.min_temp >= range.max_temp {
            return Err(RangeSetError::Inverted {
                index: self.0.len(),
            });
        }

        let index = self
            .0
            .partition_point(|r| r.min_temp.total_cmp(&range.min_temp) != CmpOrdering::Greater);
        self.0.insert(index, range);
        Ok(())
    }

    #[must_use]
    pub fn ranges(&self) -> &[TemperatureRange] {
        &self.0
    }

    /// The range containing `temp`, if any.
    #[must_use]
    pub fn range_for(&self, temp: f64) -> Option<&TemperatureRange> {
        self.0.iter().find(|r| r.contains(temp))
    }

    /// Fan speed for `temp`.
    ///
    /// Temperatures outside every range are clamped: below the set they get
    /// the lowest speed, above it the highest, and in a gap between ranges
    /// the speed of the range whose center is closest.
    #[must_use]
    pub fn target_rpm(&self, temp: f64) -> u32 {
        if let Some(range) = self.range_for(temp) {
            return range.rpm;
        }

        let lowest = self.0.iter().map(|r| r.min_temp).fold(f64::INFINITY, f64::min);
        let highest = self
            .0
            .iter()
            .map(|r| r.max_temp)
            .fold(f64::NEG_INFINITY, f64::max);

        if temp < lowest {
            return self.0.iter().map(|r| r.rpm).min().unwrap_or_default();
        }

        if temp >= highest {
            return self.0.iter().map(|r| r.rpm).max().unwrap_or_default();
        }

        self.0
            .iter()
            .min_by(|a, b| {
                let da = (a.center() - temp).abs();
                let db = (b.center() - temp).abs();
                da.total_cmp(&db)
            })
            .map(|r| r.rpm)
            .unwrap_or_default()
    }
}

impl Default for RangeSet {
    fn default() -> Self {
        Self(vec![
            TemperatureRange::new(0.0, 50.0, 1300, "Low temperature"),
            TemperatureRange::new(50.0, 60.0, 1700, "Normal temperature"),
            TemperatureRange::new(60.0, 70.0, 1900, "Warm temperature"),
            TemperatureRange::new(70.0, 80.0, 2100, "Hot temperature"),
            TemperatureRange::new(80.0, 100.0, 2700, "Very hot temperature"),
        ])
    }
}

impl<'de> Deserialize<'de> for RangeSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let ranges = Vec::<TemperatureRange>::deserialize(deserializer)?;
        Self::new(ranges).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmartConfig {
    /// Smallest temperature change, in °C, that is acted upon.
    pub hysteresis: f64,
    /// How long a lower fan speed must be wanted before it is applied.
    pub decrease_delay: Duration,
    pub sample_interval: Duration,
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            hysteresis: 1.0,
            decrease_delay: Duration::from_secs(10),
            sample_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingDecrease {
    pub rpm: u32,
    pub since: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControllerState {
    pub last_temperature: Option<f64>,
    pub last_rpm: Option<u32>,
    pub pending: Option<PendingDecrease>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Disabled,
    Stable,
    PendingDecrease,
}

/// Outcome of feeding one sample to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// The controller is disabled or the sample was unusable.
    Idle,
    /// Keep the current fan speed.
    Hold(u32),
    /// The fan speed changed and should be sent to the pad.
    Apply(u32),
}

#[derive(Debug)]
pub struct FanCurveController {
    ranges: RangeSet,
    config: SmartConfig,
    enabled: bool,
    state: ControllerState,
}

impl FanCurveController {
    #[must_use]
    pub fn new(ranges: RangeSet, config: SmartConfig) -> Self {
        Self {
            ranges,
            config,
            enabled: false,
            state: ControllerState::default(),
        }
    }

    /// Starts reacting to samples. Forgets earlier state when the
    /// controller was disabled.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.state = ControllerState::default();
            self.enabled = true;
            tracing::info!("smart mode enabled");
        }
    }

    /// Stops reacting to samples. The fan speed last applied stays in
    /// effect on the pad.
    pub fn disable(&mut self) {
        if self.enabled {
            self.enabled = false;
            tracing::info!("smart mode disabled");
        }
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match (self.enabled, self.state.pending) {
            (false, _) => Phase::Disabled,
            (true, None) => Phase::Stable,
            (true, Some(_)) => Phase::PendingDecrease,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    #[must_use]
    pub fn ranges(&self) -> &RangeSet {
        &self.ranges
    }

    #[must_use]
    pub fn config(&self) -> &SmartConfig {
        &self.config
    }

    /// Feeds a temperature sample taken at `now`.
    pub fn sample(&mut self, temp: f64, now: Instant) -> Step {
        if !self.enabled {
            return Step::Idle;
        }

        if !temp.is_finite() {
            tracing::warn!("ignoring temperature sample {temp}");
            return Step::Idle;
        }

        let mut applied = false;

        if let Some(pending) = self.state.pending {
            if now.saturating_duration_since(pending.since) >= self.config.decrease_delay {
                tracing::debug!("decrease delay elapsed, applying {} RPM", pending.rpm);
                self.state.last_rpm = Some(pending.rpm);
                self.state.pending = None;
                applied = true;
            }
        }

        let target = self.ranges.target_rpm(temp);

        let Some(last_rpm) = self.state.last_rpm else {
            self.state.last_temperature = Some(temp);
            self.state.last_rpm = Some(target);
            tracing::debug!("{temp:.1}°C: starting at {target} RPM");
            return Step::Apply(target);
        };

        let current = if applied {
            Step::Apply(last_rpm)
        } else {
            Step::Hold(last_rpm)
        };

        if self.state.pending.is_none() {
            if let Some(last_temp) = self.state.last_temperature {
                if (temp - last_temp).abs() < self.config.hysteresis {
                    return current;
                }
            }
        }

        self.state.last_temperature = Some(temp);

        match target.cmp(&last_rpm) {
            CmpOrdering::Greater => {
                if self.state.pending.take().is_some() {
                    tracing::debug!("pending decrease cancelled");
                }

                self.state.last_rpm = Some(target);
                tracing::debug!("{temp:.1}°C: increasing to {target} RPM");
                Step::Apply(target)
            }
            CmpOrdering::Less => {
                match self.state.pending {
                    Some(pending) if pending.rpm == target => (),
                    _ => {
                        tracing::debug!(
                            "{temp:.1}°C: decreasing to {target} RPM in {:?}",
                            self.config.decrease_delay
                        );
                        self.state.pending = Some(PendingDecrease {
                            rpm: target,
                            since: now,
                        });
                    }
                }

                current
            }
            CmpOrdering::Equal => {
                if self.state.pending.take().is_some() {
                    tracing::debug!("{temp:.1}°C: pending decrease cancelled");
                }

                current
            }
        }
    }
}

/// Samples a [`TemperatureSource`] on a background thread and sends the
/// speeds chosen by a [`FanCurveController`] to the pad.
pub struct SmartMode {
    controller: Arc<Mutex<FanCurveController>>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SmartMode {
    #[must_use]
    pub fn new(controller: FanCurveController) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            stop: Arc::default(),
            worker: Mutex::default(),
        }
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<Mutex<FanCurveController>> {
        &self.controller
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Enables the controller and spawns the sampling thread.
    /// Does nothing if Smart Mode is already running.
    ///
    /// # Errors
    pub fn start<B, T>(&self, dispatcher: Arc<CommandDispatcher<B>>, mut source: T) -> AnyResult<()>
    where
        B: HidBackend + 'static,
        T: TemperatureSource + 'static,
    {
        let mut worker = self.worker.lock();

        if worker.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::Release);
        self.controller.lock().enable();

        let controller = self.controller.clone();
        let stop = self.stop.clone();

        let handle = thread::Builder::new()
            .name("smart-mode".to_owned())
            .spawn(move || {
                let interval = controller.lock().config().sample_interval;

                while !stop.load(Ordering::Acquire) {
                    let step = match source.read_celsius() {
                        Some(temp) => controller.lock().sample(temp, Instant::now()),
                        None => {
                            tracing::debug!("no temperature reading");
                            Step::Idle
                        }
                    };

                    if let Step::Apply(rpm) = step {
                        apply_rpm(&dispatcher, rpm);
                    }

                    thread::park_timeout(interval);
                }

                controller.lock().disable();
            })
            .context("spawning smart mode thread")?;

        *worker = Some(handle);
        Ok(())
    }

    /// Stops the sampling thread and disables the controller.
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();

        if handle.join().is_err() {
            tracing::error!("smart mode thread panicked");
            self.controller.lock().disable();
        }
    }
}

impl Drop for SmartMode {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SmartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartMode")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn apply_rpm<B: HidBackend>(dispatcher: &CommandDispatcher<B>, rpm: u32) {
    match FanSpeed::try_from(rpm) {
        Ok(speed) => {
            dispatcher.set_speed(speed, None);
        }
        Err(e) => tracing::warn!("cannot apply {rpm} RPM: {e}"),
    }
}
