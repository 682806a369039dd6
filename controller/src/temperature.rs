//! CPU temperature readings for Smart Mode.

use std::{
    fmt, fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use systemstat::{Platform, System};

/// Plausible CPU temperatures in °C. Readings outside are sensor noise.
pub const PLAUSIBLE_CELSIUS: RangeInclusive<f64> = 20.0..=100.0;

/// Anything able to report the current temperature in °C.
pub trait TemperatureSource: Send {
    fn read_celsius(&mut self) -> Option<f64>;
}

impl<F> TemperatureSource for F
where
    F: FnMut() -> Option<f64> + Send,
{
    fn read_celsius(&mut self) -> Option<f64> {
        self()
    }
}

/// Scans `temp*_input` files of the hwmon sysfs tree.
#[derive(Clone, Debug)]
pub struct HwmonTemperature {
    root: PathBuf,
}

impl HwmonTemperature {
    pub const SYSFS_ROOT: &str = "/sys/class/hwmon";

    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// First plausible reading, in directory name order.
    #[must_use]
    pub fn read(&self) -> Option<f64> {
        sorted_entries(&self.root)
            .iter()
            .flat_map(|chip| sorted_entries(chip))
            .filter(|path| is_temp_input(path))
            .find_map(|path| {
                let millis = fs::read_to_string(&path).ok()?.trim().parse::<i32>().ok()?;
                let celsius = f64::from(millis) / 1000.0;
                PLAUSIBLE_CELSIUS.contains(&celsius).then_some(celsius)
            })
    }
}

impl Default for HwmonTemperature {
    fn default() -> Self {
        Self::new(Self::SYSFS_ROOT)
    }
}

impl TemperatureSource for HwmonTemperature {
    fn read_celsius(&mut self) -> Option<f64> {
        self.read()
    }
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries = fs::read_dir(dir)
        .map(|entries| entries.flatten().map(|e| e.path()).collect::<Vec<_>>())
        .unwrap_or_default();
    entries.sort();
    entries
}

fn is_temp_input(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("temp") && name.ends_with("_input"))
}

/// The CPU temperature as reported by the OS, falling back to hwmon.
pub struct SystemTemperature {
    system: System,
    hwmon: HwmonTemperature,
}

impl SystemTemperature {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
            hwmon: HwmonTemperature::default(),
        }
    }
}

impl Default for SystemTemperature {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTemperature")
            .field("hwmon", &self.hwmon)
            .finish_non_exhaustive()
    }
}

impl TemperatureSource for SystemTemperature {
    fn read_celsius(&mut self) -> Option<f64> {
        match self.system.cpu_temp() {
            Ok(temp) if PLAUSIBLE_CELSIUS.contains(&f64::from(temp)) => return Some(temp.into()),
            Ok(temp) => tracing::trace!("implausible CPU temperature {temp}"),
            Err(e) => tracing::trace!("CPU temperature unavailable: {e}"),
        }

        self.hwmon.read()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{HwmonTemperature, TemperatureSource};

    #[test]
    fn test_hwmon_reads_first_plausible_input() {
        let dir = tempfile::tempdir().unwrap();

        let hwmon0 = dir.path().join("hwmon0");
        fs::create_dir_all(&hwmon0).unwrap();
        fs::write(hwmon0.join("name"), "acpitz").unwrap();
        // Below the plausible range, skipped.
        fs::write(hwmon0.join("temp1_input"), "16800\n").unwrap();

        let hwmon1 = dir.path().join("hwmon1");
        fs::create_dir_all(&hwmon1).unwrap();
        fs::write(hwmon1.join("name"), "k10temp").unwrap();
        fs::write(hwmon1.join("temp1_input"), "45500\n").unwrap();
        fs::write(hwmon1.join("temp2_input"), "61000\n").unwrap();

        let mut source = HwmonTemperature::new(dir.path());
        assert_eq!(source.read_celsius(), Some(45.5));
    }

    #[test]
    fn test_hwmon_without_sensors() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(HwmonTemperature::new(dir.path()).read(), None);

        let hwmon0 = dir.path().join("hwmon0");
        fs::create_dir_all(&hwmon0).unwrap();
        fs::write(hwmon0.join("temp1_input"), "garbage").unwrap();
        fs::write(hwmon0.join("fan1_input"), "1300").unwrap();
        assert_eq!(HwmonTemperature::new(dir.path()).read(), None);

        assert_eq!(HwmonTemperature::new(dir.path().join("missing")).read(), None);
    }

    #[test]
    fn test_closure_source() {
        let mut readings = vec![55.0, 42.0];
        let mut source = move || readings.pop();

        assert_eq!(source.read_celsius(), Some(42.0));
        assert_eq!(source.read_celsius(), Some(55.0));
        assert_eq!(source.read_celsius(), None);
    }
}
