use std::{
    num::ParseIntError,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context as _, anyhow, ensure};
use clap::{ArgAction, Parser, Subcommand};
use controller::{
    AnyResult, CommandDispatcher, DeviceSession, FanCurveController, HidApiBackend, MonitorConfig,
    RangeSet, Severity, SmartConfig, SmartMode, SystemTemperature, TelemetryMonitor, find_device,
    logging, udev,
};
use shared::{Command, CommandFrame, FanSpeed, RpmDecoder};

/// Control the BS2PRO cooling pad.
#[derive(Debug, Parser)]
#[command(name = "bs2pro", version, about)]
struct Cli {
    /// Increase logging verbosity, repeat for more.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Log to the systemd journal instead of stderr.
    #[arg(long, global = true)]
    journald: bool,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Show the detected pad.
    Detect,
    /// Send a settings command, such as `rpm_on` or `autostart_delayed`.
    Send { command: Command },
    /// Set a fixed fan speed.
    Rpm {
        #[arg(value_parser = parse_speed)]
        rpm: FanSpeed,
    },
    /// Send a raw frame given as hex.
    Raw { hex: String },
    /// Print fan speed reports.
    Monitor {
        /// Stop after this many seconds instead of running until interrupted.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Drive the fan speed from the CPU temperature.
    Smart {
        /// Smart Mode settings file with the temperature ranges. Nothing
        /// runs if the file has Smart Mode disabled.
        #[arg(long)]
        ranges: Option<PathBuf>,
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Print udev rules giving regular users access to the pad.
    UdevRules,
}

fn parse_speed(value: &str) -> Result<FanSpeed, String> {
    let rpm: u32 = value.parse().map_err(|e: ParseIntError| e.to_string())?;

    FanSpeed::try_from(rpm).map_err(|e| {
        let supported = FanSpeed::ALL.map(|speed| speed.rpm().to_string());
        format!("{e}, supported speeds: {}", supported.join(", "))
    })
}

/// Temperature ranges for Smart Mode, or `None` if the settings file has it
/// disabled.
fn smart_ranges(path: Option<&Path>) -> AnyResult<Option<RangeSet>> {
    let Some(path) = path else {
        return Ok(Some(RangeSet::default()));
    };

    let (ranges, enabled) = RangeSet::load(path)?;
    Ok(enabled.then_some(ranges))
}

fn print_status(message: &str, severity: Severity) {
    match severity {
        Severity::Danger | Severity::Warning => eprintln!("{severity}: {message}"),
        Severity::Success | Severity::Info => println!("{message}"),
    }
}

fn wait(seconds: Option<u64>) {
    match seconds {
        Some(seconds) => thread::sleep(Duration::from_secs(seconds)),
        None => loop {
            thread::park();
        },
    }
}

fn main() -> AnyResult<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.journald)?;

    let backend = HidApiBackend::new()?;
    let session = Arc::new(DeviceSession::new(backend));
    let dispatcher = Arc::new(CommandDispatcher::new(session.clone()));
    let sink = &print_status;

    match cli.action {
        Action::Detect => {
            let located = find_device(session.backend(), session.rules())
                .ok_or_else(|| anyhow!("no BS2PRO device found"))?;
            let descriptor = &located.descriptor;

            println!("{descriptor}");
            println!("  manufacturer: {}", descriptor.manufacturer_string);
            println!("  path: {}", descriptor.path.as_deref().unwrap_or("unknown"));
            println!("  match: {}", located.confidence);
        }
        Action::Send { command } => {
            ensure!(dispatcher.send_command(command, Some(sink)), "sending {command} failed");
        }
        Action::Rpm { rpm } => {
            ensure!(dispatcher.set_speed(rpm, Some(sink)), "setting {} RPM failed", rpm.rpm());
        }
        Action::Raw { hex } => {
            let frame = CommandFrame::from_hex(&hex).context("invalid frame")?;
            ensure!(dispatcher.send(&frame, Some(sink)), "sending frame failed");
        }
        Action::Monitor { seconds } => {
            let monitor =
                TelemetryMonitor::new(session, RpmDecoder::default(), MonitorConfig::default());
            monitor.subscribe(|rpm| {
                println!("{rpm} RPM");
                Ok(())
            });

            monitor.start()?;
            wait(seconds);
            monitor.stop();
        }
        Action::Smart { ranges, seconds } => {
            let Some(ranges) = smart_ranges(ranges.as_deref())? else {
                tracing::warn!("Smart Mode is disabled in the settings file");
                eprintln!("Smart Mode is disabled in the settings file, not starting");
                return Ok(());
            };

            for range in ranges.ranges() {
                tracing::info!(
                    "{}..{}°C: {} RPM {}",
                    range.min_temp,
                    range.max_temp,
                    range.rpm,
                    range.description
                );
            }

            let monitor = TelemetryMonitor::new(
                session.clone(),
                RpmDecoder::default(),
                MonitorConfig::default(),
            );
            monitor.subscribe(|rpm| {
                println!("{rpm} RPM");
                Ok(())
            });

            let smart = SmartMode::new(FanCurveController::new(ranges, SmartConfig::default()));

            monitor.start()?;
            smart.start(dispatcher, SystemTemperature::new())?;
            wait(seconds);
            smart.stop();
            monitor.stop();
        }
        Action::UdevRules => {
            let descriptor = session.locate()?;

            eprintln!(
                "# save as {}/{}",
                udev::RULES_DIR,
                udev::rules_file_name(descriptor.vendor_id, descriptor.product_id)
            );
            print!("{}", udev::rules_for(descriptor.vendor_id, descriptor.product_id));
        }
    }

    Ok(())
}
