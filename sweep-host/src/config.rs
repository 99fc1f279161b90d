//! TOML configuration for `dect-sweep`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sweep_core::ack::AckConfig;
use sweep_core::emulator::{ChannelType, DEFAULT_CONFIRM_TIMEOUT, DEFAULT_STABILIZATION_DELAY};
use sweep_core::error::SweepConfigError;
use sweep_core::link::LinkConfig;
use sweep_core::orchestrator::EngineConfig;
use sweep_core::sequences::SessionTiming;
use sweep_core::sweep::{
    DEFAULT_CLIENT_DELAY, DEFAULT_COOLDOWN, DEFAULT_MEASUREMENT_DURATION,
    DEFAULT_MEASUREMENT_GRACE, Snr, SnrRange, SweepPlan, SweepTiming, Tier,
};
use sweep_core::watchdog::{DEFAULT_CHECK_INTERVAL, DEFAULT_STALL_MULTIPLIER, WatchdogConfig};

use crate::error::HostError;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub ports: PortsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub ack: AckSection,
    #[serde(default)]
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub emulator: EmulatorSection,
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortsConfig {
    pub server: String,
    pub client: String,
}

/// Row layout written per sweep point.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CsvMode {
    /// One `sent,received,snr,mcs` row per point.
    Summary,
    /// One `record,snr,mcs` row per measurement record.
    #[default]
    Records,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub mode: CsvMode,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            mode: CsvMode::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeasurementConfig {
    pub duration_secs: u64,
    pub client_delay_ms: u64,
    pub grace_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_MEASUREMENT_DURATION.as_secs(),
            client_delay_ms: millis(DEFAULT_CLIENT_DELAY),
            grace_ms: millis(DEFAULT_MEASUREMENT_GRACE),
            cooldown_ms: millis(DEFAULT_COOLDOWN),
        }
    }
}

/// Serial settings and the DTR sequence delays.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkSection {
    pub baud_rate: u32,
    pub open_attempts: u8,
    pub open_backoff_ms: u64,
    pub reset_dtr_low_ms: u64,
    pub reset_dtr_high_ms: u64,
    pub start_settle_ms: u64,
    pub stop_settle_ms: u64,
    pub stop_dtr_low_ms: u64,
    pub stop_dtr_high_ms: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        let link = LinkConfig::default();
        let timing = SessionTiming::default();
        Self {
            baud_rate: link.baud_rate,
            open_attempts: link.open_attempts,
            open_backoff_ms: millis(link.open_backoff),
            reset_dtr_low_ms: millis(timing.reset_dtr_low),
            reset_dtr_high_ms: millis(timing.reset_dtr_high),
            start_settle_ms: millis(timing.start_settle),
            stop_settle_ms: millis(timing.stop_settle),
            stop_dtr_low_ms: millis(timing.stop_dtr_low),
            stop_dtr_high_ms: millis(timing.stop_dtr_high),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AckSection {
    pub quiet_ms: u64,
    pub deadline_ms: u64,
}

impl Default for AckSection {
    fn default() -> Self {
        let ack = AckConfig::default();
        Self {
            quiet_ms: millis(ack.quiet_period),
            deadline_ms: millis(ack.deadline),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogSection {
    pub check_interval_secs: u64,
    /// Silence threshold as a multiple of the measurement duration.
    pub multiplier: f64,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL.as_secs(),
            multiplier: DEFAULT_STALL_MULTIPLIER,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmulatorSection {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub channel: String,
    pub stabilization_ms: u64,
    pub confirm_timeout_secs: u64,
}

impl Default for EmulatorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            program: String::from("python3"),
            args: vec![String::from("channel_emulator.py")],
            channel: String::from(ChannelType::Awgn.as_str()),
            stabilization_ms: millis(DEFAULT_STABILIZATION_DELAY),
            confirm_timeout_secs: DEFAULT_CONFIRM_TIMEOUT.as_secs(),
        }
    }
}

/// One `[[tiers]]` entry; SNR values in dB.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    pub mcs: u8,
    pub snr_min: f64,
    pub snr_max: f64,
    #[serde(default = "default_snr_step")]
    pub snr_step: f64,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn default_snr_step() -> f64 {
    1.0
}

fn enabled() -> bool {
    true
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl HostConfig {
    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// I/O failures and TOML syntax or schema errors.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let text = fs::read_to_string(path).map_err(|source| HostError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| HostError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// TOML syntax or schema errors.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn channel(&self) -> Result<ChannelType, HostError> {
        self.emulator
            .channel
            .parse()
            .map_err(|_| HostError::UnknownChannel(self.emulator.channel.clone()))
    }

    /// Validated plan from the enabled tiers.
    ///
    /// # Errors
    ///
    /// Any [`SweepConfigError`], including a non-finite SNR bound.
    pub fn plan(&self) -> Result<SweepPlan, SweepConfigError> {
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in self.tiers.iter().filter(|tier| tier.enabled) {
            let bound = |value: f64| {
                Snr::from_db(value).ok_or(SweepConfigError::NonFiniteBound { mcs: tier.mcs })
            };
            tiers.push(Tier::new(
                tier.mcs,
                SnrRange::new(
                    bound(tier.snr_min)?,
                    bound(tier.snr_max)?,
                    bound(tier.snr_step)?,
                ),
            ));
        }
        SweepPlan::new(&tiers)
    }

    /// Engine configuration. The plan is attached only when the tiers
    /// validate; `sweep start` reports the problem otherwise.
    ///
    /// # Errors
    ///
    /// An unknown emulator channel name, or a `[watchdog]` section that
    /// cannot schedule checks.
    pub fn engine(&self) -> Result<EngineConfig, HostError> {
        let mut config = EngineConfig::new(&self.ports.server, &self.ports.client);

        config.link = LinkConfig {
            baud_rate: self.link.baud_rate,
            open_attempts: self.link.open_attempts,
            open_backoff: Duration::from_millis(self.link.open_backoff_ms),
        };
        config.session = SessionTiming {
            reset_dtr_low: Duration::from_millis(self.link.reset_dtr_low_ms),
            reset_dtr_high: Duration::from_millis(self.link.reset_dtr_high_ms),
            start_settle: Duration::from_millis(self.link.start_settle_ms),
            stop_settle: Duration::from_millis(self.link.stop_settle_ms),
            stop_dtr_low: Duration::from_millis(self.link.stop_dtr_low_ms),
            stop_dtr_high: Duration::from_millis(self.link.stop_dtr_high_ms),
        };
        config.ack = AckConfig {
            quiet_period: Duration::from_millis(self.ack.quiet_ms),
            deadline: Duration::from_millis(self.ack.deadline_ms),
        };
        config.sweep = SweepTiming {
            measurement: Duration::from_secs(self.measurement.duration_secs),
            client_delay: Duration::from_millis(self.measurement.client_delay_ms),
            grace: Duration::from_millis(self.measurement.grace_ms),
            cooldown: Duration::from_millis(self.measurement.cooldown_ms),
            stabilization: Duration::from_millis(self.emulator.stabilization_ms),
        };
        config.watchdog = WatchdogConfig::new(
            Duration::from_secs(self.watchdog.check_interval_secs),
            config.sweep.measurement,
            self.watchdog.multiplier,
        )?;
        config.emulator.enabled = self.emulator.enabled;
        config.emulator.channel = self.channel()?;
        config.emulator.confirm_timeout = Duration::from_secs(self.emulator.confirm_timeout_secs);
        config.plan = self.plan().ok();

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use sweep_core::error::WatchdogConfigError;

    const SAMPLE: &str = r#"
[ports]
server = "/dev/ttyACM0"
client = "/dev/ttyACM1"

[output]
data_dir = "runs"
mode = "summary"

[measurement]
duration_secs = 30

[watchdog]
multiplier = 2.0

[emulator]
enabled = true
channel = "tdl-c"

[[tiers]]
mcs = 1
snr_min = 2.0
snr_max = 4.0

[[tiers]]
mcs = 0
snr_min = -1.5
snr_max = 0.5
snr_step = 0.5

[[tiers]]
mcs = 3
snr_min = 0.0
snr_max = 1.0
enabled = false
"#;

    #[test]
    fn parses_sections_and_applies_defaults() {
        let config = HostConfig::parse(SAMPLE).expect("sample parses");
        assert_eq!(config.output.mode, CsvMode::Summary);
        assert_eq!(config.output.data_dir, PathBuf::from("runs"));
        assert_eq!(config.link.baud_rate, 115_200);
        assert_eq!(config.ack.deadline_ms, 5_000);

        let engine = config.engine().expect("engine config");
        assert_eq!(engine.sweep.measurement, Duration::from_secs(30));
        assert_eq!(engine.watchdog.threshold, Duration::from_secs(60));
        assert_eq!(engine.watchdog.check_interval, Duration::from_secs(20));
        assert_eq!(engine.emulator.channel, ChannelType::TdlC);
        assert_eq!(engine.session.reset_dtr_high, Duration::from_millis(300));
    }

    #[test]
    fn disabled_tiers_are_skipped_and_plan_is_ordered() {
        let config = HostConfig::parse(SAMPLE).expect("sample parses");
        let plan = config.plan().expect("valid plan");
        let points: Vec<String> = plan.points().map(|point| point.to_string()).collect();
        assert_eq!(
            points,
            [
                "mcs 0 / snr -1.5 dB",
                "mcs 0 / snr -1 dB",
                "mcs 0 / snr -0.5 dB",
                "mcs 0 / snr 0 dB",
                "mcs 0 / snr 0.5 dB",
                "mcs 1 / snr 2 dB",
                "mcs 1 / snr 3 dB",
                "mcs 1 / snr 4 dB",
            ]
        );
    }

    #[test]
    fn invalid_tiers_leave_the_engine_without_a_plan() {
        let text = r#"
[ports]
server = "a"
client = "b"

[[tiers]]
mcs = 2
snr_min = 5.0
snr_max = 1.0
"#;
        let config = HostConfig::parse(text).expect("parses");
        assert_eq!(config.plan(), Err(SweepConfigError::EmptyRange { mcs: 2 }));
        assert!(config.engine().expect("engine").plan.is_none());
    }

    #[test]
    fn rejects_unknown_keys_and_channels() {
        assert!(HostConfig::parse("[ports]\nserver = \"a\"\nclient = \"b\"\nbogus = 1\n").is_err());

        let config =
            HostConfig::parse("[ports]\nserver = \"a\"\nclient = \"b\"\n[emulator]\nchannel = \"rayleigh\"\n")
                .expect("parses");
        assert!(matches!(config.engine(), Err(HostError::UnknownChannel(name)) if name == "rayleigh"));
    }

    #[test]
    fn rejects_unusable_watchdog_settings() {
        let base = "[ports]\nserver = \"a\"\nclient = \"b\"\n[watchdog]\n";
        for (section, expected) in [
            ("multiplier = -1.0", WatchdogConfigError::InvalidMultiplier),
            ("multiplier = nan", WatchdogConfigError::InvalidMultiplier),
            ("multiplier = 1e300", WatchdogConfigError::InvalidMultiplier),
            ("check_interval_secs = 0", WatchdogConfigError::ZeroCheckInterval),
        ] {
            let config = HostConfig::parse(&format!("{base}{section}\n")).expect("parses");
            assert!(
                matches!(config.engine(), Err(HostError::Watchdog(err)) if err == expected),
                "{section}"
            );
        }
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write config");
        let config = HostConfig::load(file.path()).expect("loads");
        assert_eq!(config.ports.client, "/dev/ttyACM1");

        let missing = HostConfig::load(Path::new("/nonexistent/dect-sweep.toml"));
        assert!(matches!(missing, Err(HostError::Io { .. })));
    }
}
