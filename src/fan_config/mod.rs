use config::{Config as ConfigLoader, File, FileFormat};
use ron::ser::to_string_pretty;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::fan_control::DutyMap;

pub mod default;

pub const DEFAULT_CONFIG_DIR: &str = "/etc/shelf-fanctl";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DutyTable {
    pub temps: Vec<i32>,
    pub duties: Vec<u8>,
}

/// Physical location of one disk, keyed by serial number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DiskLocation {
    pub serial: String,
    pub chassis: usize,
    pub position: u32,
}

/// What the CPU branch commands when no core temperature can be read.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum SensorLossPolicy {
    /// Treat the CPU as 0°C and command 0% duty.
    #[default]
    FailLow,
    /// Keep the last computed duty.
    HoldLast,
    /// Command 100% duty.
    FullSpeed,
}

impl TryFrom<String> for SensorLossPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "fail_low" => Ok(Self::FailLow),
            "hold_last" => Ok(Self::HoldLast),
            "full_speed" => Ok(Self::FullSpeed),
            other => Err(format!(
                "unknown sensor_loss policy {other:?}, expected fail_low, hold_last or full_speed"
            )),
        }
    }
}

impl From<SensorLossPolicy> for String {
    fn from(policy: SensorLossPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for SensorLossPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailLow => "fail_low",
            Self::HoldLast => "hold_last",
            Self::FullSpeed => "full_speed",
        })
    }
}

fn default_shelf_port() -> u16 {
    10000
}

fn default_background_reconnect() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FanConfig {
    pub cpu_map: DutyTable,
    pub disk_map: DutyTable,
    /// Address of each shelf fan controller, indexed by chassis.
    pub shelves: Vec<String>,
    #[serde(default = "default_shelf_port")]
    pub shelf_port: u16,
    pub disks: Vec<DiskLocation>,
    pub cpu_override_temp: i32,
    /// Rated maximum RPM of the CPU fan.
    pub cpu_max_fan_speed: u32,
    /// SDR sensor name of the CPU fan, e.g. "FANA".
    pub cpu_fan_header: String,
    #[serde(default)]
    pub cpu_fan_zone: u8,
    pub num_chassis: usize,
    /// Seconds between disk temperature polls.
    pub hd_polling_interval: u64,
    pub bmc_fail_threshold: u32,
    /// Seconds the fan reading may stay unreadable before the BMC is reset.
    pub bmc_reboot_grace_time: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub cpu_debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub sensor_loss: SensorLossPolicy,
    /// Run each shelf link on its own thread so reconnects never stall the loop.
    #[serde(default = "default_background_reconnect")]
    pub background_reconnect: bool,
}

impl FanConfig {
    pub fn cpu_duty_map(&self) -> Result<DutyMap, ConfigError> {
        DutyMap::from_table("cpu", &self.cpu_map)
    }

    pub fn disk_duty_map(&self) -> Result<DutyMap, ConfigError> {
        DutyMap::from_table("disk", &self.disk_map)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cpu_duty_map()?;
        self.disk_duty_map()?;

        if self.num_chassis == 0 {
            return Err(ConfigError::Invalid {
                field: "num_chassis",
                reason: "at least one chassis is required".to_string(),
            });
        }
        if self.num_chassis != self.shelves.len() {
            return Err(ConfigError::ChassisCount {
                num_chassis: self.num_chassis,
                shelves: self.shelves.len(),
            });
        }
        if let Some(disk) = self.disks.iter().find(|d| d.chassis >= self.num_chassis) {
            return Err(ConfigError::UnknownChassis {
                serial: disk.serial.clone(),
                chassis: disk.chassis,
                num_chassis: self.num_chassis,
            });
        }
        if self.hd_polling_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "hd_polling_interval",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.cpu_fan_header.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cpu_fan_header",
                reason: "must name an SDR fan sensor".to_string(),
            });
        }
        Ok(())
    }
}

pub fn default_config_file() -> PathBuf {
    let mut path = PathBuf::from(DEFAULT_CONFIG_DIR);
    path.push("config.ron");
    path
}

fn write_config<P: AsRef<Path>>(path: P, config: &FanConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.as_ref().parent() {
        fs::create_dir_all(dir)?;
    }
    let ron_string = to_string_pretty(config, ron::ser::PrettyConfig::default())?;
    fs::write(path, ron_string)?;
    Ok(())
}

/// Loads and validates the configuration at `path`, writing the default
/// configuration there first if the file does not exist yet.
pub fn load_or_create_config(path: &Path) -> Result<FanConfig, ConfigError> {
    if !path.exists() {
        let default = default::default_fan_config();
        write_config(path, &default)?;
        return Ok(default);
    }

    let loaded = ConfigLoader::builder()
        .add_source(File::from(path).format(FileFormat::Ron))
        .build()?
        .try_deserialize::<FanConfig>()?;

    loaded.validate()?;
    Ok(loaded)
}
