//! Capability interfaces for the local sensors and the BMC, plus the
//! command-line bindings used on real hosts.

use std::fmt;
use std::process::Command;

use log::debug;

use crate::error::HardwareError;

pub mod inventory;
pub mod ipmi;
pub mod sensors;

pub use ipmi::IpmiFanController;
pub use sensors::CommandTemperatureSource;

/// One fan-speed sample from the BMC sensor repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanReading {
    Rpm(u32),
    NoReading,
    Disabled,
    Unparseable(String),
}

impl FanReading {
    /// The speed in RPM, or `None` when the BMC gave no usable reading.
    pub fn rpm(&self) -> Option<u32> {
        match self {
            FanReading::Rpm(rpm) => Some(*rpm),
            _ => None,
        }
    }
}

impl fmt::Display for FanReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanReading::Rpm(rpm) => write!(f, "{rpm} RPM"),
            FanReading::NoReading => f.write_str("no reading"),
            FanReading::Disabled => f.write_str("disabled"),
            FanReading::Unparseable(raw) => write!(f, "unparseable ({raw:?})"),
        }
    }
}

/// Local fan actuation and telemetry through the management controller.
pub trait FanController {
    /// Switches the BMC to full/manual mode so duty commands are honoured.
    fn set_fan_mode_full(&mut self) -> Result<(), HardwareError>;
    fn set_duty(&mut self, zone: u8, percent: u8) -> Result<(), HardwareError>;
    fn query_fan_speed(&mut self) -> Result<FanReading, HardwareError>;
    fn cold_reset(&mut self) -> Result<(), HardwareError>;
}

pub trait TemperatureSource {
    /// Per-core CPU temperatures in °C. Empty when the host exposes none.
    fn read_cpu_temps(&mut self) -> Result<Vec<f32>, HardwareError>;
    /// Temperature of the disk at `/dev/<device>`, if it can be read.
    fn read_disk_temp(&mut self, device: &str) -> Option<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    FreeBsd,
}

impl Platform {
    pub fn detect() -> Result<Self, HardwareError> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self, HardwareError> {
        match os {
            "linux" => Ok(Platform::Linux),
            "freebsd" => Ok(Platform::FreeBsd),
            other => Err(HardwareError::UnsupportedPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Linux => "Linux",
            Platform::FreeBsd => "FreeBSD",
        })
    }
}

/// Runs `program` and returns its stdout, failing on a non-zero exit.
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String, HardwareError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("exec: {}", command);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| HardwareError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(HardwareError::Exit {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
