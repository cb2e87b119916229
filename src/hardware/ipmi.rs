use std::thread;
use std::time::Duration;

use log::debug;

use super::{run_command, FanController, FanReading};
use crate::error::HardwareError;

const IPMITOOL: &str = "ipmitool";

/// Time the BMC needs after a mode change or reset before it answers again.
pub const BMC_SETTLE: Duration = Duration::from_secs(5);

/// Supermicro X10 fan control through `ipmitool raw` commands.
#[derive(Debug, Clone)]
pub struct IpmiFanController {
    fan_header: String,
    settle: Duration,
}

impl IpmiFanController {
    pub fn new(fan_header: impl Into<String>) -> Self {
        Self {
            fan_header: fan_header.into(),
            settle: BMC_SETTLE,
        }
    }
}

impl FanController for IpmiFanController {
    fn set_fan_mode_full(&mut self) -> Result<(), HardwareError> {
        run_command(IPMITOOL, &["raw", "0x30", "0x45", "0x01", "1"])?;
        thread::sleep(self.settle);
        Ok(())
    }

    fn set_duty(&mut self, zone: u8, percent: u8) -> Result<(), HardwareError> {
        let zone = zone.to_string();
        let percent = percent.min(100).to_string();
        run_command(
            IPMITOOL,
            &["raw", "0x30", "0x70", "0x66", "0x01", &zone, &percent],
        )?;
        Ok(())
    }

    fn query_fan_speed(&mut self) -> Result<FanReading, HardwareError> {
        let sdr = run_command(IPMITOOL, &["sdr"])?;
        let reading = parse_fan_speed(&sdr, &self.fan_header).ok_or_else(|| HardwareError::Parse {
            command: "ipmitool sdr".to_string(),
            reason: format!("no sensor named {}", self.fan_header),
        })?;
        debug!("{} reads {}", self.fan_header, reading);
        Ok(reading)
    }

    fn cold_reset(&mut self) -> Result<(), HardwareError> {
        run_command(IPMITOOL, &["bmc", "reset", "cold"])?;
        thread::sleep(self.settle);
        Ok(())
    }
}

/// Extracts the fan speed of `header` from `ipmitool sdr` output.
///
/// Rows look like `FANA | 1400 RPM | ok`; the value is the third
/// whitespace-separated field. Returns `None` when no row mentions `header`.
pub fn parse_fan_speed(sdr: &str, header: &str) -> Option<FanReading> {
    let line = sdr.lines().find(|line| line.contains(header))?;
    let field = line.split_whitespace().nth(2).unwrap_or("");
    Some(match field {
        "no" => FanReading::NoReading,
        "disabled" => FanReading::Disabled,
        raw => raw
            .parse::<u32>()
            .map(FanReading::Rpm)
            .unwrap_or_else(|_| FanReading::Unparseable(raw.to_string())),
    })
}
