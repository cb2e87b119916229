use log::debug;

use super::{run_command, Platform, TemperatureSource};
use crate::error::HardwareError;

/// Reads CPU temperatures from lm-sensors or sysctl and disk temperatures
/// from smartctl.
#[derive(Debug, Clone)]
pub struct CommandTemperatureSource {
    platform: Platform,
}

impl CommandTemperatureSource {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl TemperatureSource for CommandTemperatureSource {
    fn read_cpu_temps(&mut self) -> Result<Vec<f32>, HardwareError> {
        match self.platform {
            Platform::Linux => run_command("sensors", &[]).map(|out| parse_linux_core_temps(&out)),
            Platform::FreeBsd => {
                run_command("sysctl", &["-a", "dev.cpu"]).map(|out| parse_freebsd_core_temps(&out))
            }
        }
    }

    fn read_disk_temp(&mut self, device: &str) -> Option<i32> {
        let node = format!("/dev/{device}");
        match run_command("smartctl", &["-A", &node]) {
            Ok(out) => parse_smart_temperature(&out),
            Err(e) => {
                debug!("no temperature for {}: {}", node, e);
                None
            }
        }
    }
}

/// `Core 0:        +45.0°C  (high = +80.0°C, crit = +100.0°C)`
pub fn parse_linux_core_temps(output: &str) -> Vec<f32> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("Core"))
        .filter_map(|line| {
            let (_, rest) = line.split_once('+')?;
            let value: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            value.parse().ok()
        })
        .collect()
}

/// `dev.cpu.0.temperature: 45.0C`
pub fn parse_freebsd_core_temps(output: &str) -> Vec<f32> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if !(key.starts_with("dev.cpu.") && key.ends_with(".temperature")) {
                return None;
            }
            value.trim().trim_end_matches('C').parse().ok()
        })
        .collect()
}

/// Raw value of the `Temperature_Celsius` attribute in `smartctl -A` output.
pub fn parse_smart_temperature(output: &str) -> Option<i32> {
    output
        .lines()
        .find(|line| line.contains("Temperature_Celsius"))
        .and_then(|line| line.split_whitespace().nth(9))
        .and_then(|raw| raw.parse().ok())
}
