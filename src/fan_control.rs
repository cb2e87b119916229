use crate::error::ConfigError;
use crate::fan_config::DutyTable;

/// Step map from temperature to fan duty.
///
/// Each breakpoint covers every temperature up to and including itself, so a
/// reading is served by the first breakpoint that is greater than or equal to
/// it. Readings above the last breakpoint are not covered and the caller keeps
/// whatever duty it applied before, starting from [`DutyMap::max_duty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DutyMap {
    points: Vec<(i32, u8)>,
}

impl DutyMap {
    /// Builds a map from a configured table, rejecting tables whose lookup
    /// would be ambiguous.
    pub fn from_table(table_name: &'static str, table: &DutyTable) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::DutyMap {
            table: table_name,
            reason,
        };

        if table.temps.is_empty() {
            return Err(invalid("no breakpoints".to_string()));
        }
        if table.temps.len() != table.duties.len() {
            return Err(invalid(format!(
                "{} breakpoints but {} duties",
                table.temps.len(),
                table.duties.len()
            )));
        }
        if let Some(pair) = table.temps.windows(2).find(|w| w[0] >= w[1]) {
            return Err(invalid(format!(
                "breakpoints must be strictly ascending, found {} then {}",
                pair[0], pair[1]
            )));
        }
        if let Some(duty) = table.duties.iter().find(|d| **d > 100) {
            return Err(invalid(format!("duty {duty}% is above 100%")));
        }

        Ok(Self {
            points: table
                .temps
                .iter()
                .copied()
                .zip(table.duties.iter().copied())
                .collect(),
        })
    }

    /// Returns the duty for `temperature`, or `None` when it is above every
    /// breakpoint.
    pub fn map_to_duty(&self, temperature: i32) -> Option<u8> {
        for &(breakpoint, duty) in &self.points {
            if temperature <= breakpoint {
                return Some(duty);
            }
        }
        None
    }

    /// Highest duty in the table.
    pub fn max_duty(&self) -> u8 {
        self.points.iter().map(|&(_, duty)| duty).max().unwrap_or(100)
    }

    /// Like [`DutyMap::map_to_duty`] but falls back to `previous` for
    /// readings outside the table.
    pub fn duty_or(&self, temperature: i32, previous: u8) -> u8 {
        self.map_to_duty(temperature).unwrap_or(previous)
    }
}
