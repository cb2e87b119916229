//! Supervision of the BMC's CPU fan telemetry.
//!
//! Two independent failure tracks are fed by one fan-speed sample per tick:
//!
//! * **unreadable** - the BMC reports no value at all. A freshly reset BMC
//!   does this for a while, so a cold reset is only issued once the reading
//!   has been missing for longer than the reboot grace period.
//! * **insane** - the BMC reports 0 RPM or more than 120% of the rated
//!   maximum. Each insane sample up to the fail threshold triggers a soft
//!   recovery (fan mode + duty reapplied); the next one triggers a cold reset.

use log::{error, warn};

use crate::hardware::FanController;

/// Observable condition of the BMC telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unreadable { since: u64 },
    BadReading { count: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerHealthState {
    pub unreadable_since: Option<u64>,
    pub consecutive_bad_readings: u32,
}

/// Action decided for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    None,
    /// Fan mode full and the last CPU duty sent again.
    Soft,
    /// Fan mode full and a BMC cold reset.
    Hard,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Rated maximum fan RPM.
    pub max_fan_speed: u32,
    pub fail_threshold: u32,
    /// Seconds a missing reading is tolerated before resetting the BMC.
    pub reboot_grace: u64,
    /// IPMI zone the CPU duty is written to on soft recovery.
    pub zone: u8,
}

#[derive(Debug)]
pub struct ControllerHealthMonitor {
    policy: HealthPolicy,
    state: ControllerHealthState,
}

impl ControllerHealthMonitor {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            state: ControllerHealthState::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ControllerHealthState {
        &self.state
    }

    pub fn status(&self) -> HealthStatus {
        if let Some(since) = self.state.unreadable_since {
            HealthStatus::Unreadable { since }
        } else if self.state.consecutive_bad_readings > 0 {
            HealthStatus::BadReading {
                count: self.state.consecutive_bad_readings,
            }
        } else {
            HealthStatus::Healthy
        }
    }

    fn is_insane(&self, rpm: u32) -> bool {
        // rpm > max * 1.2
        rpm == 0 || u64::from(rpm) * 5 > u64::from(self.policy.max_fan_speed) * 6
    }

    /// Samples the fan, updates the state and carries out any recovery.
    /// `cpu_duty` is the duty reapplied on soft recovery.
    pub fn evaluate<F: FanController + ?Sized>(
        &mut self,
        fan: &mut F,
        now: u64,
        cpu_duty: u8,
    ) -> Recovery {
        let rpm = match fan.query_fan_speed() {
            Ok(reading) => reading.rpm(),
            Err(e) => {
                warn!("fan speed query failed: {}", e);
                None
            }
        };
        let recovery = self.observe(rpm, now, cpu_duty);
        self.apply(recovery, fan, cpu_duty);
        recovery
    }

    /// State transition for one sample. `None` means the BMC gave no usable
    /// reading.
    pub fn observe(&mut self, rpm: Option<u32>, now: u64, cpu_duty: u8) -> Recovery {
        let Some(rpm) = rpm else {
            return match self.state.unreadable_since {
                None => {
                    self.state.unreadable_since = Some(now);
                    error!("Fan currently unreadable, waiting for BMC reboot grace period");
                    Recovery::None
                }
                Some(since) if now.saturating_sub(since) > self.policy.reboot_grace => {
                    error!(
                        "Fan unreadable for {}s, BMC reboot grace period of {}s elapsed, cold resetting BMC",
                        now - since,
                        self.policy.reboot_grace
                    );
                    self.state.unreadable_since = None;
                    Recovery::Hard
                }
                Some(_) => Recovery::None,
            };
        };

        self.state.unreadable_since = None;
        if self.is_insane(rpm) {
            self.state.consecutive_bad_readings += 1;
        } else {
            self.state.consecutive_bad_readings = 0;
        }

        let count = self.state.consecutive_bad_readings;
        let threshold = self.policy.fail_threshold;
        if count == 0 {
            Recovery::None
        } else if count <= threshold {
            error!(
                "CPU fan reading is {} RPM. BMC fail count at {}/{}. Attempting to set fan mode and apply {}% duty cycle again.",
                rpm, count, threshold, cpu_duty
            );
            Recovery::Soft
        } else {
            error!(
                "CPU fan reading is {} RPM. BMC fail count at {}/{}. Cold resetting BMC.",
                rpm, count, threshold
            );
            self.state.consecutive_bad_readings = 0;
            Recovery::Hard
        }
    }

    fn apply<F: FanController + ?Sized>(&self, recovery: Recovery, fan: &mut F, cpu_duty: u8) {
        if recovery == Recovery::None {
            return;
        }
        if let Err(e) = fan.set_fan_mode_full() {
            warn!("setting fan mode full failed: {}", e);
        }
        let result = match recovery {
            Recovery::Soft => fan.set_duty(self.policy.zone, cpu_duty),
            Recovery::Hard => fan.cold_reset(),
            Recovery::None => Ok(()),
        };
        if let Err(e) = result {
            warn!("{:?} recovery command failed: {}", recovery, e);
        }
    }
}
