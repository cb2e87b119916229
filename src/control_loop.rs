//! The thermal control loop.
//!
//! Every second the loop re-evaluates the CPU duty and the BMC health; every
//! `hd_polling_interval` seconds it also samples the disks and drives the
//! shelf fan controllers. All cross-tick state lives in [`ControlLoopState`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::clock::Clock;
use crate::disks::{self, PhysicalDisk};
use crate::error::ConfigError;
use crate::fan_config::{FanConfig, SensorLossPolicy};
use crate::fan_control::DutyMap;
use crate::hardware::{FanController, TemperatureSource};
use crate::health::{ControllerHealthMonitor, HealthPolicy, HealthStatus, Recovery};
use crate::shelf::DutySink;

pub const TICK: Duration = Duration::from_secs(1);

/// Index of the head unit, whose disk fans the CPU override drives.
pub const HEAD_UNIT: usize = 0;

pub struct Chassis {
    pub index: usize,
    pub max_disk_temp: i32,
    /// Starts at the disk table's highest duty until a reading maps.
    pub fan_duty: u8,
    link: Box<dyn DutySink>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideState {
    pub active: bool,
    pub last_logged_at: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ControlLoopState {
    pub cpu_temp: i32,
    /// Duty computed for the CPU this tick. Starts at the CPU table's
    /// highest duty.
    pub cpu_duty: u8,
    /// Duty last accepted by the BMC, `None` until the first successful push.
    pub applied_cpu_duty: Option<u8>,
    pub cpu_sensor_lost: bool,
    pub last_disk_check: u64,
    pub override_state: OverrideState,
    pub health_status: Option<HealthStatus>,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub cpu_duty_pushed: Option<u8>,
    pub recovery: Recovery,
    pub disks_polled: bool,
}

#[derive(Debug, Clone)]
struct LoopSettings {
    cpu_override_temp: i32,
    hd_polling_interval: u64,
    cpu_fan_zone: u8,
    sensor_loss: SensorLossPolicy,
    debug: bool,
    cpu_debug: bool,
}

pub struct ThermalControlLoop<T, F, K> {
    settings: LoopSettings,
    cpu_map: DutyMap,
    disk_map: DutyMap,
    sensors: T,
    fan: F,
    clock: K,
    health: ControllerHealthMonitor,
    disks: Vec<PhysicalDisk>,
    chassis: Vec<Chassis>,
    state: ControlLoopState,
}

impl<T, F, K> ThermalControlLoop<T, F, K>
where
    T: TemperatureSource,
    F: FanController,
    K: Clock,
{
    /// `links[i]` becomes the link of chassis `i`.
    pub fn new(
        config: &FanConfig,
        sensors: T,
        fan: F,
        clock: K,
        disks: Vec<PhysicalDisk>,
        links: Vec<Box<dyn DutySink>>,
    ) -> Result<Self, ConfigError> {
        if links.len() != config.num_chassis {
            return Err(ConfigError::ChassisCount {
                num_chassis: config.num_chassis,
                shelves: links.len(),
            });
        }

        let cpu_map = config.cpu_duty_map()?;
        let disk_map = config.disk_duty_map()?;
        let chassis = links
            .into_iter()
            .enumerate()
            .map(|(index, link)| Chassis {
                index,
                max_disk_temp: 0,
                fan_duty: disk_map.max_duty(),
                link,
            })
            .collect();

        Ok(Self {
            settings: LoopSettings {
                cpu_override_temp: config.cpu_override_temp,
                hd_polling_interval: config.hd_polling_interval,
                cpu_fan_zone: config.cpu_fan_zone,
                sensor_loss: config.sensor_loss,
                debug: config.debug,
                cpu_debug: config.cpu_debug,
            },
            state: ControlLoopState {
                cpu_duty: cpu_map.max_duty(),
                ..ControlLoopState::default()
            },
            cpu_map,
            disk_map,
            sensors,
            fan,
            clock,
            health: ControllerHealthMonitor::new(HealthPolicy {
                max_fan_speed: config.cpu_max_fan_speed,
                fail_threshold: config.bmc_fail_threshold,
                reboot_grace: config.bmc_reboot_grace_time,
                zone: config.cpu_fan_zone,
            }),
            disks,
            chassis,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &ControlLoopState {
        &self.state
    }

    #[cfg(test)]
    pub fn chassis(&self) -> &[Chassis] {
        &self.chassis
    }

    #[cfg(test)]
    pub fn disks(&self) -> &[PhysicalDisk] {
        &self.disks
    }

    /// One pass: CPU, override, BMC health, then disks when due.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();

        let cpu_duty_pushed = self.update_cpu();
        self.update_override(now);
        let recovery = self
            .health
            .evaluate(&mut self.fan, now, self.state.cpu_duty);
        self.track_health();

        let disks_polled = now.saturating_sub(self.state.last_disk_check)
            > self.settings.hd_polling_interval;
        if disks_polled {
            self.state.last_disk_check = now;
            self.update_disks();
        }

        TickReport {
            cpu_duty_pushed,
            recovery,
            disks_polled,
        }
    }

    fn update_cpu(&mut self) -> Option<u8> {
        let temps = match self.sensors.read_cpu_temps() {
            Ok(temps) => temps,
            Err(e) => {
                warn!("CPU temperature read failed: {}", e);
                Vec::new()
            }
        };

        let hottest = temps.into_iter().reduce(f32::max);
        match hottest {
            Some(temp) => {
                if self.state.cpu_sensor_lost {
                    info!("CPU temperatures available again");
                    self.state.cpu_sensor_lost = false;
                }
                self.state.cpu_temp = temp as i32;
                self.state.cpu_duty = self.cpu_map.duty_or(self.state.cpu_temp, self.state.cpu_duty);
            }
            None => {
                if !self.state.cpu_sensor_lost {
                    error!(
                        "No CPU temperatures available, applying {} policy",
                        self.settings.sensor_loss
                    );
                    self.state.cpu_sensor_lost = true;
                }
                self.state.cpu_temp = 0;
                self.state.cpu_duty = match self.settings.sensor_loss {
                    SensorLossPolicy::FailLow => 0,
                    SensorLossPolicy::HoldLast => self.state.cpu_duty,
                    SensorLossPolicy::FullSpeed => 100,
                };
            }
        }

        let duty = self.state.cpu_duty;
        if self.state.applied_cpu_duty == Some(duty) {
            return None;
        }
        if self.settings.cpu_debug {
            info!("CPU at {}*C, setting CPU fans {}%", self.state.cpu_temp, duty);
        }
        match self.fan.set_duty(self.settings.cpu_fan_zone, duty) {
            Ok(()) => {
                self.state.applied_cpu_duty = Some(duty);
                Some(duty)
            }
            Err(e) => {
                error!("Could not set CPU fan duty to {}%: {}", duty, e);
                self.state.applied_cpu_duty = None;
                None
            }
        }
    }

    fn track_health(&mut self) {
        let status = self.health.status();
        let previous = self.state.health_status.replace(status);
        if previous.is_none() || previous == Some(status) {
            return;
        }
        match status {
            HealthStatus::Healthy => info!("CPU fan readings back to normal"),
            HealthStatus::Unreadable { since } => {
                warn!("CPU fan unreadable since {}", since)
            }
            HealthStatus::BadReading { count } => {
                warn!("CPU fan readings insane, {} in a row", count)
            }
        }
    }

    fn update_override(&mut self, now: u64) {
        let ov = &mut self.state.override_state;
        if self.state.cpu_temp < self.settings.cpu_override_temp {
            ov.active = false;
            return;
        }

        ov.active = true;
        if now.saturating_sub(ov.last_logged_at) > self.settings.hd_polling_interval {
            info!(
                "CPU above HDD fan override threshold of {}*C, overriding head unit HDD fans to 100%",
                self.settings.cpu_override_temp
            );
            ov.last_logged_at = now;
            self.state.last_disk_check = 0;
        }
    }

    fn update_disks(&mut self) {
        disks::sample_all(&mut self.disks, &mut self.sensors);
        let max_temps = disks::max_temp_per_chassis(&self.disks, self.chassis.len());

        for chassis in self.chassis.iter_mut() {
            chassis.max_disk_temp = max_temps[chassis.index];
            chassis.fan_duty = self.disk_map.duty_or(chassis.max_disk_temp, chassis.fan_duty);
            if chassis.index == HEAD_UNIT && self.state.override_state.active {
                chassis.fan_duty = 100;
            }
        }

        if self.settings.debug {
            for chassis in &self.chassis {
                info!(
                    "Shelf {} max temp: {}*C [{}], setting HDD fans to {}%",
                    chassis.index,
                    chassis.max_disk_temp,
                    disks::chassis_summary(&self.disks, chassis.index),
                    chassis.fan_duty
                );
            }
        }

        for chassis in self.chassis.iter_mut() {
            if self.settings.debug {
                info!("Sending to shelf {}: {}", chassis.index, chassis.fan_duty);
            }
            chassis.link.send_duty(chassis.fan_duty);
        }
    }

    /// Ticks once per second until `shutdown` is raised, then closes every
    /// shelf link.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick();
            if let Some(rest) = TICK.checked_sub(started.elapsed()) {
                self.clock.sleep(rest);
            }
        }
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        for chassis in self.chassis.iter_mut() {
            chassis.link.close();
        }
        info!("Fan control terminating.");
    }
}
