use std::fmt;

use crate::fan_config::DiskLocation;
use crate::hardware::TemperatureSource;

/// Last sampled temperature of a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskTemp {
    Known(i32),
    #[default]
    Unknown,
}

impl DiskTemp {
    /// Unknown readings count as 0°C when aggregating.
    pub fn celsius_or_zero(self) -> i32 {
        match self {
            DiskTemp::Known(t) => t,
            DiskTemp::Unknown => 0,
        }
    }
}

impl fmt::Display for DiskTemp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskTemp::Known(t) => write!(f, "{t}"),
            DiskTemp::Unknown => f.write_str("--"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDisk {
    pub serial: String,
    pub chassis: usize,
    pub position: u32,
    /// Device node without `/dev/`, empty when no device matched the serial.
    pub device_node: String,
    pub temp: DiskTemp,
}

impl PhysicalDisk {
    pub fn new(location: &DiskLocation) -> Self {
        Self {
            serial: location.serial.clone(),
            chassis: location.chassis,
            position: location.position,
            device_node: String::new(),
            temp: DiskTemp::Unknown,
        }
    }
}

/// Samples every disk. Unmatched disks and failed reads become `Unknown`.
pub fn sample_all<T: TemperatureSource + ?Sized>(disks: &mut [PhysicalDisk], source: &mut T) {
    for disk in disks.iter_mut() {
        disk.temp = if disk.device_node.is_empty() {
            DiskTemp::Unknown
        } else {
            source
                .read_disk_temp(&disk.device_node)
                .filter(|t| *t > 0)
                .map_or(DiskTemp::Unknown, DiskTemp::Known)
        };
    }
}

/// Hottest disk per chassis, 0 for a chassis with no known reading.
pub fn max_temp_per_chassis(disks: &[PhysicalDisk], num_chassis: usize) -> Vec<i32> {
    let mut max = vec![0; num_chassis];
    for disk in disks {
        if let Some(slot) = max.get_mut(disk.chassis) {
            *slot = (*slot).max(disk.temp.celsius_or_zero());
        }
    }
    max
}

/// Temperatures of one chassis's disks ordered by slot, e.g. `"33 -- 35"`.
pub fn chassis_summary(disks: &[PhysicalDisk], chassis: usize) -> String {
    let mut members: Vec<&PhysicalDisk> = disks.iter().filter(|d| d.chassis == chassis).collect();
    members.sort_by_key(|d| d.position);
    members
        .iter()
        .map(|d| d.temp.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
