use crate::fan_config::*;

fn disk(serial: &str, chassis: usize, position: u32) -> DiskLocation {
    DiskLocation {
        serial: serial.to_string(),
        chassis,
        position,
    }
}

/// Two-shelf layout for an X10 board with the CPU fan on FANA. Serials are
/// placeholders and must be replaced with the installed drives.
pub fn default_fan_config() -> FanConfig {
    FanConfig {
        cpu_map: DutyTable {
            temps: vec![40, 45, 50, 55, 60, 65, 70, 75, 100],
            duties: vec![20, 25, 30, 40, 50, 60, 75, 90, 100],
        },
        disk_map: DutyTable {
            temps: vec![30, 32, 34, 36, 38, 40, 42, 100],
            duties: vec![15, 20, 30, 40, 55, 70, 85, 100],
        },
        shelves: vec!["10.0.10.10".to_string(), "10.0.10.11".to_string()],
        shelf_port: super::default_shelf_port(),
        disks: vec![
            disk("SERIAL-HEAD-01", 0, 1),
            disk("SERIAL-HEAD-02", 0, 2),
            disk("SERIAL-HEAD-03", 0, 3),
            disk("SERIAL-HEAD-04", 0, 4),
            disk("SERIAL-SHELF1-01", 1, 1),
            disk("SERIAL-SHELF1-02", 1, 2),
            disk("SERIAL-SHELF1-03", 1, 3),
            disk("SERIAL-SHELF1-04", 1, 4),
        ],
        cpu_override_temp: 67,
        cpu_max_fan_speed: 1800,
        cpu_fan_header: "FANA".to_string(),
        cpu_fan_zone: 0,
        num_chassis: 2,
        hd_polling_interval: 60,
        bmc_fail_threshold: 1,
        bmc_reboot_grace_time: 120,
        debug: false,
        cpu_debug: false,
        log_file: None,
        sensor_loss: SensorLossPolicy::FailLow,
        background_reconnect: super::default_background_reconnect(),
    }
}
