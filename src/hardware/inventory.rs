//! One-shot mapping of configured disk serials to device nodes.

use log::{info, warn};

use super::{run_command, Platform};
use crate::disks::PhysicalDisk;
use crate::error::HardwareError;

/// Lists candidate block devices (`ada0`, `sdb`, ...).
pub fn list_device_nodes(platform: Platform) -> Result<Vec<String>, HardwareError> {
    let out = match platform {
        Platform::Linux => run_command("lsblk", &["-ndo", "NAME"])?,
        Platform::FreeBsd => run_command("sysctl", &["-n", "kern.disks"])?,
    };
    Ok(out.split_whitespace().map(str::to_string).collect())
}

/// Returns the serial-number line of a spinning disk from `smartctl -i`
/// output. Solid state devices and drives that do not report a rotation
/// rate are skipped.
pub fn spinning_disk_serial(smart_info: &str) -> Option<&str> {
    let rotation = smart_info.lines().find(|line| line.contains("Rotation"))?;
    if rotation.contains("Solid State Device") {
        return None;
    }
    smart_info.lines().find(|line| line.contains("Serial"))
}

/// Assigns device nodes to `disks` whose serial appears in the node's
/// identity. `identify` returns `smartctl -i` output for a node.
pub fn assign_nodes<F>(disks: &mut [PhysicalDisk], nodes: &[String], mut identify: F)
where
    F: FnMut(&str) -> Option<String>,
{
    for node in nodes {
        let Some(smart_info) = identify(node) else {
            continue;
        };
        let Some(serial_line) = spinning_disk_serial(&smart_info) else {
            continue;
        };
        if let Some(disk) = disks.iter_mut().find(|d| serial_line.contains(&d.serial)) {
            disk.device_node = node.clone();
            info!(
                "Found disk /dev/{} with serial {} in shelf {} position {}",
                disk.device_node, disk.serial, disk.chassis, disk.position
            );
        }
    }
}

/// Resolves device nodes on the running host. Failure to enumerate devices
/// leaves every disk unmatched.
pub fn resolve(platform: Platform, disks: &mut [PhysicalDisk]) {
    let nodes = match list_device_nodes(platform) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("could not enumerate disks: {}", e);
            return;
        }
    };
    assign_nodes(disks, &nodes, |node| {
        run_command("smartctl", &["-i", &format!("/dev/{node}")]).ok()
    });

    for disk in disks.iter().filter(|d| d.device_node.is_empty()) {
        warn!(
            "No device found for serial {} (shelf {} position {})",
            disk.serial, disk.chassis, disk.position
        );
    }
}
