use std::io;

use thiserror::Error;

/// Failures of the OS command bindings (ipmitool, smartctl, sensors, ...).
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("could not parse output of `{command}`: {reason}")]
    Parse { command: String, reason: String },

    #[error("operating system {0} not supported")]
    UnsupportedPlatform(String),
}

/// Configuration loading and validation failures. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] io::Error),

    #[error("config load: {0}")]
    Load(#[from] config::ConfigError),

    #[error("config write: {0}")]
    Write(#[from] ron::Error),

    #[error("{table} map: {reason}")]
    DutyMap { table: &'static str, reason: String },

    #[error("num_chassis is {num_chassis} but {shelves} shelf addresses are configured")]
    ChassisCount { num_chassis: usize, shelves: usize },

    #[error("disk {serial} references chassis {chassis}, only {num_chassis} configured")]
    UnknownChassis {
        serial: String,
        chassis: usize,
        num_chassis: usize,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
