use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use crate::clock::SystemClock;
use crate::control_loop::ThermalControlLoop;
use crate::disks::PhysicalDisk;
use crate::fan_config::FanConfig;
use crate::hardware::{inventory, CommandTemperatureSource, FanController, IpmiFanController, Platform};
use crate::shelf::{DutySink, ShelfLink, ShelfWorker, TcpConnector};

mod clock;
mod control_loop;
mod disks;
mod error;
mod fan_config;
mod fan_control;
mod hardware;
mod health;
mod shelf;
#[cfg(test)]
mod testing;

const USAGE: &str = "usage: shelf-fanctl <run|check> [config.ron]";

fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn open_links(
    config: &FanConfig,
    shutdown: &Arc<AtomicBool>,
) -> std::io::Result<Vec<Box<dyn DutySink>>> {
    let mut links: Vec<Box<dyn DutySink>> = Vec::with_capacity(config.num_chassis);
    for (chassis, address) in config.shelves.iter().enumerate() {
        let link = ShelfLink::new(
            chassis,
            address.as_str(),
            config.shelf_port,
            TcpConnector::default(),
            SystemClock,
        )
        .with_cancel(Arc::clone(shutdown));

        if config.background_reconnect {
            links.push(Box::new(ShelfWorker::spawn(link)?));
        } else {
            let mut link = link;
            link.connect(0);
            links.push(Box::new(link));
        }
    }
    Ok(links)
}

fn run_daemon(config: FanConfig) -> Result<(), Box<dyn std::error::Error>> {
    let platform = Platform::detect()?;
    info!("Starting fan control on {}", platform);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })?;

    let mut fan = IpmiFanController::new(config.cpu_fan_header.as_str());
    info!("Setting CPU fan mode to full.");
    if let Err(e) = fan.set_fan_mode_full() {
        warn!("could not set fan mode full: {}", e);
    }

    let links = open_links(&config, &shutdown)?;

    let mut disks: Vec<PhysicalDisk> = config.disks.iter().map(PhysicalDisk::new).collect();
    inventory::resolve(platform, &mut disks);

    let mut control = ThermalControlLoop::new(
        &config,
        CommandTemperatureSource::new(platform),
        fan,
        SystemClock,
        disks,
        links,
    )?;
    control.run(&shutdown);
    Ok(())
}

fn load_config(path: &Path) -> FanConfig {
    match fan_config::load_or_create_config(path) {
        Ok(config) => config,
        Err(e) => {
            let _ = init_logging(None);
            error!("Fatal: {}: {}", path.display(), e);
            exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let config_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(fan_config::default_config_file);

    match args.get(1).map(String::as_str) {
        Some("run") => {
            let config = load_config(&config_path);
            if let Err(e) = init_logging(config.log_file.as_deref()) {
                eprintln!("cannot open log file: {e}");
                exit(1);
            }

            if unsafe { libc::geteuid() != 0 } {
                error!("Root privileges required.");
                exit(1);
            }

            if let Err(e) = run_daemon(config) {
                error!("Fatal: {}", e);
                exit(1);
            }
        }
        Some("check") => {
            let config = load_config(&config_path);
            match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("failed: {e}");
                    exit(1);
                }
            }
        }
        _ => {
            eprintln!("{}", USAGE);
            exit(2);
        }
    }
}
