use agsys_leader::api;
use agsys_leader::config::Config;
use agsys_leader::controller::Controller;
use agsys_leader::radio::{RadioSettings, RadioTransport};
use agsys_leader::store::Store;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::packet::{DeviceClass, DeviceUuid};
use common::version::Version;
use log::error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agsys-leader", version, about = "AgSys IoT system leader")]
struct Cli {
    /// Database path
    #[arg(long, global = true, default_value = "agsys.db")]
    db: PathBuf,

    /// Config file
    #[arg(long, global = true, default_value = "agsys.ron")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the leader in the foreground
    Run,
    /// List known devices
    Devices,
    /// Show recent sensor data for a device
    Data {
        /// Device UUID (hex)
        uuid: String,
        /// Number of records
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Start an OTA firmware update and monitor it
    OtaStart {
        /// Path to the firmware binary
        firmware: PathBuf,
        /// Version being distributed (e.g. 1.2.0)
        version: Version,
        /// Target device type (255 = all)
        #[arg(long, default_value_t = 0xFF)]
        device_type: u8,
    },
    /// Query the running leader for OTA progress
    OtaStatus {
        /// Base URL of the leader API
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        api: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run => cmd_run(&cli.db, &cli.config),
        Command::Devices => cmd_devices(&cli.db),
        Command::Data { uuid, limit } => cmd_data(&cli.db, &uuid, limit),
        Command::OtaStart {
            firmware,
            version,
            device_type,
        } => cmd_ota_start(&cli.db, &cli.config, &firmware, version, device_type),
        Command::OtaStatus { api } => cmd_ota_status(&api),
    }
}

#[cfg(feature = "pi")]
fn build_radio(settings: &RadioSettings) -> Result<Arc<dyn RadioTransport>> {
    use agsys_leader::radio::sx1276::Sx1276Radio;
    Ok(Arc::new(Sx1276Radio::open(settings)?))
}

#[cfg(not(feature = "pi"))]
fn build_radio(_settings: &RadioSettings) -> Result<Arc<dyn RadioTransport>> {
    anyhow::bail!("built without the `pi` feature; no radio backend available")
}

fn cmd_run(db: &Path, config_path: &Path) -> Result<i32> {
    let config = Config::load_or_default(config_path)?;
    let radio = build_radio(&config.radio)?;
    let store = Arc::new(Store::open(db).context("failed to open database")?);
    let controller = Controller::new(radio, store)?;
    controller.start()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let interrupted = runtime.block_on(async {
        tokio::select! {
            result = api::serve(controller.clone(), &config.api_listen) => result.map(|_| false),
            _ = tokio::signal::ctrl_c() => Ok(true),
        }
    })?;

    controller.stop();
    Ok(if interrupted { 130 } else { 0 })
}

fn cmd_devices(db: &Path) -> Result<i32> {
    let store = Store::open(db).context("failed to open database")?;
    let mut devices = store.load_devices()?;

    if devices.is_empty() {
        println!("No devices registered");
        return Ok(0);
    }
    devices.sort_by_key(|d| d.uuid);

    println!(
        "{:<34} {:<15} {:<20} {:<10} {:<8}",
        "UUID", "Type", "Last Seen", "Battery", "RSSI"
    );
    println!("{}", "-".repeat(91));
    for device in devices {
        println!(
            "{:<34} {:<15} {:<20} {:<10} {:<8}",
            device.uuid.to_string(),
            DeviceClass::label(device.device_type),
            device.last_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
            device.battery_mv,
            device.rssi,
        );
    }

    Ok(0)
}

fn cmd_data(db: &Path, uuid: &str, limit: u32) -> Result<i32> {
    let uuid: DeviceUuid = uuid.parse()?;
    let store = Store::open(db).context("failed to open database")?;
    let rows = store.sensor_data(&uuid, limit)?;

    if rows.is_empty() {
        println!("No data for device {}", uuid);
        return Ok(0);
    }

    println!(
        "{:<20} {:<12} {:<10} {:<8} {:<8}",
        "Timestamp", "Moisture", "Battery", "Temp", "RSSI"
    );
    println!("{}", "-".repeat(60));
    for row in rows {
        let timestamp = row.timestamp.chars().take(19).collect::<String>();
        println!(
            "{:<20} {:>3}% ({:<4}) {:<10} {:<8.1} {:<8}",
            timestamp,
            row.moisture_percent,
            row.moisture_raw,
            row.battery_mv,
            row.temperature,
            row.rssi,
        );
    }

    Ok(0)
}

fn cmd_ota_start(
    db: &Path,
    config_path: &Path,
    firmware: &Path,
    version: Version,
    device_type: u8,
) -> Result<i32> {
    let config = Config::load_or_default(config_path)?;
    let radio = build_radio(&config.radio)?;
    let store = Arc::new(Store::open(db).context("failed to open database")?);
    let controller = Controller::new(radio, store)?;
    controller.start()?;

    println!("Starting OTA update...");
    println!("  Firmware: {}", firmware.display());
    println!("  Version:  {}", version);
    if device_type == 0xFF {
        println!("  Target:   All devices");
    } else {
        println!("  Target:   Type {}", device_type);
    }

    let announce_id = match controller.start_ota(firmware, version, device_type) {
        Ok(id) => id,
        Err(e) => {
            controller.stop();
            return Err(e.into());
        }
    };
    println!("  Announce ID: {:#010x}", announce_id);
    println!();
    println!("OTA update started. Press Ctrl+C to stop.");
    println!();

    let runtime = tokio::runtime::Runtime::new()?;
    let code = runtime.block_on(async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("\n\nStopping OTA update...");
                    return 130;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    let progress = controller.ota_progress();
                    if !progress.active {
                        println!("\nOTA session completed.");
                        return 0;
                    }
                    if let Some(detail) = progress.detail {
                        print!(
                            "\rDevices: {} receiving, {} complete, {} errors | Elapsed: {}s",
                            detail.devices_receiving,
                            detail.devices_complete,
                            detail.devices_error,
                            detail.elapsed_sec,
                        );
                        std::io::stdout().flush().ok();
                    }
                }
            }
        }
    });

    println!("\nFinal device status:");
    for device in controller.ota_device_status() {
        let mark = match device.state.as_str() {
            "COMPLETE" => "ok",
            "ERROR" => "FAILED",
            _ => "?",
        };
        println!(
            "  [{}] {} {:>3}% {} {}",
            mark, device.uuid, device.progress, device.state, device.error
        );
    }

    controller.stop_ota();
    controller.stop();
    Ok(code)
}

fn cmd_ota_status(api: &str) -> Result<i32> {
    let client = reqwest::blocking::Client::new();

    let progress: serde_json::Value = client
        .get(format!("{}/api/ota/progress", api))
        .send()
        .with_context(|| format!("leader API not reachable at {}", api))?
        .json()?;

    if !progress["active"].as_bool().unwrap_or(false) {
        println!("No OTA update in progress");
        return Ok(0);
    }

    println!("OTA Update Status");
    println!("{}", "-".repeat(40));
    println!("  Announce ID:    {}", progress["announce_id"]);
    println!("  Version:        {}", progress["version"]);
    println!("  Firmware Size:  {} bytes", progress["firmware_size"]);
    println!("  Total Chunks:   {}", progress["total_chunks"]);
    println!("  Elapsed:        {} seconds", progress["elapsed_sec"]);
    println!();
    println!("  Devices Total:     {}", progress["devices_total"]);
    println!("  Devices Receiving: {}", progress["devices_receiving"]);
    println!("  Devices Complete:  {}", progress["devices_complete"]);
    println!("  Devices Error:     {}", progress["devices_error"]);
    println!();

    let devices: Vec<serde_json::Value> = client
        .get(format!("{}/api/ota/devices", api))
        .send()?
        .json()?;

    println!("Device Details:");
    for device in devices {
        println!(
            "  {} {:>3}% {:<12} {}",
            device["uuid"].as_str().unwrap_or("?"),
            device["progress"],
            device["state"].as_str().unwrap_or("?"),
            device["error"].as_str().unwrap_or(""),
        );
    }

    Ok(0)
}
