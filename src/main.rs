//! sti-tool: host-side checks for firmware images and configurations.
//!
//! ```text
//! sti-tool crc <image.bin>          size check + CRC16
//! sti-tool check-config <cfg.json>  parse + validate a DeviceConfig
//! ```

use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use log::{debug, error, info};

use stitouch::DeviceConfig;
use stitouch::bootloader::FIRMWARE_SIZE;
use stitouch::crc::crc16;

fn usage() -> ExitCode {
    eprintln!("usage: sti-tool crc <image> | check-config <file.json>");
    ExitCode::from(2)
}

fn image_crc(path: &str) -> Result<u16> {
    let image = fs::read(path).with_context(|| format!("reading {path}"))?;
    debug!("{}: {} bytes", path, image.len());
    if image.len() != FIRMWARE_SIZE {
        bail!(
            "{path}: image is {} bytes, expected {FIRMWARE_SIZE}",
            image.len()
        );
    }
    Ok(crc16(0, &image))
}

fn check_config(path: &str) -> Result<DeviceConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config = DeviceConfig::from_json(&text).with_context(|| format!("parsing {path}"))?;
    config
        .validate()
        .with_context(|| format!("validating {path}"))?;
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [cmd, path] if cmd == "crc" => image_crc(path).map(|crc| {
            println!("{crc:#06x}");
        }),
        [cmd, path] if cmd == "check-config" => check_config(path).map(|config| {
            info!(
                "{}: channel {:?}, {} groups, method {}",
                path, config.channel_name, config.broadcast_groups, config.chip_access_method
            );
            println!("ok");
        }),
        _ => return usage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
