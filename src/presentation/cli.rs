//! Command line arguments and interactive device selection.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceSelection, PeripheralHandle};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::cancel::CancelHandle;
use crate::infrastructure::bluetooth::protocol::parse_uuid;
use crate::infrastructure::bluetooth::scanner::find_by_name;
use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "ble-notify-client")]
#[command(about = "Scan for a BLE peripheral and print its notifications", long_about = None)]
#[command(version)]
pub struct Args {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Connect to the device advertising this name
    #[arg(short, long, conflicts_with = "address")]
    pub name: Option<String>,

    /// Connect to this address without prompting
    #[arg(short, long)]
    pub address: Option<String>,

    /// Characteristic to subscribe to (full or 16/32-bit UUID)
    #[arg(short, long)]
    pub characteristic: Option<String>,

    /// Scan duration in milliseconds
    #[arg(long)]
    pub scan_ms: Option<u64>,

    /// Per-attempt connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    /// Flags take precedence over the settings file.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(name) = &self.name {
            settings.target_name = Some(name.clone());
        }
        if let Some(uuid) = &self.characteristic {
            settings.characteristic_uuid = Some(uuid.clone());
        }
        if let Some(ms) = self.scan_ms {
            settings.scan_duration_ms = ms;
        }
        if let Some(ms) = self.connect_timeout_ms {
            settings.connect_timeout_ms = ms;
        }
        if let Some(level) = &self.log_level {
            settings.log_settings.level = level.clone();
        }
    }
}

pub fn preferred_characteristic(settings: &Settings) -> anyhow::Result<Option<Uuid>> {
    settings
        .characteristic_uuid
        .as_deref()
        .map(parse_uuid)
        .transpose()
        .context("Invalid characteristic UUID")
}

/// Pick the device to connect to: explicit address, then configured name,
/// then ask the operator.
pub async fn choose_target(
    address: Option<&str>,
    settings: &Settings,
    devices: &[PeripheralHandle],
    cancel: &CancelHandle,
) -> Result<String, BleError> {
    if let Some(address) = address {
        return Ok(address.to_string());
    }
    if let Some(name) = &settings.target_name {
        return find_by_name(devices, name)
            .map(|device| device.address.clone())
            .ok_or_else(|| BleError::DeviceNotFound(name.clone()));
    }

    let selection = cancel.run(prompt_selection()).await?;
    selection.resolve(devices)
}

async fn prompt_selection() -> Result<DeviceSelection, BleError> {
    print!("Enter device index or address: ");
    io::stdout()
        .flush()
        .map_err(|e| BleError::InvalidSelection(e.to_string()))?;

    let line = read_detached(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await?;
    DeviceSelection::parse(&line)
}

/// Run a blocking read on a plain thread.
///
/// A pending read never holds up runtime shutdown; the thread dies with the
/// process.
async fn read_detached<F>(read: F) -> Result<String, BleError>
where
    F: FnOnce() -> io::Result<String> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let _ = tx.send(read());
        })
        .map_err(|e| BleError::InvalidSelection(e.to_string()))?;

    rx.await
        .map_err(|_| BleError::InvalidSelection("input closed".to_string()))?
        .map_err(|e| BleError::InvalidSelection(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<PeripheralHandle> {
        vec![PeripheralHandle {
            name: Some("AnnaBLETester".into()),
            address: "addr2".into(),
            signal_strength: Some(-60),
        }]
    }

    #[test]
    fn test_flags_override_settings() {
        let args = Args::try_parse_from([
            "ble-notify-client",
            "--name",
            "AnnaBLETester",
            "-c",
            "2a37",
            "--scan-ms",
            "2500",
        ])
        .unwrap();
        let mut settings = Settings::default();
        args.apply(&mut settings);

        assert_eq!(settings.target_name.as_deref(), Some("AnnaBLETester"));
        assert_eq!(settings.scan_duration_ms, 2500);
        assert_eq!(settings.connect_timeout_ms, Settings::default().connect_timeout_ms);
        assert_eq!(
            preferred_characteristic(&settings).unwrap().unwrap().to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_name_and_address_conflict() {
        assert!(Args::try_parse_from(["ble-notify-client", "-n", "x", "-a", "y"]).is_err());
    }

    #[test]
    fn test_invalid_characteristic() {
        let settings = Settings {
            characteristic_uuid: Some("nope".into()),
            ..Settings::default()
        };
        assert!(preferred_characteristic(&settings).is_err());
    }

    #[tokio::test]
    async fn test_choose_target_without_prompt() {
        let cancel = CancelHandle::new();
        let mut settings = Settings::default();

        let chosen = choose_target(Some("raw"), &settings, &devices(), &cancel).await;
        assert_eq!(chosen.unwrap(), "raw");

        settings.target_name = Some("AnnaBLETester".into());
        let chosen = choose_target(None, &settings, &devices(), &cancel).await;
        assert_eq!(chosen.unwrap(), "addr2");

        settings.target_name = Some("Missing".into());
        assert!(matches!(
            choose_target(None, &settings, &devices(), &cancel).await,
            Err(BleError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_cancelled_read_does_not_block_shutdown() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .unwrap();
        let (release, stalled) = std::sync::mpsc::channel::<()>();

        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let result = runtime.block_on(async move {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                trigger.cancel();
            });
            cancel
                .run(read_detached(move || {
                    // Stands in for an operator who never presses Enter.
                    let _ = stalled.recv();
                    Ok(String::new())
                }))
                .await
        });
        assert!(matches!(result, Err(BleError::Cancelled)));

        let start = std::time::Instant::now();
        drop(runtime);
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        drop(release);
    }

    #[tokio::test]
    async fn test_read_detached_returns_line() {
        let line = read_detached(|| Ok("1\n".to_string())).await.unwrap();
        assert_eq!(DeviceSelection::parse(&line).unwrap(), DeviceSelection::Index(1));
    }
}
