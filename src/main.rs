mod domain;
mod infrastructure;
mod presentation;

use clap::Parser;
use domain::error::BleError;
use domain::settings::{SessionConfig, SettingsService};
use infrastructure::bluetooth::btleplug_stack::BtleplugStack;
use infrastructure::bluetooth::cancel::CancelHandle;
use infrastructure::bluetooth::session::SessionSummary;
use infrastructure::bluetooth::BluetoothService;
use infrastructure::logging::init_logger;
use presentation::cli::{choose_target, preferred_characteristic, Args};
use presentation::console::{print_devices, spawn_event_printer};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut settings_service = SettingsService::new(args.config.clone())?;
    args.apply(settings_service.get_mut());
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)?;
    info!("Starting BLE notify client");
    info!("Settings file: {}", settings_service.path().display());

    let preferred = preferred_characteristic(&settings)?;
    let config = SessionConfig::from(&settings);

    let cancel = CancelHandle::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            ctrl_c.cancel();
        }
    });

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let printer = spawn_event_printer(event_rx);

    let outcome = async {
        let stack = BtleplugStack::new()
            .await
            .map_err(|e| BleError::Scan(e.to_string()))?;
        let service = BluetoothService::new(Arc::new(stack), config, event_tx, cancel.clone());

        println!(
            "Scanning for BLE devices ({} ms)...",
            settings.scan_duration_ms
        );
        let devices = service.scan().await?;
        if devices.is_empty() {
            println!("No BLE devices found. Make sure the peripheral is advertising.");
            return Ok(None);
        }
        print_devices(&devices);

        let address =
            choose_target(args.address.as_deref(), &settings, &devices, &cancel).await?;
        let summary = service
            .run_session(&address, preferred, |frame| println!("[NOTIFY] {}", frame))
            .await?;
        Ok::<_, BleError>(Some(summary))
    }
    .await;

    // All event senders are gone once the pipeline returns.
    let _ = printer.await;

    Ok(report(outcome))
}

fn report(outcome: Result<Option<SessionSummary>, BleError>) -> ExitCode {
    match outcome {
        Ok(Some(summary)) => {
            println!(
                "Session ended ({}): {} notification(s) received",
                summary.stop_reason, summary.frames_received
            );
            if !summary.teardown.is_clean() {
                println!(
                    "Teardown finished with {} warning(s)",
                    summary.teardown.warnings.len()
                );
            }
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(BleError::Cancelled) => {
            println!("Cancelled.");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{:?}", e);
            eprintln!("Error: {}", e);
            if let Some(hint) = e.hint() {
                eprintln!("{}", hint);
            }
            ExitCode::FAILURE
        }
    }
}
