//! Operator-facing output on stdout.

use crate::domain::models::{
    AppEvent, ConnectionState, Descriptor, MessageSeverity, PeripheralHandle, ServiceTree,
    StatusMessage,
};
use crate::infrastructure::bluetooth::protocol::known_name;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

pub fn format_device(index: usize, device: &PeripheralHandle) -> String {
    let rssi = device
        .signal_strength
        .map_or_else(|| "N/A".to_string(), |rssi| rssi.to_string());
    format!(
        "{}: Name='{}' Address='{}' RSSI={}",
        index,
        device.display_name(),
        device.address,
        rssi
    )
}

fn label(uuid: &Uuid) -> String {
    match known_name(uuid) {
        Some(name) => format!("{} ({})", uuid, name),
        None => uuid.to_string(),
    }
}

fn format_descriptor(descriptor: &Descriptor) -> String {
    let handle = descriptor
        .handle
        .map_or_else(|| "N/A".to_string(), |h| format!("0x{:04x}", h));
    format!("    Descriptor: {} (handle {})", label(&descriptor.uuid), handle)
}

/// One line per service, characteristic and descriptor, indented by level.
pub fn render_tree(tree: &ServiceTree) -> Vec<String> {
    let mut lines = Vec::new();
    for service in &tree.services {
        lines.push(format!("Service: {}", label(&service.uuid)));
        for characteristic in &service.characteristics {
            lines.push(format!(
                "  Characteristic: {} [{}]",
                label(&characteristic.uuid),
                characteristic.property_labels().join(", ")
            ));
            lines.extend(characteristic.descriptors.iter().map(format_descriptor));
        }
    }
    lines
}

pub fn print_devices(devices: &[PeripheralHandle]) {
    println!("Discovered devices:");
    for (index, device) in devices.iter().enumerate() {
        println!("{}", format_device(index, device));
    }
}

fn print_status(msg: &StatusMessage) {
    match msg.severity {
        MessageSeverity::Info | MessageSeverity::Success => println!("{}", msg.message),
        MessageSeverity::Warning => println!("Warning: {}", msg.message),
        MessageSeverity::Error => eprintln!("Error: {}", msg.message),
    }
}

fn print_event(event: AppEvent) {
    match event {
        // Listed synchronously by the caller, ahead of the prompt.
        AppEvent::ScanResults(devices) => debug!("Scan returned {} device(s)", devices.len()),
        AppEvent::ConnectionState(ConnectionState::Failed(reason)) => {
            println!("Connection attempt failed: {}", reason)
        }
        AppEvent::ConnectionState(state) => println!("Connection state: {}", state),
        AppEvent::ServicesResolved(tree) => {
            for line in render_tree(&tree) {
                println!("{}", line);
            }
        }
        AppEvent::Subscribed(uuid) => println!("Subscribed to notifications on {}", uuid),
        AppEvent::LogMessage(msg) => print_status(&msg),
    }
}

/// Print events until every sender is dropped.
pub fn spawn_event_printer(mut events: mpsc::UnboundedReceiver<AppEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    })
}
