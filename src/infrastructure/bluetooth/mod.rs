//! Bluetooth Module
//!
//! Host-side BLE client: find a peripheral, connect, resolve its GATT
//! services and stream notifications from one characteristic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!      ┌────────────┬───┴────────┬──────────────┐
//!      ▼            ▼            ▼              ▼
//! ┌─────────┐ ┌────────────┐ ┌───────────┐ ┌──────────────┐
//! │ Scanner │ │ Connection │ │ Discovery │ │   Session    │
//! │         │ │            │ │           │ │              │
//! │ - scan  │ │ - retries  │ │ - ordered │ │ - subscribe  │
//! │ - dedup │ │ - timeout  │ │ strategies│ │ - listen     │
//! └────┬────┘ └─────┬──────┘ └─────┬─────┘ │ - teardown   │
//!      │            │              │       └──────┬───────┘
//!      └────────────┴──────┬───────┴──────────────┘
//!                          ▼
//!                 ┌─────────────────┐
//!                 │ BleStack (trait)│
//!                 │  btleplug / mock│
//!                 └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`stack`] - Platform abstraction and capability flags
//! - [`btleplug_stack`] - Native stack via btleplug
//! - [`scanner`] - Device discovery and selection
//! - [`connection`] - Connection establishment and the live link
//! - [`discovery`] - Service resolution strategies
//! - [`session`] - Notification session and teardown
//! - [`cancel`] - Cancellation signal shared by all stages
//! - [`protocol`] - Well-known UUIDs
//! - [`service`] - Main service coordinator

pub mod btleplug_stack;
pub mod cancel;
pub mod connection;
pub mod discovery;
#[cfg(test)]
mod mock;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod session;
pub mod stack;

// Re-export main service for convenience
pub use service::BluetoothService;
