//! Bluetooth Module
//!
//! The R10 device driver: BlueZ transport, protocol engine and typed
//! commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     BridgeService                       │
//! │        (connect / reconnect loop, public API)           │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐  ┌───────────┐  ┌───────────┐
//! │   BlueZ    │  │  Session  │  │  Launch   │
//! │ transport  │  │           │  │  Monitor  │
//! │            │  │ - workers │  │           │
//! │ - agent    │  │ - frames  │  │ - commands│
//! │ - GATT I/O │  │ - counter │  │ - alerts  │
//! └────────────┘  └───────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT UUIDs, handshake literals, message classification
//! - [`transport`] - the [`transport::GattTransport`] trait the engine runs on
//! - [`bluez`] - BlueZ/D-Bus transport implementation
//! - [`session`] - worker loops, framing, request/response correlation
//! - [`commands`] - typed launch-monitor commands and alert handling
//! - [`service`] - connect/reconnect loop

pub mod bluez;
pub mod commands;
pub mod protocol;
pub mod service;
pub mod session;
pub mod transport;

pub use commands::{LaunchMonitor, MonitorConfig};
pub use service::BridgeService;
pub use session::Session;
pub use transport::GattTransport;
