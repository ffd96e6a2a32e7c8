//! Bridges a Garmin Approach R10 launch monitor to a golf simulator.
//!
//! The R10 speaks a proprietary protocol over BLE GATT: COBS-stuffed,
//! CRC-protected frames carrying protobuf messages, unlocked by a pairing
//! dance on a protected notifier characteristic. This crate implements the
//! device driver — discovery, security, framing, handshake, the
//! counter-keyed request/response protocol and the device state machine —
//! and emits normalised [`ShotRecord`](domain::shot::ShotRecord)s to
//! pluggable downstream sinks.
//!
//! Layering follows the usual split:
//!
//! - [`domain`] — pure codecs (COBS, CRC16, framing, protobuf), shot
//!   normalisation, settings and the sink interface.
//! - [`infrastructure`] — the BlueZ transport, the session worker engine,
//!   typed launch-monitor commands, logging and reference sinks.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{DeviceInfo, DeviceState, Severity, ShotSink, TiltAngles};
pub use domain::settings::{Settings, SettingsService};
pub use domain::shot::ShotRecord;
pub use error::{BridgeError, FrameError, Result};
pub use infrastructure::bluetooth::{BridgeService, GattTransport, LaunchMonitor, MonitorConfig, Session};
