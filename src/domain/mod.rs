//! Domain layer: pure protocol codecs, message types and settings.
//!
//! Nothing in here touches D-Bus or the network; everything is exercised
//! directly by unit tests.

pub mod cobs;
pub mod crc;
pub mod frame;
pub mod models;
pub mod proto;
pub mod settings;
pub mod shot;
