//! Infrastructure layer: BlueZ transport, session engine, logging and the
//! reference sinks.

pub mod bluetooth;
pub mod logging;
pub mod simulator;
