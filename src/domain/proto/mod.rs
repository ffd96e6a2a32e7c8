//! Protobuf layer: wire primitives and the launch-monitor message set.

pub mod messages;
pub mod wire;

pub use messages::{
    AlertNotification, AlertStatus, AlertType, BallMetrics, ClubMetrics, DeviceAlertError,
    LaunchMonitorService, ShotConfig, ShotMetrics, Tilt, TiltCalibration, Wrapper,
};
