//! Launch-monitor protobuf message set.
//!
//! - Host → device requests travel inside `B313` interface frames.
//! - Device → host replies travel inside `B413` frames.
//! - Device-initiated [`AlertNotification`]s travel inside `B313` frames.
//!
//! All messages are wrapped in [`Wrapper`] with the service payload at field
//! 1. Both directions are encodable so a simulated peer can drive the
//! session in tests.

use crate::domain::models::DeviceState;
use crate::domain::proto::wire::{Reader, Writer};
use crate::error::FrameError;

/// Alert categories a host may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    LaunchMonitor,
    Unknown(u32),
}

impl AlertType {
    pub fn to_u32(self) -> u32 {
        match self {
            AlertType::LaunchMonitor => 1,
            AlertType::Unknown(v) => v,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => AlertType::LaunchMonitor,
            other => AlertType::Unknown(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Sub-messages
// ---------------------------------------------------------------------------

/// Device tilt relative to level, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tilt {
    pub roll: f32,
    pub pitch: f32,
}

impl Tilt {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_float(1, self.roll);
        w.put_float(2, self.pitch);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.roll = value.as_f32(),
                2 => out.pitch = value.as_f32(),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Device-reported error inside an alert.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceAlertError {
    pub code: u32,
    /// 0 = info, 1 = warning, 2+ = error.
    pub severity: u32,
}

impl DeviceAlertError {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_uint32(1, self.code);
        w.put_uint32(2, self.severity);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.code = value.as_u32(),
                2 => out.severity = value.as_u32(),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Ball launch measurements, device units (m/s, degrees, rpm).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BallMetrics {
    pub ball_speed: f32,
    pub launch_angle: f32,
    pub launch_direction: f32,
    pub spin_axis: f32,
    pub total_spin: f32,
}

impl BallMetrics {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_float(1, self.ball_speed);
        w.put_float(2, self.launch_angle);
        w.put_float(3, self.launch_direction);
        w.put_float(4, self.spin_axis);
        w.put_float(5, self.total_spin);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.ball_speed = value.as_f32(),
                2 => out.launch_angle = value.as_f32(),
                3 => out.launch_direction = value.as_f32(),
                4 => out.spin_axis = value.as_f32(),
                5 => out.total_spin = value.as_f32(),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Club delivery measurements, device units (m/s, degrees).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClubMetrics {
    pub club_head_speed: f32,
    pub attack_angle: f32,
    pub club_angle_face: f32,
    pub club_angle_path: f32,
}

impl ClubMetrics {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_float(1, self.club_head_speed);
        w.put_float(2, self.attack_angle);
        w.put_float(3, self.club_angle_face);
        w.put_float(4, self.club_angle_path);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.club_head_speed = value.as_f32(),
                2 => out.attack_angle = value.as_f32(),
                3 => out.club_angle_face = value.as_f32(),
                4 => out.club_angle_path = value.as_f32(),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Measurements for one detected shot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShotMetrics {
    pub shot_id: u32,
    pub ball: Option<BallMetrics>,
    pub club: Option<ClubMetrics>,
}

impl ShotMetrics {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_uint32(1, self.shot_id);
        if let Some(ball) = &self.ball {
            w.put_message(2, &ball.encode());
        }
        if let Some(club) = &self.club {
            w.put_message(3, &club.encode());
        }
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.shot_id = value.as_u32(),
                2 => out.ball = Some(BallMetrics::decode(value.as_bytes())?),
                3 => out.club = Some(ClubMetrics::decode(value.as_bytes())?),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Tilt-calibration progress pushed by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TiltCalibration {
    pub status: u32,
}

impl TiltCalibration {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_uint32(1, self.status);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            if field == 1 {
                out.status = value.as_u32();
            }
        }
        Ok(out)
    }
}

/// Per-subscription status entry in a subscribe-alerts reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertStatus {
    pub alert_type: AlertType,
    pub status: u32,
}

impl AlertStatus {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_uint32(1, self.alert_type.to_u32());
        w.put_uint32(2, self.status);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut alert_type = AlertType::Unknown(0);
        let mut status = 0;
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => alert_type = AlertType::from_u32(value.as_u32()),
                2 => status = value.as_u32(),
                _ => {}
            }
        }
        Ok(Self { alert_type, status })
    }
}

/// Asynchronous device push: state change, error, shot, or calibration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertNotification {
    pub state: Option<DeviceState>,
    pub error: Option<DeviceAlertError>,
    pub metrics: Option<ShotMetrics>,
    pub tilt_calibration: Option<TiltCalibration>,
}

impl AlertNotification {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(state) = self.state {
            w.put_enum(1, state.to_i32());
        }
        if let Some(error) = &self.error {
            w.put_message(2, &error.encode());
        }
        if let Some(metrics) = &self.metrics {
            w.put_message(3, &metrics.encode());
        }
        if let Some(cal) = &self.tilt_calibration {
            w.put_message(4, &cal.encode());
        }
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.state = Some(DeviceState::from_i32(value.as_u32() as i32)),
                2 => out.error = Some(DeviceAlertError::decode(value.as_bytes())?),
                3 => out.metrics = Some(ShotMetrics::decode(value.as_bytes())?),
                4 => out.tilt_calibration = Some(TiltCalibration::decode(value.as_bytes())?),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Environmental configuration pushed to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShotConfig {
    pub temperature: f32,
    pub humidity: f32,
    pub altitude: f32,
    pub air_density: f32,
    pub tee_range: f32,
}

impl ShotConfig {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_float(1, self.temperature);
        w.put_float(2, self.humidity);
        w.put_float(3, self.altitude);
        w.put_float(4, self.air_density);
        w.put_float(5, self.tee_range);
        w.into_bytes()
    }

    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => out.temperature = value.as_f32(),
                2 => out.humidity = value.as_f32(),
                3 => out.altitude = value.as_f32(),
                4 => out.air_density = value.as_f32(),
                5 => out.tee_range = value.as_f32(),
                _ => {}
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Service envelope
// ---------------------------------------------------------------------------

/// The launch-monitor service message. Exactly one field is populated per
/// message in practice; decoding tolerates any combination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchMonitorService {
    pub status_request: bool,
    pub status_response: Option<DeviceState>,
    pub wake_up_request: bool,
    pub wake_up_response: Option<DeviceState>,
    pub tilt_request: bool,
    pub tilt_response: Option<Tilt>,
    pub start_tilt_calibration_request: bool,
    pub tilt_calibration_response: Option<TiltCalibration>,
    pub subscribe_alerts_request: Option<Vec<AlertType>>,
    pub subscribe_alerts_response: Option<Vec<AlertStatus>>,
    pub shot_config_request: Option<ShotConfig>,
    pub shot_config_response: Option<bool>,
    pub alert_notification: Option<AlertNotification>,
}

const F_STATUS_REQ: u32 = 1;
const F_STATUS_RESP: u32 = 2;
const F_WAKE_REQ: u32 = 3;
const F_WAKE_RESP: u32 = 4;
const F_TILT_REQ: u32 = 5;
const F_TILT_RESP: u32 = 6;
const F_TILT_CAL_REQ: u32 = 7;
const F_TILT_CAL_RESP: u32 = 8;
const F_SUB_ALERTS_REQ: u32 = 9;
const F_SUB_ALERTS_RESP: u32 = 10;
const F_SHOT_CONFIG_REQ: u32 = 11;
const F_SHOT_CONFIG_RESP: u32 = 12;
const F_ALERT_NOTIFICATION: u32 = 13;

impl LaunchMonitorService {
    pub fn status_request() -> Self {
        Self { status_request: true, ..Self::default() }
    }

    pub fn wake_up_request() -> Self {
        Self { wake_up_request: true, ..Self::default() }
    }

    pub fn tilt_request() -> Self {
        Self { tilt_request: true, ..Self::default() }
    }

    pub fn start_tilt_calibration_request() -> Self {
        Self { start_tilt_calibration_request: true, ..Self::default() }
    }

    pub fn subscribe_alerts_request(types: Vec<AlertType>) -> Self {
        Self { subscribe_alerts_request: Some(types), ..Self::default() }
    }

    pub fn shot_config_request(config: ShotConfig) -> Self {
        Self { shot_config_request: Some(config), ..Self::default() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if self.status_request {
            w.put_message(F_STATUS_REQ, &[]);
        }
        if let Some(state) = self.status_response {
            let mut inner = Writer::new();
            inner.put_enum(1, state.to_i32());
            w.put_message(F_STATUS_RESP, &inner.into_bytes());
        }
        if self.wake_up_request {
            w.put_message(F_WAKE_REQ, &[]);
        }
        if let Some(state) = self.wake_up_response {
            let mut inner = Writer::new();
            inner.put_enum(1, state.to_i32());
            w.put_message(F_WAKE_RESP, &inner.into_bytes());
        }
        if self.tilt_request {
            w.put_message(F_TILT_REQ, &[]);
        }
        if let Some(tilt) = &self.tilt_response {
            let mut inner = Writer::new();
            inner.put_message(1, &tilt.encode());
            w.put_message(F_TILT_RESP, &inner.into_bytes());
        }
        if self.start_tilt_calibration_request {
            w.put_message(F_TILT_CAL_REQ, &[]);
        }
        if let Some(cal) = &self.tilt_calibration_response {
            w.put_message(F_TILT_CAL_RESP, &cal.encode());
        }
        if let Some(types) = &self.subscribe_alerts_request {
            let mut inner = Writer::new();
            for t in types {
                inner.put_uint32(1, t.to_u32());
            }
            w.put_message(F_SUB_ALERTS_REQ, &inner.into_bytes());
        }
        if let Some(entries) = &self.subscribe_alerts_response {
            let mut inner = Writer::new();
            for e in entries {
                inner.put_message(1, &e.encode());
            }
            w.put_message(F_SUB_ALERTS_RESP, &inner.into_bytes());
        }
        if let Some(config) = &self.shot_config_request {
            w.put_message(F_SHOT_CONFIG_REQ, &config.encode());
        }
        if let Some(success) = self.shot_config_response {
            let mut inner = Writer::new();
            inner.put_bool(1, success);
            w.put_message(F_SHOT_CONFIG_RESP, &inner.into_bytes());
        }
        if let Some(alert) = &self.alert_notification {
            w.put_message(F_ALERT_NOTIFICATION, &alert.encode());
        }
        w.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            match field {
                F_STATUS_REQ => out.status_request = true,
                F_STATUS_RESP => {
                    out.status_response = Some(decode_state_field(value.as_bytes())?)
                }
                F_WAKE_REQ => out.wake_up_request = true,
                F_WAKE_RESP => out.wake_up_response = Some(decode_state_field(value.as_bytes())?),
                F_TILT_REQ => out.tilt_request = true,
                F_TILT_RESP => {
                    let mut inner = Reader::new(value.as_bytes());
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            out.tilt_response = Some(Tilt::decode(v.as_bytes())?);
                        }
                    }
                }
                F_TILT_CAL_REQ => out.start_tilt_calibration_request = true,
                F_TILT_CAL_RESP => {
                    out.tilt_calibration_response =
                        Some(TiltCalibration::decode(value.as_bytes())?)
                }
                F_SUB_ALERTS_REQ => {
                    let mut types = Vec::new();
                    let mut inner = Reader::new(value.as_bytes());
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            types.push(AlertType::from_u32(v.as_u32()));
                        }
                    }
                    out.subscribe_alerts_request = Some(types);
                }
                F_SUB_ALERTS_RESP => {
                    let mut entries = Vec::new();
                    let mut inner = Reader::new(value.as_bytes());
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            entries.push(AlertStatus::decode(v.as_bytes())?);
                        }
                    }
                    out.subscribe_alerts_response = Some(entries);
                }
                F_SHOT_CONFIG_REQ => {
                    out.shot_config_request = Some(ShotConfig::decode(value.as_bytes())?)
                }
                F_SHOT_CONFIG_RESP => {
                    let mut inner = Reader::new(value.as_bytes());
                    while let Some((f, v)) = inner.next_field()? {
                        if f == 1 {
                            out.shot_config_response = Some(v.as_bool());
                        }
                    }
                }
                F_ALERT_NOTIFICATION => {
                    out.alert_notification = Some(AlertNotification::decode(value.as_bytes())?)
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

fn decode_state_field(data: &[u8]) -> Result<DeviceState, FrameError> {
    let mut state = DeviceState::Unknown;
    let mut r = Reader::new(data);
    while let Some((field, value)) = r.next_field()? {
        if field == 1 {
            state = DeviceState::from_i32(value.as_u32() as i32);
        }
    }
    Ok(state)
}

/// Top-level envelope carried inside interface frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wrapper {
    pub service: Option<LaunchMonitorService>,
}

impl Wrapper {
    pub fn new(service: LaunchMonitorService) -> Self {
        Self { service: Some(service) }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(service) = &self.service {
            w.put_message(1, &service.encode());
        }
        w.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let mut out = Self::default();
        let mut r = Reader::new(data);
        while let Some((field, value)) = r.next_field()? {
            if field == 1 {
                out.service = Some(LaunchMonitorService::decode(value.as_bytes())?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let msg = Wrapper::new(LaunchMonitorService {
            status_response: Some(DeviceState::Waiting),
            ..Default::default()
        });
        let decoded = Wrapper::decode(&msg.encode()).unwrap();
        assert_eq!(
            decoded.service.unwrap().status_response,
            Some(DeviceState::Waiting)
        );
    }

    #[test]
    fn test_alert_notification_round_trip() {
        let alert = AlertNotification {
            state: Some(DeviceState::Standby),
            error: Some(DeviceAlertError { code: 7, severity: 2 }),
            metrics: Some(ShotMetrics {
                shot_id: 42,
                ball: Some(BallMetrics {
                    ball_speed: 50.0,
                    launch_angle: 14.5,
                    launch_direction: -1.2,
                    spin_axis: 3.0,
                    total_spin: 3000.0,
                }),
                club: Some(ClubMetrics {
                    club_head_speed: 40.0,
                    attack_angle: -2.0,
                    club_angle_face: 1.0,
                    club_angle_path: 0.5,
                }),
            }),
            tilt_calibration: None,
        };
        let msg = Wrapper::new(LaunchMonitorService {
            alert_notification: Some(alert.clone()),
            ..Default::default()
        });
        let decoded = Wrapper::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.service.unwrap().alert_notification, Some(alert));
    }

    #[test]
    fn test_subscribe_alerts_round_trip() {
        let msg = LaunchMonitorService::subscribe_alerts_request(vec![AlertType::LaunchMonitor]);
        let decoded = LaunchMonitorService::decode(&msg.encode()).unwrap();
        assert_eq!(
            decoded.subscribe_alerts_request,
            Some(vec![AlertType::LaunchMonitor])
        );
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut w = Writer::new();
        w.put_uint32(200, 5);
        w.put_message(1, &LaunchMonitorService::status_request().encode());
        let decoded = Wrapper::decode(&w.into_bytes()).unwrap();
        assert!(decoded.service.unwrap().status_request);
    }
}
