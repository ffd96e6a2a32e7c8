//! R10 GATT surface and interface-message layout.
//!
//! UUIDs use two bases: the Bluetooth SIG base for the standard device
//! information and battery services, and the Garmin base
//! `xxxxxxxx-667b-11e3-949a-0800200c9a66` for the proprietary interface and
//! measurement services.

use std::time::Duration;

use uuid::Uuid;

// --- Standard services -----------------------------------------------------

pub const DEVICE_INFO_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const SERIAL_NUMBER_CHAR: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);
pub const MODEL_NUMBER_CHAR: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const FIRMWARE_REVISION_CHAR: Uuid = Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);

pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const BATTERY_LEVEL_CHAR: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

// --- Garmin proprietary services -------------------------------------------

pub const DEVICE_INTERFACE_SERVICE: Uuid =
    Uuid::from_u128(0x6a4e2800_667b_11e3_949a_0800200c9a66);
/// Protected notifier; enabling it requires authentication and MUST be the
/// first GATT operation of a session.
pub const DEVICE_INTERFACE_NOTIFIER: Uuid =
    Uuid::from_u128(0x6a4e2812_667b_11e3_949a_0800200c9a66);
/// Write-without-response characteristic carrying all host frames.
pub const DEVICE_INTERFACE_WRITER: Uuid =
    Uuid::from_u128(0x6a4e2822_667b_11e3_949a_0800200c9a66);

pub const MEASUREMENT_SERVICE: Uuid = Uuid::from_u128(0x6a4e3400_667b_11e3_949a_0800200c9a66);
pub const MEASUREMENT_CHAR: Uuid = Uuid::from_u128(0x6a4e3401_667b_11e3_949a_0800200c9a66);
pub const CONTROL_POINT_CHAR: Uuid = Uuid::from_u128(0x6a4e3402_667b_11e3_949a_0800200c9a66);
pub const STATUS_CHAR: Uuid = Uuid::from_u128(0x6a4e3403_667b_11e3_949a_0800200c9a66);

// --- Timing ----------------------------------------------------------------

/// Covers the in-band pairing round-trip on the protected notifier.
pub const NOTIFY_ENABLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const SERVICES_RESOLVED_TIMEOUT: Duration = Duration::from_secs(30);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_ATTEMPTS: u32 = 3;

/// BLE notification bursts are naturally throttled; a deeper queue would
/// only hide a wedged worker.
pub const QUEUE_DEPTH: usize = 64;

// --- Handshake -------------------------------------------------------------

/// Opening message, written with the provisional `0x00` header byte.
pub const HANDSHAKE_HELLO: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0];
/// Final host confirmation once the reply has been accepted.
pub const HANDSHAKE_CONFIRM: [u8; 1] = [0x00];

/// Parse the device's handshake reply.
///
/// ```text
/// 01 00 00 00 00 00 00 00 00 01 00 00 HH 00 00 00
///                                     └─ session header byte
/// ```
pub fn parse_handshake_reply(data: &[u8]) -> Option<u8> {
    if data.len() >= 13 && data[0] == 0x01 && data[9] == 0x01 {
        Some(data[12])
    } else {
        None
    }
}

// --- Message classification ------------------------------------------------

/// Post-handshake message classes, keyed on the first two payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `A013…` — device-info message; acknowledged, otherwise ignored.
    DeviceInfo,
    /// `BA13…` — configuration message; acknowledged, otherwise ignored.
    Config,
    /// `B413…` — protobuf response to an outstanding request.
    Response,
    /// `B313…` — protobuf request pushed by the device (alerts).
    Request,
    Unknown,
}

pub fn classify(payload: &[u8]) -> MessageKind {
    match payload {
        [0xA0, 0x13, ..] => MessageKind::DeviceInfo,
        [0xBA, 0x13, ..] => MessageKind::Config,
        [0xB4, 0x13, ..] => MessageKind::Response,
        [0xB3, 0x13, ..] => MessageKind::Request,
        _ => MessageKind::Unknown,
    }
}

/// Offset of the protobuf body in `B313`/`B413` payloads.
pub const PROTO_OFFSET: usize = 16;

/// Build a `B313` request payload around an encoded protobuf body.
///
/// ```text
/// [0..2]   B3 13
/// [2..4]   counter (u16 LE)
/// [4..12]  reserved, zero
/// [12..14] protobuf length (u16 LE)
/// [14..16] protobuf length again
/// [16..]   protobuf body
/// ```
pub fn build_proto_request(counter: u16, proto: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PROTO_OFFSET + proto.len());
    payload.extend_from_slice(&[0xB3, 0x13]);
    payload.extend_from_slice(&counter.to_le_bytes());
    payload.extend_from_slice(&[0u8; 8]);
    let len = (proto.len() as u16).to_le_bytes();
    payload.extend_from_slice(&len);
    payload.extend_from_slice(&len);
    payload.extend_from_slice(proto);
    payload
}

/// Counter embedded in a `B313`/`B413` payload.
pub fn embedded_counter(payload: &[u8]) -> Option<u16> {
    if payload.len() >= 4 {
        Some(u16::from_le_bytes([payload[2], payload[3]]))
    } else {
        None
    }
}

/// Protobuf body of a `B313`/`B413` payload.
pub fn proto_body(payload: &[u8]) -> Option<&[u8]> {
    payload.get(PROTO_OFFSET..)
}

/// Build the `8813` acknowledgement for a classified message: the prefix,
/// the first two bytes of the message being acknowledged, and a fixed
/// 8-byte tail.
pub fn build_ack(payload: &[u8]) -> Vec<u8> {
    let mut ack = Vec::with_capacity(12);
    ack.extend_from_slice(&[0x88, 0x13]);
    ack.extend_from_slice(&payload[..2.min(payload.len())]);
    ack.extend_from_slice(&[0u8; 8]);
    ack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_reply_header_byte() {
        let reply = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x7E, 0x00,
            0x00, 0x00,
        ];
        assert_eq!(parse_handshake_reply(&reply), Some(0x7E));
        assert_eq!(parse_handshake_reply(&reply[..8]), None);
        assert_eq!(parse_handshake_reply(&HANDSHAKE_HELLO), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&[0xA0, 0x13, 0x00]), MessageKind::DeviceInfo);
        assert_eq!(classify(&[0xBA, 0x13]), MessageKind::Config);
        assert_eq!(classify(&[0xB4, 0x13, 0x05]), MessageKind::Response);
        assert_eq!(classify(&[0xB3, 0x13]), MessageKind::Request);
        assert_eq!(classify(&[0x88, 0x13]), MessageKind::Unknown);
    }

    #[test]
    fn test_request_layout() {
        let proto = [0xAA, 0xBB, 0xCC];
        let payload = build_proto_request(7, &proto);
        assert_eq!(&payload[..2], &[0xB3, 0x13]);
        assert_eq!(embedded_counter(&payload), Some(7));
        assert_eq!(&payload[12..14], &3u16.to_le_bytes());
        assert_eq!(&payload[14..16], &3u16.to_le_bytes());
        assert_eq!(proto_body(&payload).unwrap(), &proto);
    }

    #[test]
    fn test_ack_echoes_prefix() {
        let ack = build_ack(&[0xB4, 0x13, 0x01, 0x02]);
        assert_eq!(ack.len(), 12);
        assert_eq!(&ack[..4], &[0x88, 0x13, 0xB4, 0x13]);
        assert!(ack[4..].iter().all(|&b| b == 0));
    }
}
