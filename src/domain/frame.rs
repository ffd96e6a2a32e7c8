//! Wire framing for the device-interface stream.
//!
//! # Frame structure
//!
//! ```text
//! message M
//!   │
//!   ▼
//! [len u16 LE][ M ][ CRC16(len‖M) u16 LE ]     len = 2 + len(M) + 2
//!   │
//!   ▼ COBS encode (zero-free)
//! [ encoded ]
//!   │
//!   ▼ sentinel wrap
//! [00][ encoded ][00]
//!   │
//!   ▼ ≤19-byte slices, each prefixed with the session header byte
//! [HH][slice0] [HH][slice1] …
//! ```
//!
//! Inbound notifications are reassembled in the reverse direction: a leading
//! `0x00` starts a frame, a trailing `0x00` completes it, and the completed
//! buffer is COBS-decoded, CRC-verified and stripped of its length prefix.

use crate::domain::{cobs, crc};
use crate::error::FrameError;

/// Largest slice that fits a BLE write alongside the header byte.
pub const MAX_CHUNK: usize = 19;

/// Shortest valid decoded frame: `len(2) ‖ payload(≥2) ‖ crc(2)`.
const MIN_FRAME: usize = 6;

/// Build the sentinel-wrapped wire frame for `message`.
pub fn encode_message(message: &[u8]) -> Vec<u8> {
    let total = (2 + message.len() + 2) as u16;
    let mut body = Vec::with_capacity(message.len() + 4);
    body.extend_from_slice(&total.to_le_bytes());
    body.extend_from_slice(message);
    let body = crc::append_checksum(&body);

    let encoded = cobs::encode(&body);
    let mut frame = Vec::with_capacity(encoded.len() + 2);
    frame.push(0x00);
    frame.extend_from_slice(&encoded);
    frame.push(0x00);
    frame
}

/// Split a wire frame into BLE writes, each carrying the session header byte.
pub fn chunk(frame: &[u8], header: u8) -> Vec<Vec<u8>> {
    frame
        .chunks(MAX_CHUNK)
        .map(|slice| {
            let mut write = Vec::with_capacity(slice.len() + 1);
            write.push(header);
            write.extend_from_slice(slice);
            write
        })
        .collect()
}

/// Decode a fully reassembled (sentinel-stripped) frame into its payload.
pub fn decode_frame(raw: &[u8]) -> Result<Vec<u8>, FrameError> {
    let body = cobs::decode(raw)?;
    if body.len() < MIN_FRAME {
        return Err(FrameError::TooShort(body.len()));
    }
    let body = crc::verify_and_strip(&body)?;
    let declared = u16::from_le_bytes([body[0], body[1]]) as usize;
    // The length field counts itself, the payload and the CRC trailer.
    if declared != body.len() + 2 {
        return Err(FrameError::Malformed("length prefix mismatch"));
    }
    Ok(body[2..].to_vec())
}

/// Incremental frame reassembly across BLE notifications.
///
/// Bytes arriving outside a sentinel-delimited frame are discarded, so the
/// stream self-synchronises on the next start sentinel after any failure.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    in_frame: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification payload (header byte already stripped).
    ///
    /// Returns the raw COBS-encoded frame body when a trailing sentinel
    /// completes a frame.
    pub fn accept(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        // A lone sentinel while a frame is open is its terminator, not a
        // restart; the chunker emits one whenever the wire frame length
        // lands one past a chunk boundary.
        if self.in_frame && data.len() == 1 && data[0] == 0x00 {
            self.in_frame = false;
            return Some(std::mem::take(&mut self.buf));
        }
        let mut data = data;
        if data.first() == Some(&0x00) {
            self.buf.clear();
            self.in_frame = true;
            data = &data[1..];
        }
        if !self.in_frame || data.is_empty() {
            return None;
        }
        if data.last() == Some(&0x00) {
            self.buf.extend_from_slice(&data[..data.len() - 1]);
            self.in_frame = false;
            return Some(std::mem::take(&mut self.buf));
        }
        self.buf.extend_from_slice(data);
        None
    }

    /// Drop any partial frame and wait for the next start sentinel.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
    }
}
