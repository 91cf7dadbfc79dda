// SW-P-08 low-level framing.
//
// A data frame on the wire looks like:
//
// ```text
// DLE STX <payload, DLE bytes doubled> DLE ETX <checksum>
// ```
//
// The checksum is the two's complement of the modulo-256 sum of the
// unstuffed payload, so summing payload plus checksum yields zero.
// `DLE ACK` and `DLE NAK` travel bare, outside STX/ETX framing.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

pub const DLE: u8 = 0x10;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

/// One deframed unit: either a payload or a bare acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawFrame {
    Ack,
    Nak,
    Data(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    Checksum { expected: u8, got: u8 },
    Garbage(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameError::Checksum { expected, got } => {
                write!(f, "checksum mismatch: expected {expected:#04x}, got {got:#04x}")
            }
            FrameError::Garbage(b) => write!(f, "unexpected byte {b:#04x} outside frame"),
        }
    }
}

impl std::error::Error for FrameError {}

pub fn checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// Append a stuffed, checksummed frame for `payload` to `dst`.
pub fn write_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.put_u8(DLE);
    dst.put_u8(STX);
    for &b in payload {
        dst.put_u8(b);
        if b == DLE {
            dst.put_u8(DLE);
        }
    }
    dst.put_u8(DLE);
    dst.put_u8(ETX);
    dst.put_u8(checksum(payload));
}

pub fn write_ack(dst: &mut BytesMut) {
    dst.put_u8(DLE);
    dst.put_u8(ACK);
}

pub fn write_nak(dst: &mut BytesMut) {
    dst.put_u8(DLE);
    dst.put_u8(NAK);
}

/// Try to take one frame off the front of `src`.
///
/// Returns `Ok(None)` when more bytes are needed. Consumed bytes are
/// removed from `src` in every case, including errors, so the caller can
/// resynchronize on the next frame.
pub fn read_frame(src: &mut BytesMut) -> Result<Option<RawFrame>, FrameError> {
    if src.len() < 2 {
        return Ok(None);
    }
    if src[0] != DLE {
        let b = src[0];
        src.advance(1);
        return Err(FrameError::Garbage(b));
    }
    match src[1] {
        ACK => {
            src.advance(2);
            return Ok(Some(RawFrame::Ack));
        }
        NAK => {
            src.advance(2);
            return Ok(Some(RawFrame::Nak));
        }
        STX => {}
        // A stray DLE pair; drop it and resync.
        other => {
            src.advance(1);
            return Err(FrameError::Garbage(other));
        }
    }

    // Unstuff until DLE ETX, then one checksum byte.
    let mut payload = Vec::new();
    let mut pos = 2;
    loop {
        if pos >= src.len() {
            return Ok(None);
        }
        let b = src[pos];
        if b != DLE {
            payload.push(b);
            pos += 1;
            continue;
        }
        if pos + 1 >= src.len() {
            return Ok(None);
        }
        match src[pos + 1] {
            DLE => {
                payload.push(DLE);
                pos += 2;
            }
            ETX => {
                if pos + 2 >= src.len() {
                    return Ok(None);
                }
                let got = src[pos + 2];
                src.advance(pos + 3);
                let expected = checksum(&payload);
                if got != expected {
                    return Err(FrameError::Checksum { expected, got });
                }
                return Ok(Some(RawFrame::Data(payload)));
            }
            other => {
                // Broken stuffing; skip the mangled frame.
                src.advance(pos + 1);
                return Err(FrameError::Garbage(other));
            }
        }
    }
}
