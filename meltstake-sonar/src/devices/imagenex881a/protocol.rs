//! Response frame decoding for the 881A
//!
//! A response is `I <format> X`, nine header bytes, `n` data bytes and a
//! `0xFC` terminator. Multi-byte integers use the head's 7-bit split: the low
//! byte carries bits 0-6 and the high byte bits 7-12. The head sends no
//! checksum, so the declared length and the terminator are the only
//! integrity checks available.

use super::constants::*;
use crate::config::SonarConfig;
use crate::error::{Error, Result};
use crate::types::{PingFormat, PingRecord, StepDirection};
use serde::{Deserialize, Serialize};

// ============================================================================
// Field helpers
// ============================================================================

/// Join a 7-bit split pair into one value
#[inline]
pub fn join_7bit(lo: u8, hi: u8) -> u16 {
    (((hi & 0x3F) as u16) << 7) | (lo & 0x7F) as u16
}

/// Split a value into a 7-bit pair (`lo`, `hi`)
#[inline]
pub fn split_7bit(value: u16) -> (u8, u8) {
    ((value & 0x7F) as u8, ((value >> 7) & 0x3F) as u8)
}

/// Raw head position to degrees
#[inline]
pub fn head_angle(raw: u16) -> f32 {
    (raw as i32 - HEAD_POSITION_CENTER) as f32 * 3.0 / 10.0
}

/// Degrees to the nearest raw head position
pub fn head_position(angle: f32) -> u16 {
    let raw = (angle * 10.0 / 3.0).round() as i32 + HEAD_POSITION_CENTER;
    raw.clamp(0, HEAD_POSITION_MAX) as u16
}

// ============================================================================
// Header
// ============================================================================

/// Fixed fields at the start of every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub format_code: u8,
    pub head_id: u8,
    pub serial_status: u8,
    pub head_position: u16,
    pub direction: StepDirection,
    pub range: u8,
    pub profile_range: u16,
    pub data_len: usize,
}

impl ResponseHeader {
    pub fn angle(&self) -> f32 {
        head_angle(self.head_position)
    }

    pub fn switches_accepted(&self) -> bool {
        self.serial_status & STATUS_SWITCHES_ACCEPTED != 0
    }

    pub fn character_overrun(&self) -> bool {
        self.serial_status & STATUS_CHARACTER_OVERRUN != 0
    }
}

/// Total frame length announced by a partial header, if enough has arrived
/// and the start marker is right
pub fn expected_frame_len(header: &[u8]) -> Option<usize> {
    if header.len() < RESPONSE_HEADER_LEN
        || header[0] != HEADER_PREFIX
        || header[2] != HEADER_SUFFIX
    {
        return None;
    }
    let n = join_7bit(header[OFFSET_DATA_LEN_LO], header[OFFSET_DATA_LEN_HI]) as usize;
    Some(RESPONSE_HEADER_LEN + n + 1)
}

/// Check framing and parse the header of a complete response
pub fn parse_header(frame: &[u8]) -> Result<ResponseHeader> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(Error::MalformedFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != HEADER_PREFIX || frame[2] != HEADER_SUFFIX {
        return Err(Error::MalformedFrame(format!(
            "bad header {:02X} {:02X} {:02X}",
            frame[0], frame[1], frame[2]
        )));
    }
    let last = frame[frame.len() - 1];
    if last != RESPONSE_TERMINATOR {
        return Err(Error::MalformedFrame(format!(
            "bad terminator {:#04x}",
            last
        )));
    }

    let data_len = join_7bit(frame[OFFSET_DATA_LEN_LO], frame[OFFSET_DATA_LEN_HI]) as usize;
    if data_len != frame.len() - MIN_FRAME_LEN {
        return Err(Error::MalformedFrame(format!(
            "declared {} data bytes, frame carries {}",
            data_len,
            frame.len() - MIN_FRAME_LEN
        )));
    }

    let pos_hi = frame[OFFSET_HEAD_POS_HI];
    let direction = if pos_hi & FLAG_STEP_CLOCKWISE != 0 {
        StepDirection::Clockwise
    } else {
        StepDirection::CounterClockwise
    };

    Ok(ResponseHeader {
        format_code: frame[OFFSET_FORMAT],
        head_id: frame[OFFSET_HEAD_ID],
        serial_status: frame[OFFSET_STATUS],
        head_position: join_7bit(frame[OFFSET_HEAD_POS_LO], pos_hi),
        direction,
        range: frame[OFFSET_RANGE],
        profile_range: join_7bit(frame[OFFSET_PROFILE_LO], frame[OFFSET_PROFILE_HI]),
        data_len,
    })
}

// ============================================================================
// Ping decode / encode
// ============================================================================

/// Decode one echo response into a [`PingRecord`]
///
/// Pure: the same bytes and config always give the same record. The
/// acquisition time is left unset for the caller to stamp.
pub fn decode(frame: &[u8], config: &SonarConfig) -> Result<PingRecord> {
    let header = parse_header(frame)?;
    let format =
        PingFormat::from_code(header.format_code).ok_or(Error::UnsupportedFormat(header.format_code))?;

    if header.data_len != config.num_bins as usize {
        return Err(Error::MalformedFrame(format!(
            "expected {} bins, frame carries {}",
            config.num_bins, header.data_len
        )));
    }

    let data = &frame[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + header.data_len];

    Ok(PingRecord {
        format,
        head_id: header.head_id,
        serial_status: header.serial_status,
        angle: header.angle(),
        direction: header.direction,
        max_range: config.range as f32,
        profile_range: header.profile_range,
        amplitudes: data.to_vec(),
        frame: frame.to_vec(),
        acquired_at: None,
    })
}

/// Build the response frame the head would send for `ping`
pub fn encode_ping(ping: &PingRecord) -> Vec<u8> {
    let n = ping.amplitudes.len();
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + n);

    let (pos_lo, mut pos_hi) = split_7bit(head_position(ping.angle));
    if ping.direction == StepDirection::Clockwise {
        pos_hi |= FLAG_STEP_CLOCKWISE;
    }
    let (prof_lo, prof_hi) = split_7bit(ping.profile_range);
    let (len_lo, len_hi) = split_7bit(n as u16);

    frame.extend_from_slice(&[HEADER_PREFIX, ping.format.code(), HEADER_SUFFIX]);
    frame.push(ping.head_id);
    frame.push(ping.serial_status);
    frame.push(pos_lo);
    frame.push(pos_hi);
    frame.push(ping.max_range.round().clamp(0.0, 255.0) as u8);
    frame.push(prof_lo);
    frame.push(prof_hi);
    frame.push(len_lo);
    frame.push(len_hi);
    frame.extend_from_slice(&ping.amplitudes);
    frame.push(RESPONSE_TERMINATOR);
    frame
}

// ============================================================================
// Orientation (IOX)
// ============================================================================

/// Attitude and environment sample from an orientation response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationRecord {
    /// Water temperature, °C
    pub temp_external: f32,
    /// Housing temperature, °C
    pub temp_internal: f32,
    /// Depth, m
    pub depth: f32,
    /// Degrees
    pub pitch: f32,
    /// Degrees
    pub roll: f32,
    /// Magnetic heading, degrees
    pub heading: f32,
    /// Gyro heading, degrees
    pub gyro_heading: f32,
}

/// Decode an `IOX` response
pub fn decode_orientation(frame: &[u8]) -> Result<OrientationRecord> {
    let header = parse_header(frame)?;
    if header.format_code != FORMAT_ORIENTATION {
        return Err(Error::UnsupportedFormat(header.format_code));
    }
    if header.data_len < ORIENT_MIN_DATA_LEN {
        return Err(Error::MalformedFrame(format!(
            "orientation payload too short: {} bytes",
            header.data_len
        )));
    }

    let field = |offset: usize| join_7bit(frame[offset], frame[offset + 1]) as f32;

    Ok(OrientationRecord {
        temp_external: field(ORIENT_TEMP_EXTERNAL) / 16.0 - 55.0,
        temp_internal: field(ORIENT_TEMP_INTERNAL) / 16.0 - 55.0,
        depth: field(ORIENT_DEPTH) / 10.0,
        pitch: field(ORIENT_PITCH) / 10.0 - 90.0,
        roll: field(ORIENT_ROLL) / 10.0 - 90.0,
        heading: field(ORIENT_HEADING) / 10.0,
        gyro_heading: field(ORIENT_GYRO_HEADING) / 10.0,
    })
}

// ============================================================================
// Recorded streams
// ============================================================================

/// Splits a concatenation of response frames using each declared length
///
/// Stops after the first error since there is no way to resynchronise
/// without a reliable start marker.
pub struct FrameIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let len = match expected_frame_len(rest) {
            Some(len) if len <= rest.len() => len,
            Some(len) => {
                self.failed = true;
                return Some(Err(Error::MalformedFrame(format!(
                    "truncated frame at offset {}: need {} bytes, have {}",
                    self.pos,
                    len,
                    rest.len()
                ))));
            }
            None => {
                self.failed = true;
                return Some(Err(Error::MalformedFrame(format!(
                    "no frame header at offset {}",
                    self.pos
                ))));
            }
        };
        self.pos += len;
        Some(Ok(&rest[..len]))
    }
}
