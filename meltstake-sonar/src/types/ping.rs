//! Sonar ping types

use crate::config::bin_range;
use chrono::{DateTime, Utc};
use std::fmt;

/// Direction the head stepped to reach a ping's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepDirection {
    Clockwise,
    CounterClockwise,
}

impl StepDirection {
    /// Short label used in CSV output
    pub fn as_str(&self) -> &'static str {
        match self {
            StepDirection::Clockwise => "cw",
            StepDirection::CounterClockwise => "ccw",
        }
    }

    /// The opposite direction
    pub fn reversed(&self) -> Self {
        match self {
            StepDirection::Clockwise => StepDirection::CounterClockwise,
            StepDirection::CounterClockwise => StepDirection::Clockwise,
        }
    }
}

impl fmt::Display for StepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data format announced by the response header (`I?X`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFormat {
    /// `IMX`: 25-250 data points
    Imx,
    /// `IGX`: 50-500 data points
    Igx,
}

impl PingFormat {
    /// Header letter for this format
    pub fn code(&self) -> u8 {
        match self {
            PingFormat::Imx => b'M',
            PingFormat::Igx => b'G',
        }
    }

    /// Parse a header letter
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'M' => Some(PingFormat::Imx),
            b'G' => Some(PingFormat::Igx),
            _ => None,
        }
    }

    /// Format the head uses for a given bin count
    pub fn for_bins(num_bins: usize) -> Self {
        if num_bins > 250 {
            PingFormat::Igx
        } else {
            PingFormat::Imx
        }
    }
}

/// One head position sample
///
/// Built by the decoder from a single response frame and never modified
/// afterwards. `amplitudes[i]` is the echo at `bin_range(i)` meters.
#[derive(Debug, Clone, PartialEq)]
pub struct PingRecord {
    pub(crate) format: PingFormat,
    pub(crate) head_id: u8,
    pub(crate) serial_status: u8,
    pub(crate) angle: f32,
    pub(crate) direction: StepDirection,
    pub(crate) max_range: f32,
    pub(crate) profile_range: u16,
    pub(crate) amplitudes: Vec<u8>,
    pub(crate) frame: Vec<u8>,
    pub(crate) acquired_at: Option<DateTime<Utc>>,
}

impl PingRecord {
    /// Synthetic ping with default header fields (head 0x10, switches accepted)
    pub fn new(angle: f32, direction: StepDirection, amplitudes: Vec<u8>, max_range: f32) -> Self {
        Self {
            format: PingFormat::for_bins(amplitudes.len()),
            head_id: 0x10,
            serial_status: 0x40,
            angle,
            direction,
            max_range,
            profile_range: 0,
            amplitudes,
            frame: Vec::new(),
            acquired_at: None,
        }
    }

    /// Same ping with an acquisition time
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.acquired_at = Some(at);
        self
    }

    /// Same ping with a profile range value
    pub fn with_profile_range(mut self, profile_range: u16) -> Self {
        self.profile_range = profile_range;
        self
    }

    pub fn format(&self) -> PingFormat {
        self.format
    }

    pub fn head_id(&self) -> u8 {
        self.head_id
    }

    pub fn serial_status(&self) -> u8 {
        self.serial_status
    }

    /// Head angle in degrees
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn direction(&self) -> StepDirection {
        self.direction
    }

    /// Configured maximum range in meters
    pub fn max_range(&self) -> f32 {
        self.max_range
    }

    /// Raw profile range reported by the head
    pub fn profile_range(&self) -> u16 {
        self.profile_range
    }

    /// Echo amplitudes in range order
    pub fn amplitudes(&self) -> &[u8] {
        &self.amplitudes
    }

    pub fn num_bins(&self) -> usize {
        self.amplitudes.len()
    }

    /// Response frame this ping was decoded from (empty for synthetic pings)
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.acquired_at
    }

    /// Range in meters of bin `index`
    pub fn bin_range(&self, index: usize) -> f32 {
        bin_range(self.max_range, self.amplitudes.len(), index)
    }

    /// Strongest echo as `(range_m, amplitude)`
    pub fn peak(&self) -> Option<(f32, u8)> {
        self.amplitudes
            .iter()
            .enumerate()
            .max_by_key(|&(_, &a)| a)
            .map(|(i, &a)| (self.bin_range(i), a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_labels() {
        assert_eq!(StepDirection::Clockwise.as_str(), "cw");
        assert_eq!(StepDirection::CounterClockwise.to_string(), "ccw");
        assert_eq!(
            StepDirection::Clockwise.reversed(),
            StepDirection::CounterClockwise
        );
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(PingFormat::from_code(b'M'), Some(PingFormat::Imx));
        assert_eq!(PingFormat::from_code(b'G'), Some(PingFormat::Igx));
        assert_eq!(PingFormat::from_code(b'O'), None);
        assert_eq!(PingFormat::for_bins(250), PingFormat::Imx);
        assert_eq!(PingFormat::for_bins(500), PingFormat::Igx);
    }

    #[test]
    fn test_peak_and_bin_range() {
        let mut amplitudes = vec![0u8; 11];
        amplitudes[4] = 200;
        let ping = PingRecord::new(0.0, StepDirection::Clockwise, amplitudes, 10.0);

        assert_eq!(ping.num_bins(), 11);
        assert_eq!(ping.bin_range(10), 10.0);
        let (range, amp) = ping.peak().unwrap();
        assert_eq!(amp, 200);
        assert!((range - 4.0).abs() < 1e-6);
        assert!(ping.acquired_at().is_none());
    }
}
