//! Configuration for the Melt Stake sonar logger
//!
//! Loads a deployment configuration from TOML. Every table has defaults, so a
//! file only needs the values that differ from them:
//!
//! ```toml
//! [connection]
//! device_name = "usbserial"   # auto-detect when `port` is absent
//! baud = 115200
//! timeout_ms = 1000
//!
//! [scan]
//! range = 10
//! num_bins = 250
//! num_sweeps = 2
//! step_size = 1
//! start_angle = -30.0
//! stop_angle = 30.0
//!
//! [session]
//! max_consecutive_failures = 3
//!
//! [logging]
//! level = "info"
//! output = "deployment"
//! ```
//!
//! Out-of-range switch values are clamped with a warning, and a sector that is
//! not on the head's 3° switch grid is moved onto it. Values that cannot be
//! sent to the head at all (bin counts the 881A cannot produce, an empty sector)
//! fail the load with [`Error::Config`].

use crate::error::{Error, Result};
use crate::types::SweepPlan;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::Path;

/// Head step resolution in degrees per step-size unit
pub const HEAD_STEP_DEGREES: f32 = 0.3;

/// Resolution of the train angle and sector width switches, degrees
pub const SECTOR_UNIT_DEGREES: f32 = 3.0;

/// Byte value the 881A reserves for the switch-command terminator
const TERMINATOR_VALUE: u8 = 0xFD;

// ============================================================================
// Top-level configuration
// ============================================================================

/// Top-level deployment configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub scan: SonarConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use meltstake_sonar::config::AppConfig;
    ///
    /// let config = AppConfig::load("meltstake.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&contents)?;
        log::info!("Configuration loaded: {}", path.display());
        Ok(config)
    }

    /// Parse and normalize configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.normalize()?;
        Ok(config)
    }

    /// Clamp soft limits and reject values the head cannot accept
    pub fn normalize(&mut self) -> Result<()> {
        self.connection.normalize()?;
        self.scan.normalize()?;
        self.session.normalize();
        Ok(())
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Serial connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Explicit port path (e.g. `/dev/ttyUSB0`); auto-detected when absent
    pub port: Option<String>,
    /// Substring matched against port names and USB descriptions for auto-detection
    pub device_name: String,
    /// Baud rate; the switch command always requests 115200 from the head
    pub baud: u32,
    /// Per-request response window
    pub timeout_ms: u64,
    /// Run against the built-in simulated head instead of a serial port
    pub simulate: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: None,
            device_name: "usbserial".to_string(),
            baud: 115_200,
            timeout_ms: 1000,
            simulate: false,
        }
    }
}

impl ConnectionConfig {
    fn normalize(&mut self) -> Result<()> {
        self.port = self
            .port
            .take()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        self.device_name = self.device_name.trim().to_lowercase();
        if self.port.is_none() && self.device_name.is_empty() && !self.simulate {
            log::warn!("Config 'device_name' blank and no port given; using default 'usbserial'");
            self.device_name = "usbserial".to_string();
        }
        if self.baud == 0 {
            return Err(Error::Config("connection.baud must be > 0".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("connection.timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Sonar switch parameters
// ============================================================================

/// Sonar operating parameters, immutable for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SonarConfig {
    /// Maximum range in meters (1-200)
    pub range: u8,
    /// Range bins per ping (multiple of 10, at most 500)
    pub num_bins: u16,
    /// Sweeps per scan; sweeps alternate clockwise / counter-clockwise
    pub num_sweeps: u32,
    /// Head step in 0.3° units (1-8)
    pub step_size: u8,
    /// Sector start, degrees
    pub start_angle: f32,
    /// Sector stop, degrees
    pub stop_angle: f32,
    /// Frequency code: (kHz - 675) / 5 + 100
    pub frequency: u8,
    /// Delay before the head answers, 2 ms units
    pub switch_delay: u8,
    /// Start gain in dB (0-40)
    pub start_gain: u8,
    /// Log gain code (0=10dB, 1=20dB, 2=30dB, 3=40dB)
    pub log_gain: u8,
    /// Absorption in dB/m × 100
    pub absorption: u8,
    /// Pulse length in 10 µs units (1-100)
    pub pulse_length: u8,
    /// Ask the head to calibrate its transducer when configured
    pub calibrate: bool,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            range: 10,
            num_bins: 250,
            num_sweeps: 2,
            step_size: 1,
            start_angle: -30.0,
            stop_angle: 30.0,
            frequency: 165,
            switch_delay: 1,
            start_gain: 18,
            log_gain: 0,
            absorption: 60,
            pulse_length: 2,
            calibrate: false,
        }
    }
}

impl SonarConfig {
    /// Clamp soft limits and reject impossible values
    pub fn normalize(&mut self) -> Result<()> {
        if self.num_bins == 0 || self.num_bins % 10 != 0 || self.num_bins > 500 {
            return Err(Error::Config(format!(
                "scan.num_bins must be a positive multiple of 10 up to 500, got {}",
                self.num_bins
            )));
        }
        if !(-180.0..=180.0).contains(&self.start_angle)
            || !(-180.0..=180.0).contains(&self.stop_angle)
            || self.start_angle >= self.stop_angle
        {
            return Err(Error::Config(format!(
                "scan sector [{}, {}] must satisfy -180 <= start < stop <= 180",
                self.start_angle, self.stop_angle
            )));
        }

        self.snap_sector()?;

        clamp_field("scan.range", &mut self.range, 1, 200);
        clamp_field("scan.num_sweeps", &mut self.num_sweeps, 1, 10_000);
        clamp_field("scan.step_size", &mut self.step_size, 1, 8);
        clamp_field("scan.frequency", &mut self.frequency, 0, 200);
        clamp_field("scan.start_gain", &mut self.start_gain, 0, 40);
        clamp_field("scan.pulse_length", &mut self.pulse_length, 1, 100);

        if self.log_gain > 3 {
            log::warn!(
                "Config 'scan.log_gain' must be one of [0, 1, 2, 3]; got {}, using 0",
                self.log_gain
            );
            self.log_gain = 0;
        }
        for (name, value) in [
            ("scan.absorption", &mut self.absorption),
            ("scan.switch_delay", &mut self.switch_delay),
        ] {
            if *value == TERMINATOR_VALUE {
                log::warn!("Config '{}' cannot be 0xFD; using 0xFC", name);
                *value = TERMINATOR_VALUE - 1;
            }
        }
        Ok(())
    }

    /// Move the sector onto the 3° grid of the train angle and sector
    /// width switches, so the configured sector is the one the head sweeps
    fn snap_sector(&mut self) -> Result<()> {
        let width_code = self.sector_width_code();
        if width_code == 0 {
            return Err(Error::Config(format!(
                "scan sector [{}, {}] is narrower than the head's {}° minimum",
                self.start_angle, self.stop_angle, SECTOR_UNIT_DEGREES
            )));
        }
        let centre = self.train_angle_code() as f32 * SECTOR_UNIT_DEGREES - 180.0;
        let half = width_code as f32 * SECTOR_UNIT_DEGREES / 2.0;
        let (start, stop) = (centre - half, centre + half);
        if start < -180.0 || stop > 180.0 {
            return Err(Error::Config(format!(
                "scan sector [{}, {}] cannot be centred on the head's {}° grid",
                self.start_angle, self.stop_angle, SECTOR_UNIT_DEGREES
            )));
        }

        if (start - self.start_angle).abs() > 1e-3 || (stop - self.stop_angle).abs() > 1e-3 {
            log::warn!(
                "Config 'scan' sector [{}, {}] is not on the head's {}° grid; using [{}, {}]",
                self.start_angle,
                self.stop_angle,
                SECTOR_UNIT_DEGREES,
                start,
                stop
            );
            self.start_angle = start;
            self.stop_angle = stop;
        }
        Ok(())
    }

    /// Degrees moved per head step
    pub fn step_degrees(&self) -> f32 {
        self.step_size as f32 * HEAD_STEP_DEGREES
    }

    /// Angular width of the sector the head is commanded to sweep, degrees
    pub fn sector_span(&self) -> f32 {
        self.sector_width_code() as f32 * SECTOR_UNIT_DEGREES
    }

    /// Pings needed to cross the sector once, counting a final partial step
    pub fn pings_per_sweep(&self) -> usize {
        let steps = self.sector_span() / self.step_degrees().max(HEAD_STEP_DEGREES);
        let rounded = steps.round();
        let steps = if (steps - rounded).abs() < 1e-3 {
            rounded
        } else {
            steps.ceil()
        };
        (steps as usize).max(1)
    }

    /// Pings a complete scan must contain
    pub fn expected_pings(&self) -> usize {
        self.num_sweeps as usize * self.pings_per_sweep()
    }

    /// Sweep sequencing for one scan
    pub fn sweep_plan(&self) -> SweepPlan {
        SweepPlan::new(self.pings_per_sweep(), self.num_sweeps as usize)
    }

    /// Train angle switch byte: (centre + 180) / 3
    pub fn train_angle_code(&self) -> u8 {
        let centre = (self.start_angle + self.stop_angle) / 2.0;
        ((centre + 180.0) / SECTOR_UNIT_DEGREES).round().clamp(0.0, 120.0) as u8
    }

    /// Sector width switch byte, 3° units
    pub fn sector_width_code(&self) -> u8 {
        ((self.stop_angle - self.start_angle) / SECTOR_UNIT_DEGREES)
            .round()
            .clamp(0.0, 120.0) as u8
    }

    /// Data points switch byte (bins / 10)
    pub fn data_points_code(&self) -> u8 {
        (self.num_bins / 10) as u8
    }

    /// Range in meters represented by bin `index`
    pub fn bin_range(&self, index: usize) -> f32 {
        bin_range(self.range as f32, self.num_bins as usize, index)
    }
}

/// Linear bin-to-range mapping: `max_range * i / (bins - 1)`
pub fn bin_range(max_range: f32, num_bins: usize, index: usize) -> f32 {
    if num_bins < 2 {
        return 0.0;
    }
    max_range * index as f32 / (num_bins - 1) as f32
}

fn clamp_field<T: PartialOrd + Copy + Display>(name: &str, value: &mut T, lo: T, hi: T) {
    let clamped = if *value < lo {
        lo
    } else if *value > hi {
        hi
    } else {
        return;
    };
    log::warn!(
        "Config '{}' = {} outside [{}, {}]; using {}",
        name,
        value,
        lo,
        hi,
        clamped
    );
    *value = clamped;
}

// ============================================================================
// Session, logging, simulation
// ============================================================================

/// Scan session behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive failed ping requests tolerated before a scan is aborted
    pub max_consecutive_failures: u32,
    /// Run index file name inside the deployment directory
    pub run_index: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            run_index: "RunIndex.csv".to_string(),
        }
    }
}

impl SessionConfig {
    fn normalize(&mut self) {
        clamp_field(
            "session.max_consecutive_failures",
            &mut self.max_consecutive_failures,
            1,
            1000,
        );
        if self.run_index.trim().is_empty() {
            self.run_index = Self::default().run_index;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output: `stdout`, `stderr`, `deployment` (log file in the
    /// deployment directory) or a file path
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "deployment".to_string(),
        }
    }
}

/// Simulated sonar head parameters (used when `connection.simulate = true`)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Noise seed; 0 draws from entropy
    pub seed: u64,
    /// Distance of the simulated reflecting surface, meters
    pub target_range: f32,
    /// Amplitude noise standard deviation
    pub noise_stddev: f32,
    /// Probability that the head stays silent for a request
    pub dropout_probability: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            target_range: 4.0,
            noise_stddev: 6.0,
            dropout_probability: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.connection.baud, 115_200);
        assert_eq!(config.connection.device_name, "usbserial");
        assert_eq!(config.scan.num_bins, 250);
        assert_eq!(config.scan.num_sweeps, 2);
        assert_eq!(config.session.max_consecutive_failures, 3);
        assert_eq!(config.session.run_index, "RunIndex.csv");
    }

    #[test]
    fn test_toml_deserialization() {
        let config = AppConfig::from_toml(
            r#"
[connection]
port = " /dev/ttyUSB0 "
timeout_ms = 250

[scan]
range = 20
num_bins = 500
num_sweeps = 4
step_size = 2
start_angle = -45.0
stop_angle = 45.0

[logging]
level = "debug"
output = "stderr"
"#,
        )
        .unwrap();

        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.timeout_ms, 250);
        assert_eq!(config.scan.range, 20);
        assert_eq!(config.scan.num_bins, 500);
        assert_eq!(config.scan.num_sweeps, 4);
        assert_eq!(config.scan.frequency, 165); // default kept
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_clamps_soft_limits() {
        let config = AppConfig::from_toml(
            r#"
[scan]
range = 250
step_size = 12
start_gain = 90
log_gain = 7
absorption = 253
pulse_length = 0
"#,
        )
        .unwrap();

        assert_eq!(config.scan.range, 200);
        assert_eq!(config.scan.step_size, 8);
        assert_eq!(config.scan.start_gain, 40);
        assert_eq!(config.scan.log_gain, 0);
        assert_eq!(config.scan.absorption, 0xFC);
        assert_eq!(config.scan.pulse_length, 1);
    }

    #[test]
    fn test_rejects_invalid_bins_and_sector() {
        assert!(matches!(
            AppConfig::from_toml("[scan]\nnum_bins = 0\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[scan]\nnum_bins = 105\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[scan]\nstart_angle = 10.0\nstop_angle = 10.0\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_pings_per_sweep() {
        let mut scan = SonarConfig::default();
        // 60° sector at 0.3° per step
        assert_eq!(scan.pings_per_sweep(), 200);
        assert_eq!(scan.expected_pings(), 400);

        // 1.2° steps leave a partial final step over 9°
        scan.start_angle = -4.5;
        scan.stop_angle = 4.5;
        scan.step_size = 4;
        assert_eq!(scan.pings_per_sweep(), 8);

        // Counted over the commanded 9° width, not the requested 10°
        scan.start_angle = 0.0;
        scan.stop_angle = 10.0;
        assert_eq!(scan.pings_per_sweep(), 8);

        // A hold step never divides by zero
        scan.step_size = 0;
        assert_eq!(scan.pings_per_sweep(), 30);
    }

    #[test]
    fn test_snaps_sector_to_switch_grid() {
        let mut scan = SonarConfig {
            start_angle: -30.0,
            stop_angle: -27.0,
            ..SonarConfig::default()
        };
        scan.normalize().unwrap();
        assert_eq!(scan.start_angle, -28.5);
        assert_eq!(scan.stop_angle, -25.5);
        assert_eq!(scan.train_angle_code(), 51);
        assert_eq!(scan.sector_width_code(), 1);
        assert_eq!(scan.pings_per_sweep(), 10);

        // Already on the grid: untouched
        let mut scan = SonarConfig::default();
        scan.normalize().unwrap();
        assert_eq!((scan.start_angle, scan.stop_angle), (-30.0, 30.0));

        // Narrower than one width unit
        let mut scan = SonarConfig {
            start_angle: 0.0,
            stop_angle: 1.0,
            ..SonarConfig::default()
        };
        assert!(matches!(scan.normalize(), Err(Error::Config(_))));
    }

    #[test]
    fn test_switch_codes() {
        let scan = SonarConfig {
            start_angle: -90.0,
            stop_angle: 90.0,
            num_bins: 500,
            ..SonarConfig::default()
        };
        assert_eq!(scan.train_angle_code(), 60);
        assert_eq!(scan.sector_width_code(), 60);
        assert_eq!(scan.data_points_code(), 50);
    }

    #[test]
    fn test_bin_range() {
        let scan = SonarConfig {
            range: 10,
            num_bins: 100,
            ..SonarConfig::default()
        };
        assert_eq!(scan.bin_range(0), 0.0);
        assert!((scan.bin_range(99) - 10.0).abs() < 1e-6);
        assert!((scan.bin_range(50) - 5.0505).abs() < 1e-3);
        assert_eq!(bin_range(10.0, 1, 0), 0.0);
    }
}
