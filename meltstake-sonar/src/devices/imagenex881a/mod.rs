//! Imagenex 881A mechanically scanned sonar driver
//!
//! The head is a pure slave: every exchange is one 27-byte switch command
//! from the host followed by one response frame. The driver owns the
//! transport exclusively and walks the state machine
//!
//! ```text
//! Disconnected -> Connecting -> Configured -> Stepping
//! ```
//!
//! `Connecting` is entered on open and left once the head answers a hold
//! command (the 881A has no separate identification request). `configure()`
//! sends the full switch block and checks the serial status bits.
//! Each `request_ping()` steps the head once and returns the decoded echo.
//! Request failures never change state and are never retried here; retry
//! policy belongs to the session.

pub mod constants;
pub mod packet;
pub mod protocol;
pub mod sim;

use crate::config::SonarConfig;
use crate::error::{Error, Result};
use crate::transport::{SerialTransport, Transport};
use crate::types::{PingRecord, StepDirection};
use chrono::Utc;
use constants::READ_POLL_INTERVAL_MS;
use packet::SwitchCommand;
use protocol::{expected_frame_len, parse_header, ResponseHeader};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

pub use protocol::{decode, decode_orientation, encode_ping, FrameIter, OrientationRecord};
pub use sim::SimulatedSonar;

/// Connection lifecycle of the head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Disconnected,
    Connecting,
    Configured,
    Stepping,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Disconnected => "disconnected",
            DriverState::Connecting => "connecting",
            DriverState::Configured => "configured",
            DriverState::Stepping => "stepping",
        };
        f.write_str(name)
    }
}

/// Driver for one 881A head on one transport
pub struct Imagenex881Driver<T: Transport> {
    /// `None` once closed
    transport: Option<T>,
    config: SonarConfig,
    timeout: Duration,
    state: DriverState,
    /// Direction of a step command written but not yet answered
    pending: Option<StepDirection>,
    /// Last head angle reported
    head_angle: Option<f32>,
}

impl Imagenex881Driver<SerialTransport> {
    /// Open a serial port and wait for the head to answer
    pub fn open(path: &str, baud: u32, timeout: Duration, config: SonarConfig) -> Result<Self> {
        let transport = SerialTransport::open(path, baud)
            .map_err(|e| Error::DeviceUnavailable(format!("{}: {}", path, e)))?;
        Self::with_transport(transport, config, timeout)
    }
}

impl<T: Transport> Imagenex881Driver<T> {
    /// Take ownership of an open transport and perform the handshake
    ///
    /// `config` is normalized first; a config the head cannot be sent fails
    /// with `Error::Config` before anything is written. On failure the
    /// transport is closed before returning.
    pub fn with_transport(
        mut transport: T,
        mut config: SonarConfig,
        timeout: Duration,
    ) -> Result<Self> {
        if let Err(e) = config.normalize() {
            let _ = transport.close();
            return Err(e);
        }

        let mut driver = Self {
            transport: Some(transport),
            config,
            timeout,
            state: DriverState::Connecting,
            pending: None,
            head_angle: None,
        };

        match driver.request_head_position() {
            Ok(angle) => {
                log::info!("Imagenex881A: head answered at {:.1}°", angle);
                Ok(driver)
            }
            Err(e) => {
                let _ = driver.close();
                Err(Error::DeviceUnavailable(format!("no response to handshake: {}", e)))
            }
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Last head angle reported, in degrees
    pub fn head_angle(&self) -> Option<f32> {
        self.head_angle
    }

    /// Step direction of an unanswered request, if any
    pub fn pending_request(&self) -> Option<StepDirection> {
        self.pending
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Send the switch configuration and confirm the head accepted it
    pub fn configure(&mut self) -> Result<()> {
        if self.state == DriverState::Disconnected {
            return Err(Error::DeviceUnavailable("connection closed".to_string()));
        }

        let mut command = SwitchCommand::hold(&self.config);
        if self.config.calibrate {
            command = command.with_calibration();
        }
        let frame = self
            .transact(&command)
            .map_err(|e| Error::DeviceRejectedConfig(e.to_string()))?;
        let header = parse_header(&frame).map_err(|e| Error::DeviceRejectedConfig(e.to_string()))?;

        if header.character_overrun() {
            return Err(Error::DeviceRejectedConfig(
                "head reported character overrun".to_string(),
            ));
        }
        if !header.switches_accepted() {
            return Err(Error::DeviceRejectedConfig(format!(
                "switches not accepted (status {:#04x})",
                header.serial_status
            )));
        }
        if header.data_len != self.config.num_bins as usize {
            return Err(Error::DeviceRejectedConfig(format!(
                "head answered with {} bins, configured {}",
                header.data_len, self.config.num_bins
            )));
        }

        self.head_angle = Some(header.angle());
        self.state = DriverState::Configured;
        log::info!(
            "Imagenex881A: configured range={}m bins={} sector={}..{}° step={}",
            self.config.range,
            self.config.num_bins,
            self.config.start_angle,
            self.config.stop_angle,
            self.config.step_size
        );
        Ok(())
    }

    /// Step the head once in `direction` and return the echo at the new position
    pub fn request_ping(&mut self, direction: StepDirection) -> Result<PingRecord> {
        if !matches!(self.state, DriverState::Configured | DriverState::Stepping) {
            return Err(Error::NotConfigured);
        }

        let command = SwitchCommand::step(&self.config, direction);
        self.pending = Some(direction);
        let frame = self.transact(&command)?;
        let ping = protocol::decode(&frame, &self.config)?.stamped(Utc::now());

        self.pending = None;
        self.head_angle = Some(ping.angle());
        self.state = DriverState::Stepping;
        log::trace!(
            "Imagenex881A: ping at {:.1}° ({})",
            ping.angle(),
            ping.direction()
        );
        Ok(ping)
    }

    /// Ask for the current head position without moving it
    pub fn request_head_position(&mut self) -> Result<f32> {
        let command = SwitchCommand::hold(&self.config);
        let frame = self.transact(&command)?;
        let header: ResponseHeader = parse_header(&frame)?;
        let angle = header.angle();
        self.head_angle = Some(angle);
        Ok(angle)
    }

    /// Release the transport. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        self.state = DriverState::Disconnected;
        self.pending = None;
        match self.transport.take() {
            Some(mut transport) => {
                log::info!("Imagenex881A: closing connection");
                transport.close()
            }
            None => Ok(()),
        }
    }

    /// Write one command and read the single response frame
    fn transact(&mut self, command: &SwitchCommand) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::DeviceUnavailable("connection closed".to_string()))?;

        // Stale bytes from an earlier timed-out request would misalign framing
        let stale = transport.available()?;
        if stale > 0 {
            log::debug!("Imagenex881A: discarding {} stale bytes", stale);
        }
        transport.clear_input()?;
        transport.write_all(command.as_bytes())?;
        transport.flush()?;

        read_frame(transport, timeout)
    }
}

impl<T: Transport> Drop for Imagenex881Driver<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Imagenex881A: error closing transport: {}", e);
        }
    }
}

/// Read bytes until the declared frame length arrives or `timeout` expires
fn read_frame<T: Transport>(transport: &mut T, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut frame: Vec<u8> = Vec::with_capacity(600);
    let mut chunk = [0u8; 256];

    loop {
        match expected_frame_len(&frame) {
            Some(len) if frame.len() >= len => {
                frame.truncate(len);
                return Ok(frame);
            }
            Some(_) => {}
            // Header arrived but the start marker is wrong: take up to the
            // first terminator and let the decoder report it
            None if frame.len() >= constants::RESPONSE_HEADER_LEN => {
                if let Some(end) = frame
                    .iter()
                    .position(|&b| b == constants::RESPONSE_TERMINATOR)
                {
                    frame.truncate(end + 1);
                    return Ok(frame);
                }
            }
            None => {}
        }

        if Instant::now() >= deadline {
            break;
        }

        let n = transport.read(&mut chunk)?;
        if n == 0 {
            thread::sleep(Duration::from_millis(READ_POLL_INTERVAL_MS));
            continue;
        }
        frame.extend_from_slice(&chunk[..n]);
    }

    if frame.is_empty() {
        Err(Error::DeviceTimeout {
            waited_ms: timeout.as_millis() as u64,
        })
    } else {
        Err(Error::MalformedFrame(format!(
            "incomplete frame: {} bytes before timeout",
            frame.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::transport::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn quiet_sim() -> SimulationConfig {
        SimulationConfig {
            seed: 11,
            noise_stddev: 0.0,
            ..SimulationConfig::default()
        }
    }

    fn sim_driver(config: SonarConfig) -> (Imagenex881Driver<MockTransport>, MockTransport) {
        let transport = SimulatedSonar::new(quiet_sim()).into_transport();
        let handle = transport.clone();
        let driver = Imagenex881Driver::with_transport(transport, config, TIMEOUT).unwrap();
        (driver, handle)
    }

    #[test]
    fn test_handshake_and_configure() {
        let (mut driver, handle) = sim_driver(SonarConfig::default());
        assert_eq!(driver.state(), DriverState::Connecting);
        assert_eq!(driver.head_angle(), Some(-30.0));

        driver.configure().unwrap();
        assert_eq!(driver.state(), DriverState::Configured);

        // Handshake and configure are both 27-byte hold commands
        let written = handle.get_written();
        assert_eq!(written.len(), 54);
        assert_eq!(written[27], 0xFE);
        assert_eq!(written[27 + 13], 0);
    }

    #[test]
    fn test_configure_requests_calibration() {
        let config = SonarConfig {
            calibrate: true,
            ..SonarConfig::default()
        };
        let (mut driver, handle) = sim_driver(config);
        driver.configure().unwrap();

        // Only the configure command carries the flag
        let written = handle.get_written();
        assert_eq!(written[constants::SW_CALIBRATE], 0);
        assert_eq!(written[27 + constants::SW_CALIBRATE], 1);

        driver.request_ping(StepDirection::Clockwise).unwrap();
        assert_eq!(handle.get_written()[54 + constants::SW_CALIBRATE], 0);
    }

    #[test]
    fn test_stale_bytes_discarded_before_request() {
        let (mut driver, handle) = sim_driver(SonarConfig::default());
        driver.configure().unwrap();

        // Leftovers of an answer that arrived after its request timed out
        handle.inject_read(&[b'I', b'M', b'X', 0x10, 0x40, 0xFC]);
        let ping = driver.request_ping(StepDirection::Clockwise).unwrap();
        assert_eq!(ping.angle(), -29.7);
    }

    #[test]
    fn test_invalid_config_fails_before_handshake() {
        let transport = SimulatedSonar::new(quiet_sim()).into_transport();
        let handle = transport.clone();
        let config = SonarConfig {
            num_bins: 0,
            ..SonarConfig::default()
        };
        let result = Imagenex881Driver::with_transport(transport, config, TIMEOUT);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(handle.is_closed());
        assert_eq!(handle.write_count(), 0);
    }

    #[test]
    fn test_config_normalized_on_connect() {
        let config = SonarConfig {
            step_size: 0,
            start_angle: -30.0,
            stop_angle: -27.0,
            ..SonarConfig::default()
        };
        let (mut driver, _) = sim_driver(config);
        assert_eq!(driver.config().step_size, 1);
        assert_eq!(driver.config().start_angle, -28.5);
        assert_eq!(driver.config().pings_per_sweep(), 10);

        // The head homes to the same sector edge the config now names
        assert_eq!(driver.head_angle(), Some(-28.5));
        driver.configure().unwrap();
        let ping = driver.request_ping(StepDirection::Clockwise).unwrap();
        assert_eq!(ping.angle(), -28.2);
    }

    #[test]
    fn test_silent_head_is_unavailable() {
        let transport = MockTransport::new();
        let handle = transport.clone();
        let result = Imagenex881Driver::with_transport(transport, SonarConfig::default(), TIMEOUT);
        assert!(matches!(result, Err(Error::DeviceUnavailable(_))));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_ping_before_configure() {
        let (mut driver, _) = sim_driver(SonarConfig::default());
        assert!(matches!(
            driver.request_ping(StepDirection::Clockwise),
            Err(Error::NotConfigured)
        ));
    }

    #[test]
    fn test_request_ping_steps_head() {
        let (mut driver, _) = sim_driver(SonarConfig::default());
        driver.configure().unwrap();

        let first = driver.request_ping(StepDirection::Clockwise).unwrap();
        let second = driver.request_ping(StepDirection::Clockwise).unwrap();
        assert_eq!(driver.state(), DriverState::Stepping);
        assert_eq!(first.angle(), -29.7);
        assert_eq!(second.angle(), -29.4);
        assert_eq!(second.direction(), StepDirection::Clockwise);
        assert_eq!(second.num_bins(), 250);
        assert!(second.acquired_at().is_some());
        assert!(driver.pending_request().is_none());
    }

    #[test]
    fn test_timeout_keeps_state() {
        let answered = Arc::new(AtomicUsize::new(0));
        let counter = answered.clone();
        let mut sim = SimulatedSonar::new(quiet_sim());
        // Answer handshake and configure, then go silent
        let transport = MockTransport::with_responder(move |bytes| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                sim.respond(bytes)
            } else {
                None
            }
        });
        let mut driver =
            Imagenex881Driver::with_transport(transport, SonarConfig::default(), TIMEOUT).unwrap();
        driver.configure().unwrap();

        let err = driver.request_ping(StepDirection::Clockwise).unwrap_err();
        assert!(matches!(err, Error::DeviceTimeout { waited_ms: 50 }));
        assert_eq!(driver.state(), DriverState::Configured);
        assert_eq!(driver.pending_request(), Some(StepDirection::Clockwise));
        assert_eq!(answered.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_late_response_is_timeout() {
        let (mut driver, handle) = sim_driver(SonarConfig::default());
        driver.configure().unwrap();
        handle.set_response_delay(Duration::from_millis(200));

        assert!(matches!(
            driver.request_ping(StepDirection::Clockwise),
            Err(Error::DeviceTimeout { .. })
        ));
    }

    #[test]
    fn test_partial_frame_is_malformed() {
        let mut sim = SimulatedSonar::new(quiet_sim());
        let mut calls = 0;
        let transport = MockTransport::with_responder(move |bytes| {
            calls += 1;
            let frame = sim.respond(bytes)?;
            if calls > 2 {
                Some(frame[..40].to_vec())
            } else {
                Some(frame)
            }
        });
        let mut driver =
            Imagenex881Driver::with_transport(transport, SonarConfig::default(), TIMEOUT).unwrap();
        driver.configure().unwrap();

        assert!(matches!(
            driver.request_ping(StepDirection::Clockwise),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_configure_rejected_status() {
        let mut sim = SimulatedSonar::new(quiet_sim());
        let mut calls = 0;
        let transport = MockTransport::with_responder(move |bytes| {
            calls += 1;
            let mut frame = sim.respond(bytes)?;
            if calls == 2 {
                frame[constants::OFFSET_STATUS] = 0x80;
            }
            Some(frame)
        });
        let mut driver =
            Imagenex881Driver::with_transport(transport, SonarConfig::default(), TIMEOUT).unwrap();

        assert!(matches!(
            driver.configure(),
            Err(Error::DeviceRejectedConfig(_))
        ));
        assert_eq!(driver.state(), DriverState::Connecting);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut driver, handle) = sim_driver(SonarConfig::default());
        driver.close().unwrap();
        driver.close().unwrap();
        assert!(handle.is_closed());
        assert_eq!(driver.state(), DriverState::Disconnected);
        assert!(matches!(
            driver.request_ping(StepDirection::Clockwise),
            Err(Error::NotConfigured)
        ));
    }

    #[test]
    fn test_drop_closes_transport() {
        let (driver, handle) = sim_driver(SonarConfig::default());
        drop(driver);
        assert!(handle.is_closed());
    }
}
