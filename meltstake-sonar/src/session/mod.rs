//! Scan session control
//!
//! A [`ScanSession`] owns one configured driver and one deployment directory.
//! `run_scan` first returns the head to the sector start, then drives it
//! through `num_sweeps` sweeps, alternating direction each sweep, and hands
//! the result to the [`ScanStore`]. Methods
//! take `&self` so an operator thread can call `stop_session` while the
//! acquisition thread is inside `run_scan`.

pub mod store;

pub use store::{
    read_index, write_config_snapshot, IndexEntry, ScanStore, CONFIG_SNAPSHOT, RUN_INDEX_HEADER,
};

use crate::config::{AppConfig, SessionConfig, SonarConfig, HEAD_STEP_DEGREES};
use crate::devices::Imagenex881Driver;
use crate::error::{Error, Result};
use crate::transport::{find_port, SerialTransport, Transport};
use crate::types::{Scan, StepDirection};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WRITE_PROBE: &str = ".write_probe";

/// The head counts as at the sector start within half a raw position
const START_TOLERANCE_DEGREES: f32 = HEAD_STEP_DEGREES / 2.0;

// ============================================================================
// Stop signal
// ============================================================================

/// Cooperative cancellation shared by the acquisition loop, Ctrl-C handler
/// and console watcher
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Scan result
// ============================================================================

/// Outcome of one `run_scan` call
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub scan_index: u32,
    pub started_at: DateTime<Utc>,
    /// Pings collected
    pub pings: usize,
    /// Pings a complete scan holds
    pub expected: usize,
    pub complete: bool,
    /// Whether the stop signal cut the scan short
    pub stopped: bool,
    /// Persisted data file, `None` when nothing was collected
    pub file: Option<PathBuf>,
}

// ============================================================================
// Session
// ============================================================================

struct SessionState {
    scanning: bool,
    scans_run: u32,
}

/// One acquisition session on one sonar head
pub struct ScanSession<T: Transport> {
    driver: Mutex<Option<Imagenex881Driver<T>>>,
    store: Mutex<ScanStore>,
    config: SonarConfig,
    settings: SessionConfig,
    state: Mutex<SessionState>,
    idle: Condvar,
    stop: StopSignal,
}

impl ScanSession<SerialTransport> {
    /// Open the head on the configured (or auto-detected) serial port
    pub fn start_serial(
        app: &AppConfig,
        output_dir: impl AsRef<Path>,
        stop: StopSignal,
    ) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        validate_output_dir(output_dir)?;

        let connection = &app.connection;
        let port = match &connection.port {
            Some(port) => port.clone(),
            None => find_port(&connection.device_name)?,
        };
        let driver = Imagenex881Driver::open(
            &port,
            connection.baud,
            Duration::from_millis(connection.timeout_ms),
            app.scan.clone(),
        )?;
        Self::from_driver(driver, app.session.clone(), output_dir, stop)
    }
}

impl<T: Transport> ScanSession<T> {
    /// Validate `output_dir`, connect and configure the head, write the
    /// configuration snapshot and open the run index
    ///
    /// On failure the transport is closed and no files are left behind.
    pub fn start(
        transport: T,
        config: SonarConfig,
        settings: SessionConfig,
        timeout: Duration,
        output_dir: impl AsRef<Path>,
        stop: StopSignal,
    ) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        if let Err(e) = validate_output_dir(output_dir) {
            let mut transport = transport;
            let _ = transport.close();
            return Err(e);
        }

        let driver = Imagenex881Driver::with_transport(transport, config, timeout)?;
        Self::from_driver(driver, settings, output_dir, stop)
    }

    fn from_driver(
        mut driver: Imagenex881Driver<T>,
        settings: SessionConfig,
        output_dir: &Path,
        stop: StopSignal,
    ) -> Result<Self> {
        if let Err(e) = driver.configure() {
            log::error!("Session: configuration failed: {}", e);
            let _ = driver.close();
            return Err(e);
        }

        let config = driver.config().clone();
        let snapshot = match write_config_snapshot(output_dir, &config) {
            Ok(path) => path,
            Err(e) => {
                log::error!("Session: cannot write {}: {}", CONFIG_SNAPSHOT, e);
                let _ = driver.close();
                return Err(e);
            }
        };
        let store = match ScanStore::open(output_dir, &settings.run_index) {
            Ok(store) => store,
            Err(e) => {
                log::error!("Session: cannot open {}: {}", settings.run_index, e);
                let _ = fs::remove_file(&snapshot);
                let _ = driver.close();
                return Err(e);
            }
        };

        log::info!(
            "Session: ready in {} ({} pings per scan)",
            output_dir.display(),
            config.expected_pings()
        );

        Ok(Self {
            driver: Mutex::new(Some(driver)),
            store: Mutex::new(store),
            config,
            settings,
            state: Mutex::new(SessionState {
                scanning: false,
                scans_run: 0,
            }),
            idle: Condvar::new(),
            stop,
        })
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    /// Stop signal observed by this session
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// Scans attempted so far
    pub fn scans_run(&self) -> u32 {
        self.state.lock().scans_run
    }

    /// Whether the driver is still held (false after `stop_session`)
    pub fn is_connected(&self) -> bool {
        self.driver.lock().is_some()
    }

    /// Acquire and persist one scan
    ///
    /// The head is first stepped back to `start_angle`; those steps are not
    /// recorded. Stops early, keeping what was collected, when the stop
    /// signal is set. After `max_consecutive_failures` failed requests in a
    /// row, or any non-retryable error, the collected pings are persisted as
    /// a partial scan and `Error::ScanAborted` is returned. The driver stays
    /// open.
    pub fn run_scan(&self) -> Result<ScanResult> {
        {
            let mut state = self.state.lock();
            if state.scanning {
                return Err(Error::ScanInProgress);
            }
            state.scanning = true;
        }

        let result = self.acquire();

        {
            let mut state = self.state.lock();
            state.scanning = false;
            state.scans_run += 1;
        }
        self.idle.notify_all();
        result
    }

    fn acquire(&self) -> Result<ScanResult> {
        let mut driver_guard = self.driver.lock();
        let driver = driver_guard
            .as_mut()
            .ok_or_else(|| Error::DeviceUnavailable("session stopped".to_string()))?;

        let plan = self.config.sweep_plan();
        let scan_index = self.store.lock().next_scan_index();
        let mut scan = Scan::new(scan_index, Utc::now(), plan.total());

        log::info!(
            "Scan {}: {} sweeps of {} pings",
            scan_index,
            plan.num_sweeps,
            plan.pings_per_sweep
        );

        let mut failures = 0u32;
        let mut stopped = false;
        let mut abort: Option<Error> = None;

        match self.return_to_start(driver, scan_index, &mut failures) {
            Ok(true) => {}
            Ok(false) => stopped = true,
            Err(e) => abort = Some(e),
        }

        while !stopped && abort.is_none() && scan.len() < plan.total() {
            let direction = plan.direction_for(scan.len());
            match self.with_retry(scan_index, &mut failures, || driver.request_ping(direction)) {
                Ok(Some(ping)) => {
                    log::debug!(
                        "Scan {}: ping {} at {:.1}° {}",
                        scan_index,
                        scan.len(),
                        ping.angle(),
                        ping.direction()
                    );
                    scan.push(ping);
                }
                Ok(None) => stopped = true,
                Err(e) => abort = Some(e),
            }
        }
        drop(driver_guard);

        if stopped {
            log::info!("Scan {}: stop requested after {} pings", scan_index, scan.len());
        }

        let file = self.store.lock().persist(&scan)?;

        if let Some(err) = abort {
            log::error!("{} ({} pings kept)", err, scan.len());
            return Err(err);
        }

        Ok(ScanResult {
            scan_index,
            started_at: scan.started_at(),
            pings: scan.len(),
            expected: scan.expected(),
            complete: scan.is_complete(),
            stopped,
            file,
        })
    }

    /// Step the head back to `start_angle` so the first sweep covers the
    /// whole sector
    ///
    /// Returns `Ok(false)` when the stop signal interrupts the move.
    fn return_to_start(
        &self,
        driver: &mut Imagenex881Driver<T>,
        scan_index: u32,
        failures: &mut u32,
    ) -> Result<bool> {
        let start = self.config.start_angle;
        let mut angle =
            match self.with_retry(scan_index, failures, || driver.request_head_position())? {
                Some(angle) => angle,
                None => return Ok(false),
            };

        // A full turn in the smallest step bounds any legitimate move
        let limit = (360.0 / self.config.step_degrees().max(HEAD_STEP_DEGREES)).ceil() as usize;
        let mut steps = 0usize;
        while (angle - start).abs() > START_TOLERANCE_DEGREES {
            if steps >= limit {
                return Err(Error::ScanAborted {
                    scan_index,
                    failures: *failures,
                    reason: format!(
                        "head stuck at {:.1}° after {} steps toward sector start {:.1}°",
                        angle, steps, start
                    ),
                });
            }
            let direction = if angle > start {
                StepDirection::CounterClockwise
            } else {
                StepDirection::Clockwise
            };
            angle = match self.with_retry(scan_index, failures, || driver.request_ping(direction))? {
                Some(ping) => ping.angle(),
                None => return Ok(false),
            };
            steps += 1;
        }

        if steps > 0 {
            log::info!(
                "Scan {}: head returned to {:.1}° in {} steps",
                scan_index,
                angle,
                steps
            );
        }
        Ok(true)
    }

    /// Issue `request` until it succeeds
    ///
    /// Retryable failures count toward `max_consecutive_failures`; reaching
    /// it, or any other error, yields `Error::ScanAborted`. A success resets
    /// the count. `Ok(None)` means the stop signal was seen first.
    fn with_retry<R>(
        &self,
        scan_index: u32,
        failures: &mut u32,
        mut request: impl FnMut() -> Result<R>,
    ) -> Result<Option<R>> {
        let max_failures = self.settings.max_consecutive_failures;
        loop {
            if self.stop.is_requested() {
                return Ok(None);
            }
            match request() {
                Ok(value) => {
                    *failures = 0;
                    return Ok(Some(value));
                }
                Err(e) if e.is_retryable() => {
                    *failures += 1;
                    log::warn!(
                        "Scan {}: request failed ({}/{}): {}",
                        scan_index,
                        failures,
                        max_failures,
                        e
                    );
                    if *failures >= max_failures {
                        return Err(Error::ScanAborted {
                            scan_index,
                            failures: *failures,
                            reason: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    return Err(Error::ScanAborted {
                        scan_index,
                        failures: *failures + 1,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Request stop, wait for any running scan to finish, close the driver
    ///
    /// Safe to call more than once and from any thread.
    pub fn stop_session(&self) -> Result<()> {
        self.stop.request();
        {
            let mut state = self.state.lock();
            while state.scanning {
                self.idle.wait(&mut state);
            }
        }

        let driver = self.driver.lock().take();
        if let Some(mut driver) = driver {
            driver.close()?;
            log::info!("Session: stopped after {} scans", self.scans_run());
        }
        Ok(())
    }
}

/// Create `dir` if needed and check a file can be written in it
fn validate_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Config(format!("cannot create {}: {}", dir.display(), e))
    })?;
    let probe = dir.join(WRITE_PROBE);
    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|e| Error::Config(format!("{} is not writable: {}", dir.display(), e)))
}
