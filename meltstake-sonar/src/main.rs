//! Melt Stake sonar - deployment logger for the Imagenex 881A
//!
//! Connects to the head (or the simulated one), waits for the operator to
//! press Enter, then records scans into `<data_dir>/deployment_<N>/` until
//! `q`, `quit`, `stop` or `exit` is typed or Ctrl-C is pressed.

use clap::Parser;
use meltstake_sonar::config::LoggingConfig;
use meltstake_sonar::devices::imagenex881a::SimulatedSonar;
use meltstake_sonar::transport::Transport;
use meltstake_sonar::{AppConfig, Error, Result, ScanSession, StopSignal};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Console words that end a deployment
const STOP_KEYWORDS: [&str; 4] = ["q", "quit", "stop", "exit"];

#[derive(Parser)]
#[command(name = "meltstake-sonar")]
#[command(version, about = "Record Imagenex 881A sonar scans for a Melt Stake deployment")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "meltstake.toml")]
    config: PathBuf,

    /// Deployment number, used in the output directory name
    #[arg(short, long, default_value = "01")]
    deployment: String,

    /// Root directory for deployment output
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Use the simulated head regardless of the configuration
    #[arg(long)]
    simulate: bool,

    /// Start scanning immediately instead of waiting for Enter
    #[arg(long)]
    no_wait: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = AppConfig::load(&args.config)?;
    if args.simulate {
        config.connection.simulate = true;
    }

    let deployment_dir = args
        .data_dir
        .join(format!("deployment_{}", args.deployment));
    let log_file = init_logging(&config.logging, &deployment_dir, &args.deployment);

    log::info!("Melt Stake sonar v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", args.config.display());
    log::info!("Output: {}", deployment_dir.display());

    // Set up shutdown signal handler
    let stop = StopSignal::new();
    let signal = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        signal.request();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    if config.connection.simulate {
        log::info!("Using simulated 881A head");
        let transport = SimulatedSonar::new(config.simulation.clone()).into_transport();
        let session = ScanSession::start(
            transport,
            config.scan.clone(),
            config.session.clone(),
            Duration::from_millis(config.connection.timeout_ms),
            &deployment_dir,
            stop.clone(),
        )?;
        record(&session, &stop, !args.no_wait, log_file)
    } else {
        let session = ScanSession::start_serial(&config, &deployment_dir, stop.clone())?;
        record(&session, &stop, !args.no_wait, log_file)
    }
}

/// Scan until stopped, then close the session
fn record<T: Transport>(
    session: &ScanSession<T>,
    stop: &StopSignal,
    wait_for_enter: bool,
    log_file: Option<PendingLogFile>,
) -> Result<()> {
    if let Some(log_file) = log_file {
        if let Err(e) = log_file.attach() {
            let _ = session.stop_session();
            return Err(e);
        }
    }

    if wait_for_enter {
        println!("Sonar ready. Press Enter to start scanning.");
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
    }
    println!("Scanning. Type one of {:?} and press Enter to stop.", STOP_KEYWORDS);
    spawn_console_watcher(stop.clone())?;

    while !stop.is_requested() {
        match session.run_scan() {
            Ok(result) => log::info!(
                "Scan {} finished: {}/{} pings{}",
                result.scan_index,
                result.pings,
                result.expected,
                if result.complete { "" } else { " (partial)" }
            ),
            // Already logged by the session; the next scan starts fresh
            Err(Error::ScanAborted { .. }) => {}
            Err(e) => {
                let _ = session.stop_session();
                return Err(e);
            }
        }
    }

    session.stop_session()?;
    log::info!("Deployment finished after {} scans", session.scans_run());
    Ok(())
}

/// Watch stdin for a stop keyword
fn spawn_console_watcher(stop: StopSignal) -> Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let word = line.trim().to_lowercase();
                if STOP_KEYWORDS.contains(&word.as_str()) {
                    log::info!("Stop requested from console");
                    stop.request();
                    break;
                }
            }
        })?;
    Ok(())
}

// ============================================================================
// Logging
// ============================================================================

/// Log writer shared with env_logger; starts on stderr and can be moved
/// to a file later
#[derive(Clone)]
struct LogSink(Arc<Mutex<Box<dyn Write + Send>>>);

impl LogSink {
    fn stderr() -> Self {
        Self(Arc::new(Mutex::new(Box::new(io::stderr()))))
    }

    /// Send all further records to `path`, appending
    fn redirect(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = self.0.lock();
        writer.flush()?;
        *writer = Box::new(file);
        Ok(())
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// Log file opened only once the session has started
struct PendingLogFile {
    sink: LogSink,
    path: PathBuf,
}

impl PendingLogFile {
    fn attach(self) -> Result<()> {
        self.sink.redirect(&self.path)?;
        println!("Logging to {}", self.path.display());
        log::info!("Log file opened: {}", self.path.display());
        Ok(())
    }
}

/// File the configured output names, if any
fn log_file_path(logging: &LoggingConfig, deployment_dir: &Path, deployment: &str) -> Option<PathBuf> {
    match logging.output.as_str() {
        "stdout" | "stderr" => None,
        "deployment" => Some(deployment_dir.join(format!("deployment_{}.log", deployment))),
        path => Some(PathBuf::from(path)),
    }
}

/// Initialise env_logger with the configured level and target
///
/// `RUST_LOG` still overrides the level. A file target logs to stderr
/// until the returned [`PendingLogFile`] is attached, so a failed start
/// leaves nothing in the deployment directory.
fn init_logging(
    logging: &LoggingConfig,
    deployment_dir: &Path,
    deployment: &str,
) -> Option<PendingLogFile> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&logging.level));
    builder.format_timestamp_millis();

    let pending = match log_file_path(logging, deployment_dir, deployment) {
        Some(path) => {
            let sink = LogSink::stderr();
            builder.target(env_logger::Target::Pipe(Box::new(sink.clone())));
            Some(PendingLogFile { sink, path })
        }
        None if logging.output == "stdout" => {
            builder.target(env_logger::Target::Stdout);
            None
        }
        None => {
            builder.target(env_logger::Target::Stderr);
            None
        }
    };

    builder.init();
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_path_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("deployment_07");
        let logging = LoggingConfig::default();

        let path = log_file_path(&logging, &dir, "07").unwrap();
        assert_eq!(path, dir.join("deployment_07.log"));
        assert!(!dir.exists());

        let stderr = LoggingConfig {
            output: "stderr".to_string(),
            ..LoggingConfig::default()
        };
        assert!(log_file_path(&stderr, &dir, "07").is_none());
    }

    #[test]
    fn test_log_sink_redirects_to_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deployment_07").join("deployment_07.log");
        let mut sink = LogSink::stderr();
        writeln!(sink, "before start").unwrap();
        assert!(!path.exists());

        PendingLogFile {
            sink: sink.clone(),
            path: path.clone(),
        }
        .attach()
        .unwrap();
        writeln!(sink, "after start").unwrap();
        sink.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "after start\n");
    }
}
