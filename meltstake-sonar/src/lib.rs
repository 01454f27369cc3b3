//! Melt Stake sonar - acquisition library for the Imagenex 881A imaging sonar
//!
//! - [`devices::imagenex881a`]: switch commands, response decoding, the
//!   serial driver and a simulated head
//! - [`session`]: scan sequencing and crash-safe persistence
//! - [`export`]: deployment directory to CSV conversion

pub mod config;
pub mod devices;
pub mod error;
pub mod export;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, SonarConfig};
pub use error::{Error, Result};
pub use session::{ScanResult, ScanSession, StopSignal};
