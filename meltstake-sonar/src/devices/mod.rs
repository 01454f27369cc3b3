//! Device implementations

pub mod imagenex881a;

pub use imagenex881a::{DriverState, Imagenex881Driver};
