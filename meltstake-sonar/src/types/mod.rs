//! Common data types

pub mod ping;
pub mod scan;

pub use ping::*;
pub use scan::*;
