//! Process-wide `tracing` setup shared by the scanner binaries.

pub mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};
