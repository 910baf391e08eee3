//! Configuration module
//!
//! Loads server and logging settings from a TOML file.

mod settings;

pub use settings::*;
