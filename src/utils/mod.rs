// Utilities
pub mod config;
pub mod error;
pub mod formatter;
pub mod path_display;

pub use config::Settings;
pub use error::{BokslArcError, Result};
