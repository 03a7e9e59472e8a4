pub mod config;
pub mod error;
pub mod model;

pub use config::{CollectorConfig, Config};
pub use error::ConfigError;
pub use model::*;
