pub mod error;
pub mod supervisor_config;

pub use error::ConfigError;
pub use supervisor_config::{SupervisorConfig, WatchdogConfig};
