use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error loading config: `{0}`")]
    IOError(#[from] std::io::Error),

    #[error("invalid config: `{0}`")]
    InvalidYamlConfiguration(#[from] serde_yaml::Error),

    #[error("status marker must not be empty")]
    EmptyStatusMarker,
}
