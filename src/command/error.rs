use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("`{0}` not piped")]
    StreamPipeError(String),

    #[error("no value set for argument placeholder `{0}`")]
    MissingValue(String),

    #[error("io error: `{0}`")]
    IOError(#[from] std::io::Error),

    #[cfg(target_family = "unix")]
    #[error("system error: `{0}`")]
    NixError(#[from] nix::Error),
}
