use std::fmt::Debug;
use thiserror::Error;

use crate::command::CommandError;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("app status requested before the app was ever started")]
    NotStarted,

    #[error("app is already running")]
    AlreadyRunning,

    #[error("command error: `{0}`")]
    Command(#[from] CommandError),

    #[error("could not spawn thread: `{0}`")]
    ThreadSpawn(#[source] std::io::Error),
}
