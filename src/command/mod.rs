//! OS process handling: spawning supervised commands and reading their output without
//! blocking the caller.

pub mod child_process;
pub mod error;
pub mod executable;
mod stream;

pub use child_process::{ChildProcess, NotStarted, Started};
pub use error::CommandError;
pub use executable::Executable;
