//! App supervision: the run status state machine, the shared app state, watchdogs and the
//! activators backing an app with an OS process or a thread.

pub mod driver;
pub mod error;
pub mod process;
pub mod run_status;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod thread;
pub mod watchdog;

pub use driver::StatusDriver;
pub use error::SupervisorError;
pub use process::{ProcessActivator, ProcessSupervisor, StreamerSupervisor};
pub use run_status::RunStatus;
pub use state::{StateSnapshot, StateStore};
pub use status::{KeyValueParser, StaleTimeout, StatusParser, StatusPayload, StatusPoller};
pub use supervisor::{Activator, RunningApp, Supervisor};
pub use thread::{ThreadActivator, ThreadSupervisor};
pub use watchdog::{process::ProcessWatchdog, Watchdog, WatchdogOptions, WatchdogRegistry};
