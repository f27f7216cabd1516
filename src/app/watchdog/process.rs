use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::Watchdog;
use crate::command::{ChildProcess, Executable, Started};

/// Watchdog running a companion command next to the app, for example a relay the app
/// streams to. Healthy while the companion process is alive.
#[derive(Debug)]
pub struct ProcessWatchdog {
    executable: Executable,
    process: Mutex<Option<ChildProcess<Started>>>,
}

impl ProcessWatchdog {
    pub fn new(executable: Executable) -> Self {
        Self {
            executable,
            process: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ChildProcess<Started>>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logs the pending stderr lines so the channel does not grow while nobody parses them.
fn drain_output(process: &ChildProcess<Started>) {
    for line in process.read_lines() {
        debug!(pid = process.pid(), "watchdog stderr: {}", line);
    }
}

impl Watchdog for ProcessWatchdog {
    fn start_watchdog(&self) {
        let mut current = self.lock();
        if current.as_mut().is_some_and(|p| p.is_running()) {
            debug!(bin = %self.executable.bin, "watchdog process already running");
            return;
        }

        match ChildProcess::new(&self.executable).start() {
            Ok(process) => {
                info!(pid = process.pid(), bin = process.bin(), "Watchdog process started");
                *current = Some(process);
            }
            Err(err) => {
                error!(bin = %self.executable.bin, "Failed to start watchdog process: {}", err);
                *current = None;
            }
        }
    }

    fn stop_watchdog(&self) {
        let Some(mut process) = self.lock().take() else {
            return;
        };
        drain_output(&process);
        if !process.is_running() {
            return;
        }

        if let Err(err) = process.terminate() {
            warn!(pid = process.pid(), "Graceful shutdown of watchdog process failed: {}", err);
        }
        if !process.wait_exit(self.executable.shutdown_timeout) {
            warn!(pid = process.pid(), "Watchdog process did not exit on time, killing it");
            if let Err(err) = process.kill() {
                error!(pid = process.pid(), "Failed to kill watchdog process: {}", err);
            }
            process.wait_exit(self.executable.shutdown_timeout);
        }
        info!(pid = process.pid(), "Watchdog process stopped");
    }

    fn is_running(&self) -> bool {
        let mut current = self.lock();
        let Some(process) = current.as_mut() else {
            return false;
        };
        drain_output(process);
        process.is_running()
    }
}
