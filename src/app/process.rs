use tracing::{debug, info, warn};

use super::{
    error::SupervisorError,
    run_status::RunStatus,
    state::StateStore,
    status::{KeyValueParser, StaleTimeout, StatusParser, StatusPayload, StatusPoller},
    supervisor::{Activator, Supervisor},
};
use crate::{
    command::{ChildProcess, Executable, Started},
    utils::time::{Clock, SystemClock},
};

/// Supervisor of an OS process whose status is parsed from its stderr.
pub type ProcessSupervisor<P, C = SystemClock> = Supervisor<ProcessActivator<P, C>>;

/// Supervisor of an ffmpeg-like encoder reporting `key=value` progress lines.
pub type StreamerSupervisor = ProcessSupervisor<KeyValueParser>;

/// Runs an [`Executable`] as a child process. Every refresh drains the lines the process
/// wrote to stderr into a [`StatusPoller`].
pub struct ProcessActivator<P, C = SystemClock> {
    executable: Executable,
    poller: StatusPoller<P, C>,
    process: Option<ChildProcess<Started>>,
}

impl<P> ProcessActivator<P, SystemClock>
where
    P: StatusParser,
{
    pub fn new(executable: Executable, parser: P, stale_timeout: StaleTimeout) -> Self {
        Self::with_poller(executable, StatusPoller::new(parser, stale_timeout))
    }
}

impl<P, C> ProcessActivator<P, C>
where
    P: StatusParser,
    C: Clock,
{
    pub fn with_poller(executable: Executable, poller: StatusPoller<P, C>) -> Self {
        Self {
            executable,
            poller,
            process: None,
        }
    }

    pub fn executable(&self) -> &Executable {
        &self.executable
    }

    /// Process id of the current run, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|process| process.pid())
    }

    /// Forces the current process down and reaps it.
    pub fn kill(&mut self) -> Result<(), SupervisorError> {
        let Some(process) = self.process.as_mut() else {
            return Ok(());
        };
        if process.is_running() {
            warn!(pid = process.pid(), "Killing app process");
            process.kill()?;
            process.wait_exit(self.executable.shutdown_timeout);
        }
        Ok(())
    }
}

impl<P, C> Activator for ProcessActivator<P, C>
where
    P: StatusParser,
    C: Clock,
{
    fn is_active(&mut self) -> bool {
        self.process
            .as_mut()
            .is_some_and(|process| process.is_running())
    }

    fn activate(&mut self, state: &StateStore) -> Result<(), SupervisorError> {
        let executable = self.executable.with_values(&state.get_values())?;
        let process = ChildProcess::new(&executable).start()?;
        info!(pid = process.pid(), bin = process.bin(), "App process started");

        self.poller.reset();
        self.process = Some(process);
        Ok(())
    }

    fn deactivate(&mut self) -> bool {
        let Some(mut process) = self.process.take() else {
            return false;
        };
        let pid = process.pid();
        if !process.is_running() {
            debug!(pid, "app process already exited, nothing to terminate");
            return false;
        }

        if let Err(err) = process.terminate() {
            warn!(pid, "Failed to terminate app process: {}", err);
        }
        if !process.wait_exit(self.executable.shutdown_timeout) {
            warn!(pid, "App process still running after the shutdown timeout");
            // kept so it can still be killed or reported as active
            self.process = Some(process);
            return false;
        }

        let clean = process.exited_cleanly();
        info!(pid, clean, "App process stopped");
        clean
    }

    fn refresh(&mut self, state: &StateStore) -> Option<StatusPayload> {
        let process = self.process.as_mut()?;

        let mut lines = process.read_lines();
        let exited = !process.is_running();
        if exited {
            // the reader may still hold lines written right before the exit
            lines.extend(process.read_lines());
        }

        let payload = self.poller.poll(&lines, state);

        if exited {
            let (run_status, clean) = if process.exit_status().is_some_and(|s| s.success()) {
                (RunStatus::Ended, true)
            } else {
                (RunStatus::Error, false)
            };
            if state.transition_unless_terminal(run_status) {
                if clean {
                    info!(pid = process.pid(), "App process ended");
                } else {
                    warn!(pid = process.pid(), exit_status = ?process.exit_status(), "App process exited with an error");
                }
            }
        }

        payload
    }
}

impl<P, C> Supervisor<ProcessActivator<P, C>>
where
    P: StatusParser,
    C: Clock,
{
    /// Kills the app process. The run status is left untouched.
    pub fn kill(&self) -> Result<(), SupervisorError> {
        self.with_activator(|activator| activator.kill())
    }

    pub fn pid(&self) -> Option<u32> {
        self.with_activator(|activator| activator.pid())
    }
}
