use std::{
    sync::Arc,
    thread::{sleep, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use super::{
    error::SupervisorError,
    run_status::RunStatus,
    state::StateStore,
    status::StatusPayload,
    supervisor::{Activator, Supervisor},
};
use crate::{context::Context, utils::threads::spawn_named_thread};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const GRACEFUL_STOP_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Body of a thread app. It receives a handle on the app state, where it reports its
/// progress with [`StateStore::record_status`], and a context that is cancelled when the app
/// is stopped.
pub type Job = Arc<dyn Fn(StateStore, Context) + Send + Sync>;

pub type ThreadSupervisor = Supervisor<ThreadActivator>;

struct RunningJob {
    handle: JoinHandle<()>,
    ctx: Context,
}

/// Runs a [`Job`] on a named thread, one run per activation.
pub struct ThreadActivator {
    thread_name: String,
    job: Job,
    shutdown_timeout: Duration,
    running: Option<RunningJob>,
}

impl ThreadActivator {
    pub fn new<S, F>(thread_name: S, job: F) -> Self
    where
        S: Into<String>,
        F: Fn(StateStore, Context) + Send + Sync + 'static,
    {
        Self {
            thread_name: thread_name.into(),
            job: Arc::new(job),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            running: None,
        }
    }

    pub fn with_shutdown_timeout(self, shutdown_timeout: Duration) -> Self {
        Self {
            shutdown_timeout,
            ..self
        }
    }

    /// Joins a finished job. Returns whether it returned normally instead of panicking.
    fn join(&self, handle: JoinHandle<()>) -> bool {
        match handle.join() {
            Ok(()) => true,
            Err(err) => {
                let reason = err
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| err.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown error".to_string());
                error!(thread = %self.thread_name, "Thread app panicked: {}", reason);
                false
            }
        }
    }
}

impl Activator for ThreadActivator {
    fn is_active(&mut self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    fn activate(&mut self, state: &StateStore) -> Result<(), SupervisorError> {
        let ctx = Context::new();
        let job = self.job.clone();
        let (job_state, job_ctx) = (state.clone(), ctx.clone());

        let handle = spawn_named_thread(&self.thread_name, move || job(job_state, job_ctx))
            .map_err(SupervisorError::ThreadSpawn)?;
        info!(thread = %self.thread_name, "Thread app started");

        self.running = Some(RunningJob { handle, ctx });
        Ok(())
    }

    fn deactivate(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };
        if running.handle.is_finished() {
            debug!(thread = %self.thread_name, "thread app already finished, nothing to stop");
            self.join(running.handle);
            return false;
        }

        if let Err(err) = running.ctx.cancel_all() {
            error!(thread = %self.thread_name, "Could not cancel thread app: {}", err);
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while !running.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(thread = %self.thread_name, "Thread app did not finish within the shutdown timeout");
                self.running = Some(running);
                return false;
            }
            sleep(GRACEFUL_STOP_RETRY_INTERVAL);
        }

        let clean = self.join(running.handle);
        info!(thread = %self.thread_name, clean, "Thread app stopped");
        clean
    }

    fn refresh(&mut self, state: &StateStore) -> Option<StatusPayload> {
        let finished = self
            .running
            .as_ref()
            .is_some_and(|running| running.handle.is_finished());

        if finished {
            if let Some(running) = self.running.take() {
                let run_status = if self.join(running.handle) {
                    RunStatus::Ended
                } else {
                    RunStatus::Error
                };
                if state.transition_unless_terminal(run_status) {
                    info!(thread = %self.thread_name, status = %run_status, "Thread app finished");
                }
            }
            return None;
        }

        (state.run_status() == RunStatus::Running).then(|| state.status())
    }
}
