use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, error, info, warn};

use super::{
    error::SupervisorError,
    run_status::RunStatus,
    state::{StateSnapshot, StateStore},
    status::StatusPayload,
    watchdog::{Watchdog, WatchdogOptions, WatchdogRegistry},
};

/// The mechanics of one kind of app: how it is started, stopped and how its status is
/// refreshed. [`Supervisor`] drives it.
pub trait Activator: Send {
    /// Whether the activity started by the last activation is still alive.
    fn is_active(&mut self) -> bool;

    /// Starts the underlying activity. Values stored in `state` are available as input.
    fn activate(&mut self, state: &StateStore) -> Result<(), SupervisorError>;

    /// Stops the underlying activity. Returns whether it confirmed a clean termination.
    fn deactivate(&mut self) -> bool;

    /// Collects new status from the activity and applies it to `state`.
    fn refresh(&mut self, state: &StateStore) -> Option<StatusPayload>;
}

struct Lifecycle<A> {
    activator: A,
    watchdogs: WatchdogRegistry,
    started: bool,
    active: bool,
}

/// Supervises one app: runs its lifecycle through an [`Activator`], keeps its
/// [`RunStatus`] and values in a [`StateStore`] and drives the attached watchdogs.
///
/// Lifecycle operations are serialized by an internal lock, taken before the state lock,
/// so the supervisor can be shared between a polling thread and its callers.
pub struct Supervisor<A> {
    id: String,
    state: StateStore,
    lifecycle: Mutex<Lifecycle<A>>,
}

impl<A> Supervisor<A>
where
    A: Activator,
{
    pub fn new<S: Into<String>>(id: S, activator: A) -> Self {
        Self {
            id: id.into(),
            state: StateStore::new(),
            lifecycle: Mutex::new(Lifecycle {
                activator,
                watchdogs: WatchdogRegistry::new(),
                started: false,
                active: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle<A>> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_activator<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut A) -> T,
    {
        f(&mut self.lock_lifecycle().activator)
    }

    pub fn register_watchdog(&self, watchdog: Arc<dyn Watchdog>, options: WatchdogOptions) {
        self.lock_lifecycle().watchdogs.register(watchdog, options);
    }

    /// Starts the app: watchdogs flagged to run before it, then the activity itself, then
    /// the remaining watchdogs. The status goes back to [`RunStatus::Unknown`] until the
    /// first status update.
    ///
    /// If activation fails the status becomes [`RunStatus::Error`] and the remaining
    /// watchdogs are not started.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.activator.is_active() {
            return Err(SupervisorError::AlreadyRunning);
        }

        info!(supervisor = %self.id, "Starting app");
        lifecycle.watchdogs.run_pre_start();
        self.state.reset_for_start();
        lifecycle.started = true;
        lifecycle.active = true;

        if let Err(err) = lifecycle.activator.activate(&self.state) {
            error!(supervisor = %self.id, "Failed to start app: {}", err);
            self.state.set_run_status(RunStatus::Error);
            return Err(err);
        }

        lifecycle.watchdogs.run_post_start();
        Ok(())
    }

    /// Stops the watchdogs and then the app. The status becomes [`RunStatus::Stopped`] only
    /// when the app confirms a clean termination, otherwise it is left as it was.
    ///
    /// Stopping an app that is not started is a no-op. Returns whether the app is stopped.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.lock_lifecycle();
        if !lifecycle.active {
            debug!(supervisor = %self.id, "app is not started, nothing to stop");
            return self.state.run_status() == RunStatus::Stopped;
        }

        info!(supervisor = %self.id, "Stopping app");
        lifecycle.active = false;
        lifecycle.watchdogs.run_stop();

        if lifecycle.activator.deactivate() {
            self.state.set_run_status(RunStatus::Stopped);
            info!(supervisor = %self.id, "App stopped");
            true
        } else {
            warn!(
                supervisor = %self.id,
                status = %self.state.run_status(),
                "App did not confirm a clean termination"
            );
            false
        }
    }

    /// Periodic status hook. Refreshes the status from the app and turns it into
    /// [`RunStatus::Error`] if a watchdog reports it is not running.
    ///
    /// Does nothing once the app is stopped, ended or failed, until the next start.
    pub fn update_status(&self) -> Result<Option<StatusPayload>, SupervisorError> {
        let mut lifecycle = self.lock_lifecycle();
        if !lifecycle.started {
            return Err(SupervisorError::NotStarted);
        }
        if self.state.run_status().is_terminal() {
            return Ok(None);
        }

        let payload = lifecycle.activator.refresh(&self.state);

        if !lifecycle.watchdogs.aggregate_health()
            && self.state.transition_unless_terminal(RunStatus::Error)
        {
            warn!(supervisor = %self.id, "Watchdog failure, app marked as failed");
        }

        Ok(payload)
    }

    /// Starts the app and returns a guard that stops it when dropped.
    ///
    /// If the activation fails the app is stopped right away, so watchdogs already started
    /// are stopped too. An app that is already running is left untouched.
    pub fn start_scoped(&self) -> Result<RunningApp<'_, A>, SupervisorError> {
        match self.start() {
            Ok(()) => {}
            Err(SupervisorError::AlreadyRunning) => return Err(SupervisorError::AlreadyRunning),
            Err(err) => {
                self.stop();
                return Err(err);
            }
        }
        Ok(RunningApp {
            supervisor: self,
            stopped: false,
        })
    }

    /// Runs `f` with the app started, stopping it afterwards whatever `f` does.
    pub fn run_scoped<F, T>(&self, f: F) -> Result<T, SupervisorError>
    where
        F: FnOnce(&Self) -> T,
    {
        let running = self.start_scoped()?;
        Ok(f(&running))
    }

    pub fn run_status(&self) -> RunStatus {
        self.state.run_status()
    }

    pub fn status(&self) -> StatusPayload {
        self.state.status()
    }

    pub fn set_value<K, V>(&self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.state.set_value(key, value)
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        self.state.get_value(key)
    }

    pub fn get_values(&self) -> HashMap<String, String> {
        self.state.get_values()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// A handle on the app state for readers running elsewhere, such as a UI.
    pub fn state(&self) -> StateStore {
        self.state.clone()
    }
}

/// Started app, stopped exactly once: explicitly through [`RunningApp::stop`] or when the
/// guard goes out of scope.
pub struct RunningApp<'a, A>
where
    A: Activator,
{
    supervisor: &'a Supervisor<A>,
    stopped: bool,
}

impl<A> RunningApp<'_, A>
where
    A: Activator,
{
    pub fn stop(mut self) -> bool {
        self.stopped = true;
        self.supervisor.stop()
    }
}

impl<A> Deref for RunningApp<'_, A>
where
    A: Activator,
{
    type Target = Supervisor<A>;

    fn deref(&self) -> &Self::Target {
        self.supervisor
    }
}

impl<A> Drop for RunningApp<'_, A>
where
    A: Activator,
{
    fn drop(&mut self) {
        if !self.stopped {
            self.supervisor.stop();
        }
    }
}
