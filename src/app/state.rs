use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use super::{run_status::RunStatus, status::StatusPayload};

#[derive(Debug, Default)]
struct AppState {
    run_status: RunStatus,
    status: StatusPayload,
    values: HashMap<String, String>,
}

/// Point in time copy of the whole app state, read under a single lock acquisition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub run_status: RunStatus,
    pub status: StatusPayload,
    pub values: HashMap<String, String>,
}

/// Run status, latest status payload and the key/value store of an app, behind one lock.
///
/// Clones share the same state, so a UI thread can keep its own handle while the
/// supervisor keeps polling. Every accessor takes the lock for the duration of the call
/// only and none calls another accessor while holding it. Getters return owned copies.
#[derive(Debug, Clone, Default)]
pub struct StateStore(Arc<Mutex<AppState>>);

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // The state is plain data that every writer leaves consistent, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, AppState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_status(&self) -> RunStatus {
        self.lock().run_status
    }

    pub fn set_run_status(&self, run_status: RunStatus) {
        let mut state = self.lock();
        if state.run_status != run_status {
            debug!(from = %state.run_status, to = %run_status, "run status changed");
        }
        state.run_status = run_status;
    }

    /// Sets `run_status` unless the current status is terminal. Returns whether it was set.
    pub(crate) fn transition_unless_terminal(&self, run_status: RunStatus) -> bool {
        let mut state = self.lock();
        if state.run_status.is_terminal() {
            return false;
        }
        debug!(from = %state.run_status, to = %run_status, "run status changed");
        state.run_status = run_status;
        true
    }

    /// Moves back to [`RunStatus::Unknown`] and drops the previous status payload.
    pub(crate) fn reset_for_start(&self) {
        let mut state = self.lock();
        state.run_status = RunStatus::Unknown;
        state.status = StatusPayload::default();
    }

    pub fn status(&self) -> StatusPayload {
        self.lock().status.clone()
    }

    pub fn set_status(&self, status: StatusPayload) {
        self.lock().status = status;
    }

    /// Stores a freshly reported status and marks the app as running, as one update.
    /// Ignored once the app reached a terminal state. Returns whether it was recorded.
    pub fn record_status(&self, status: StatusPayload) -> bool {
        let mut state = self.lock();
        if state.run_status.is_terminal() {
            return false;
        }
        if state.run_status != RunStatus::Running {
            debug!(from = %state.run_status, to = %RunStatus::Running, "run status changed");
        }
        state.run_status = RunStatus::Running;
        state.status = status;
        true
    }

    pub fn set_value<K, V>(&self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.lock().values.insert(key.into(), value.into());
    }

    /// Returns `None` for keys that were never set.
    pub fn get_value(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    pub fn get_values(&self) -> HashMap<String, String> {
        self.lock().values.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.lock();
        StateSnapshot {
            run_status: state.run_status,
            status: state.status.clone(),
            values: state.values.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn unset_keys_read_as_none() {
        let state = StateStore::new();
        assert_eq!(None, state.get_value("res"));

        state.set_value("res", "640x480");
        state.set_value("res", "1280x720");

        assert_eq!(Some("1280x720".to_string()), state.get_value("res"));
        assert_eq!(None, state.get_value("dumpf"));
    }

    #[test]
    fn get_values_returns_a_copy() {
        let state = StateStore::new();
        state.set_value("res", "640x480");

        let mut values = state.get_values();
        values.insert("res".to_string(), "changed".to_string());
        values.insert("other".to_string(), "value".to_string());

        assert_eq!(Some("640x480".to_string()), state.get_value("res"));
        assert_eq!(None, state.get_value("other"));
    }

    #[test]
    fn initial_state() {
        let state = StateStore::new();

        assert_eq!(StateSnapshot::default(), state.snapshot());
        assert_eq!(RunStatus::Unknown, state.run_status());
        assert!(state.status().is_empty());
    }

    #[test]
    fn record_status_sets_running_and_replaces_payload() {
        let state = StateStore::new();

        assert!(state.record_status(StatusPayload::from_iter([("frame", "1"), ("fps", "30")])));
        assert!(state.record_status(StatusPayload::from_iter([("frame", "2")])));

        let snapshot = state.snapshot();
        assert_eq!(RunStatus::Running, snapshot.run_status);
        assert_eq!(StatusPayload::from_iter([("frame", "2")]), snapshot.status);
    }

    #[test]
    fn record_status_is_ignored_in_terminal_states() {
        let state = StateStore::new();
        state.set_run_status(RunStatus::Error);

        assert!(!state.record_status(StatusPayload::from_iter([("frame", "1")])));
        assert!(!state.transition_unless_terminal(RunStatus::Ended));

        assert_eq!(RunStatus::Error, state.run_status());
        assert!(state.status().is_empty());
    }

    #[test]
    fn set_status_keeps_run_status() {
        let state = StateStore::new();
        state.set_run_status(RunStatus::Stopped);

        state.set_status(StatusPayload::from_iter([("frame", "42")]));

        assert_eq!(RunStatus::Stopped, state.run_status());
        assert_eq!(Some("42"), state.status().get("frame"));
    }

    #[test]
    fn reset_for_start_clears_previous_run() {
        let state = StateStore::new();
        state.set_value("res", "640x480");
        state.record_status(StatusPayload::from_iter([("frame", "1")]));
        state.set_run_status(RunStatus::Stopped);

        state.reset_for_start();

        assert_eq!(RunStatus::Unknown, state.run_status());
        assert!(state.status().is_empty());
        assert_eq!(Some("640x480".to_string()), state.get_value("res"));
    }

    #[test]
    fn clones_share_state_across_threads() {
        let state = StateStore::new();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        state.set_value(format!("{i}-{j}"), j.to_string());
                    }
                })
            })
            .collect();
        writers.into_iter().for_each(|w| w.join().unwrap());

        assert_eq!(800, state.get_values().len());
        assert_eq!(Some("99".to_string()), state.get_value("7-99"));
    }
}
