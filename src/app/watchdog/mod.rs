use std::{fmt, sync::Arc};

use serde::Deserialize;
use tracing::{debug, warn};

pub mod process;

/// Component attached to an app that is started and stopped with it and reports whether
/// the app (or whatever it watches) is still healthy.
///
/// Watchdogs are shared: the supervisor only invokes them, whoever configured them keeps
/// its own handle.
pub trait Watchdog: Send + Sync {
    fn start_watchdog(&self);
    fn stop_watchdog(&self);
    /// `false` turns the app status into an error on the next status update.
    fn is_running(&self) -> bool;
}

/// When a watchdog is started relative to its app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct WatchdogOptions {
    /// Start before the app is activated instead of after.
    #[serde(default)]
    pub start_before_app_start: bool,
    /// Invoke the start hook again right before the stop hook when the app is stopped, so a
    /// chained activity can pick up the output of the one being stopped.
    #[serde(default)]
    pub start_on_app_end: bool,
}

impl WatchdogOptions {
    pub fn with_start_before_app_start(self, start_before_app_start: bool) -> Self {
        Self {
            start_before_app_start,
            ..self
        }
    }

    pub fn with_start_on_app_end(self, start_on_app_end: bool) -> Self {
        Self {
            start_on_app_end,
            ..self
        }
    }
}

struct Registration {
    watchdog: Arc<dyn Watchdog>,
    options: WatchdogOptions,
}

/// Watchdogs of an app, invoked in registration order in every phase.
#[derive(Default)]
pub struct WatchdogRegistry {
    registrations: Vec<Registration>,
}

impl fmt::Debug for WatchdogRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| r.options))
            .finish()
    }
}

impl WatchdogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a watchdog. Registering the same watchdog twice invokes it twice.
    pub fn register(&mut self, watchdog: Arc<dyn Watchdog>, options: WatchdogOptions) {
        self.registrations.push(Registration { watchdog, options });
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Starts the watchdogs flagged to run before the app.
    pub fn run_pre_start(&self) {
        for (position, registration) in self.registrations.iter().enumerate() {
            if registration.options.start_before_app_start {
                debug!(watchdog = position, "starting watchdog before app start");
                registration.watchdog.start_watchdog();
            }
        }
    }

    /// Starts every watchdog not flagged to run before the app.
    pub fn run_post_start(&self) {
        for (position, registration) in self.registrations.iter().enumerate() {
            if !registration.options.start_before_app_start {
                debug!(watchdog = position, "starting watchdog after app start");
                registration.watchdog.start_watchdog();
            }
        }
    }

    /// Stops every watchdog. Those flagged with `start_on_app_end` get their start hook
    /// invoked right before their stop hook.
    pub fn run_stop(&self) {
        for (position, registration) in self.registrations.iter().enumerate() {
            if registration.options.start_on_app_end {
                debug!(watchdog = position, "starting watchdog on app end");
                registration.watchdog.start_watchdog();
            }
            debug!(watchdog = position, "stopping watchdog");
            registration.watchdog.stop_watchdog();
        }
    }

    /// `false` as soon as one watchdog reports it is not running.
    pub fn aggregate_health(&self) -> bool {
        match self
            .registrations
            .iter()
            .position(|registration| !registration.watchdog.is_running())
        {
            Some(position) => {
                warn!(watchdog = position, "watchdog reports not running");
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mockall::{mock, Sequence};

    mock! {
        pub Watchdog {}

        impl Watchdog for Watchdog {
            fn start_watchdog(&self);
            fn stop_watchdog(&self);
            fn is_running(&self) -> bool;
        }
    }

    fn before() -> WatchdogOptions {
        WatchdogOptions::default().with_start_before_app_start(true)
    }

    #[test]
    fn options_default_to_false() {
        let options: WatchdogOptions = serde_yaml::from_str("{}").unwrap();

        assert_eq!(WatchdogOptions::default(), options);
        assert!(!options.start_before_app_start);
        assert!(!options.start_on_app_end);
    }

    #[test]
    fn start_phases_split_by_flag_in_registration_order() {
        let mut seq = Sequence::new();
        let mut first_before = MockWatchdog::new();
        let mut after = MockWatchdog::new();
        let mut second_before = MockWatchdog::new();

        first_before
            .expect_start_watchdog()
            .once()
            .in_sequence(&mut seq)
            .return_const(());
        second_before
            .expect_start_watchdog()
            .once()
            .in_sequence(&mut seq)
            .return_const(());
        after
            .expect_start_watchdog()
            .once()
            .in_sequence(&mut seq)
            .return_const(());

        let mut registry = WatchdogRegistry::new();
        registry.register(Arc::new(first_before), before());
        registry.register(Arc::new(after), WatchdogOptions::default());
        registry.register(Arc::new(second_before), before());

        registry.run_pre_start();
        registry.run_post_start();
    }

    #[test]
    fn stop_starts_on_end_watchdogs_before_stopping_them() {
        let mut seq = Sequence::new();
        let mut plain = MockWatchdog::new();
        let mut chained = MockWatchdog::new();

        plain
            .expect_stop_watchdog()
            .once()
            .in_sequence(&mut seq)
            .return_const(());
        chained
            .expect_start_watchdog()
            .once()
            .in_sequence(&mut seq)
            .return_const(());
        chained
            .expect_stop_watchdog()
            .once()
            .in_sequence(&mut seq)
            .return_const(());
        plain.expect_start_watchdog().never();

        let mut registry = WatchdogRegistry::new();
        registry.register(Arc::new(plain), WatchdogOptions::default());
        registry.register(
            Arc::new(chained),
            WatchdogOptions::default().with_start_on_app_end(true),
        );

        registry.run_stop();
    }

    #[test]
    fn health_is_false_when_any_watchdog_is_down() {
        let mut up = MockWatchdog::new();
        up.expect_is_running().return_const(true);
        let mut down = MockWatchdog::new();
        down.expect_is_running().return_const(false);

        let mut registry = WatchdogRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.aggregate_health());

        registry.register(Arc::new(up), WatchdogOptions::default());
        assert!(registry.aggregate_health());

        registry.register(Arc::new(down), WatchdogOptions::default());
        assert!(!registry.aggregate_health());
        assert!(!registry.is_empty());
        assert_eq!(2, registry.len());
    }

    #[test]
    fn same_watchdog_registered_twice_is_invoked_twice() {
        let mut watchdog = MockWatchdog::new();
        watchdog.expect_start_watchdog().times(2).return_const(());
        let watchdog = Arc::new(watchdog);

        let mut registry = WatchdogRegistry::new();
        registry.register(watchdog.clone(), WatchdogOptions::default());
        registry.register(watchdog, WatchdogOptions::default());

        registry.run_post_start();
    }
}
