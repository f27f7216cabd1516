use std::{collections::HashMap, fs::File, path::Path, sync::Arc};

use serde::Deserialize;
use tracing::debug;

use super::error::ConfigError;
use crate::{
    app::{
        process::{ProcessActivator, StreamerSupervisor},
        status::{KeyValueParser, StaleTimeout, FFMPEG_STATUS_MARKER},
        supervisor::Supervisor,
        watchdog::{process::ProcessWatchdog, WatchdogOptions},
    },
    command::Executable,
};

/// Supervisor definition read from YAML.
///
/// ```yaml
/// id: camera
/// executable:
///   bin: ffmpeg
///   args: ["-f", "v4l2", "-video_size", "${res}", "-i", "/dev/video0", "${dumpf}"]
///   shutdown_timeout: 5s
/// stale_timeout: 30s
/// values:
///   res: 640x480
/// watchdogs:
///   - executable:
///       bin: relay
///     start_before_app_start: true
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SupervisorConfig {
    /// Defaults to the file name of the binary.
    #[serde(default)]
    pub id: Option<String>,
    pub executable: Executable,
    #[serde(default)]
    pub stale_timeout: StaleTimeout,
    #[serde(default = "default_status_marker")]
    pub status_marker: String,
    /// Initial contents of the app value store.
    #[serde(default)]
    pub values: HashMap<String, String>,
    #[serde(default)]
    pub watchdogs: Vec<WatchdogConfig>,
}

/// Companion command run as a [`ProcessWatchdog`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchdogConfig {
    pub executable: Executable,
    #[serde(flatten)]
    pub options: WatchdogOptions,
}

fn default_status_marker() -> String {
    FFMPEG_STATUS_MARKER.to_string()
}

impl SupervisorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading supervisor config");
        let file = File::open(path)?;
        Self::validated(serde_yaml::from_reader(file)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::validated(serde_yaml::from_str(yaml)?)
    }

    fn validated(config: Self) -> Result<Self, ConfigError> {
        if config.status_marker.is_empty() {
            return Err(ConfigError::EmptyStatusMarker);
        }
        Ok(config)
    }

    pub fn id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            Path::new(&self.executable.bin)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.executable.bin.clone())
        })
    }

    /// Builds the supervisor with its values seeded and its watchdogs registered. Nothing is
    /// started.
    pub fn build_supervisor(&self) -> StreamerSupervisor {
        let activator = ProcessActivator::new(
            self.executable.clone(),
            KeyValueParser::new(self.status_marker.as_str()),
            self.stale_timeout,
        );
        let supervisor = Supervisor::new(self.id(), activator);

        self.values
            .iter()
            .for_each(|(key, value)| supervisor.set_value(key.as_str(), value.as_str()));
        self.watchdogs.iter().for_each(|watchdog| {
            supervisor.register_watchdog(
                Arc::new(ProcessWatchdog::new(watchdog.executable.clone())),
                watchdog.options,
            )
        });

        supervisor
    }
}
