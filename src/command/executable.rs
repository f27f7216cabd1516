use std::{collections::HashMap, sync::OnceLock, time::Duration};

use duration_str::deserialize_duration;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::error::CommandError;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Matches `${key}` placeholders in command arguments.
const PLACEHOLDER_RE: &str = r"\$\{([a-zA-Z0-9\.\-_]+)\}";

fn placeholder_re() -> &'static Regex {
    static RE_ONCE: OnceLock<Regex> = OnceLock::new();
    RE_ONCE.get_or_init(|| Regex::new(PLACEHOLDER_RE).unwrap())
}

/// Everything needed to launch a supervised command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Executable {
    pub bin: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

impl Executable {
    pub fn new<S: Into<String>>(bin: S) -> Self {
        Executable {
            bin: bin.into(),
            args: Vec::default(),
            env: HashMap::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_env(self, env: HashMap<String, String>) -> Self {
        Self { env, ..self }
    }

    pub fn with_shutdown_timeout(self, shutdown_timeout: Duration) -> Self {
        Self {
            shutdown_timeout,
            ..self
        }
    }

    /// Returns a copy whose arguments have every `${key}` placeholder replaced by the
    /// corresponding entry of `values`. Fails on the first placeholder without a value.
    pub fn with_values(&self, values: &HashMap<String, String>) -> Result<Self, CommandError> {
        let args = self
            .args
            .iter()
            .map(|arg| render_arg(arg, values))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            args,
            ..self.clone()
        })
    }
}

fn render_arg(arg: &str, values: &HashMap<String, String>) -> Result<String, CommandError> {
    if let Some(missing) = placeholder_re()
        .captures_iter(arg)
        .map(|caps| caps[1].to_string())
        .find(|key| !values.contains_key(key))
    {
        return Err(CommandError::MissingValue(missing));
    }

    Ok(placeholder_re()
        .replace_all(arg, |caps: &Captures| values[&caps[1]].clone())
        .into_owned())
}
