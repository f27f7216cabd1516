//! Structured status extraction from the output of a supervised app, and the staleness
//! policy applied when no status shows up.

use std::time::{Duration, Instant};

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{run_status::RunStatus, state::StateStore};
use crate::utils::time::{Clock, SystemClock};

const KEY_VALUE_DELIMITER: char = '=';
pub const FFMPEG_STATUS_MARKER: &str = "frame=";
const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(30);

/// Latest structured snapshot reported by an app, as ordered `(key, value)` pairs.
/// Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusPayload(Vec<(String, String)>);

impl StatusPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.push((key.into(), value.into()));
    }

    /// Value of the first pair with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for StatusPayload
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Turns raw output lines into a status payload. An empty payload means nothing parseable
/// was found.
pub trait StatusParser: Send {
    fn parse(&self, lines: &[String]) -> StatusPayload;
}

/// Extracts `key=value` pairs from lines containing a marker token.
///
/// A line is split on `=`. For every segment but the last, the value is the first token of
/// the following segment. The key is the whole first segment, and for later segments the
/// token after the previous pair's value. With the ffmpeg marker, the line
/// `frame=  10 fps=30 size=256kB` yields `frame=10`, `fps=30` and `size=256kB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueParser {
    marker: String,
}

impl KeyValueParser {
    pub fn new<S: Into<String>>(marker: S) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Parser for ffmpeg progress lines.
    pub fn ffmpeg() -> Self {
        Self::new(FFMPEG_STATUS_MARKER)
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    fn parse_line(line: &str, payload: &mut StatusPayload) {
        let segments: Vec<&str> = line.split(KEY_VALUE_DELIMITER).collect();
        for (i, pair) in segments.windows(2).enumerate() {
            let key = if i == 0 {
                Some(pair[0].trim()).filter(|k| !k.is_empty())
            } else {
                pair[0].split_whitespace().nth(1)
            };
            let value = pair[1].split_whitespace().next();

            match (key, value) {
                (Some(key), Some(value)) => payload.push(key, value),
                _ => trace!(segment = pair[0], "skipping segment without key or value"),
            }
        }
    }
}

impl Default for KeyValueParser {
    fn default() -> Self {
        Self::ffmpeg()
    }
}

impl StatusParser for KeyValueParser {
    fn parse(&self, lines: &[String]) -> StatusPayload {
        let mut payload = StatusPayload::new();
        lines
            .iter()
            .filter(|line| line.contains(self.marker.as_str()))
            .for_each(|line| Self::parse_line(line, &mut payload));
        payload
    }
}

/// How long an app may go without reporting a parseable status before it is considered
/// failed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StaleTimeout(#[serde(deserialize_with = "deserialize_duration")] Duration);

impl Default for StaleTimeout {
    fn default() -> Self {
        Self(DEFAULT_STALE_TIMEOUT)
    }
}

impl From<Duration> for StaleTimeout {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<StaleTimeout> for Duration {
    fn from(value: StaleTimeout) -> Self {
        value.0
    }
}

/// Applies parsed output to the app state and detects staleness.
pub struct StatusPoller<P, C = SystemClock> {
    parser: P,
    clock: C,
    stale_timeout: Duration,
    last_update: Instant,
}

impl<P> StatusPoller<P, SystemClock>
where
    P: StatusParser,
{
    pub fn new(parser: P, stale_timeout: StaleTimeout) -> Self {
        Self::with_clock(parser, stale_timeout, SystemClock)
    }
}

impl<P, C> StatusPoller<P, C>
where
    P: StatusParser,
    C: Clock,
{
    pub fn with_clock(parser: P, stale_timeout: StaleTimeout, clock: C) -> Self {
        let last_update = clock.now();
        Self {
            parser,
            clock,
            stale_timeout: stale_timeout.into(),
            last_update,
        }
    }

    /// Restarts the staleness window, as if a status had just been parsed.
    pub fn reset(&mut self) {
        self.last_update = self.clock.now();
    }

    /// Parses `lines`. On success the app becomes [`RunStatus::Running`] with the new payload,
    /// which is also returned. Otherwise returns `None`, and once more than the stale timeout
    /// passed since the last success the app is marked as [`RunStatus::Error`].
    pub fn poll(&mut self, lines: &[String], state: &StateStore) -> Option<StatusPayload> {
        let now = self.clock.now();
        let payload = self.parser.parse(lines);

        if payload.is_empty() {
            let elapsed = now.saturating_duration_since(self.last_update);
            if elapsed > self.stale_timeout && state.transition_unless_terminal(RunStatus::Error)
            {
                warn!(
                    elapsed_secs = elapsed.as_secs(),
                    "No status reported within the stale timeout"
                );
            }
            return None;
        }

        if !state.record_status(payload.clone()) {
            return None;
        }
        self.last_update = now;
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::tests::FakeClock;
    use rstest::rstest;

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(ToString::to_string).collect()
    }

    #[rstest]
    #[case::multi_field(
        "size=100 time=00:00:01 frame=10 time=00:00:02 fps=30",
        vec![("size", "100"), ("time", "00:00:01"), ("frame", "10"), ("time", "00:00:02"), ("fps", "30")]
    )]
    #[case::ffmpeg_progress(
        "frame=  120 fps= 29 q=28.0 size=     256kB time=00:00:04.00 bitrate= 524.3kbits/s speed=0.99x",
        vec![
            ("frame", "120"), ("fps", "29"), ("q", "28.0"), ("size", "256kB"),
            ("time", "00:00:04.00"), ("bitrate", "524.3kbits/s"), ("speed", "0.99x"),
        ]
    )]
    #[case::single_pair("frame=1", vec![("frame", "1")])]
    #[case::missing_value("frame=", vec![])]
    #[case::segment_without_key("frame=1 =2", vec![("frame", "1")])]
    fn parse_key_value_lines(#[case] line: &str, #[case] expected: Vec<(&str, &str)>) {
        let payload = KeyValueParser::ffmpeg().parse(&lines(&[line]));

        assert_eq!(StatusPayload::from_iter(expected), payload);
    }

    #[test]
    fn lines_without_marker_are_ignored() {
        let payload = KeyValueParser::ffmpeg().parse(&lines(&[
            "Input #0, mov,mp4, from 'in.mp4':",
            "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1205 kb/s",
            "frame=5 fps=25",
            "Press [q] to stop",
        ]));

        assert_eq!(StatusPayload::from_iter([("frame", "5"), ("fps", "25")]), payload);
        assert_eq!(Some("25"), payload.get("fps"));
        assert_eq!(None, payload.get("q"));
    }

    #[test]
    fn custom_marker() {
        let payload = KeyValueParser::new("progress=").parse(&lines(&[
            "frame=1 fps=2",
            "progress=continue out_time=00:00:01",
        ]));

        assert_eq!(
            StatusPayload::from_iter([("progress", "continue"), ("out_time", "00:00:01")]),
            payload
        );
    }

    fn poller(clock: &FakeClock) -> StatusPoller<KeyValueParser, FakeClock> {
        StatusPoller::with_clock(KeyValueParser::ffmpeg(), StaleTimeout::default(), clock.clone())
    }

    #[test]
    fn unknown_until_first_parse_then_running() {
        let clock = FakeClock::new();
        let state = StateStore::new();
        let mut poller = poller(&clock);

        assert_eq!(None, poller.poll(&[], &state));
        assert_eq!(RunStatus::Unknown, state.run_status());

        let payload = poller.poll(&lines(&["frame=1 fps=30"]), &state);

        assert_eq!(Some(StatusPayload::from_iter([("frame", "1"), ("fps", "30")])), payload);
        assert_eq!(RunStatus::Running, state.run_status());
        assert_eq!(payload.unwrap(), state.status());
    }

    #[test]
    fn payload_is_replaced_not_merged() {
        let clock = FakeClock::new();
        let state = StateStore::new();
        let mut poller = poller(&clock);

        poller.poll(&lines(&["frame=1 fps=30"]), &state);
        poller.poll(&lines(&["frame=2"]), &state);

        assert_eq!(StatusPayload::from_iter([("frame", "2")]), state.status());
    }

    #[test]
    fn error_after_stale_timeout() {
        let clock = FakeClock::new();
        let state = StateStore::new();
        let mut poller = poller(&clock);
        poller.poll(&lines(&["frame=1"]), &state);

        clock.advance(Duration::from_secs(30));
        assert_eq!(None, poller.poll(&[], &state));
        assert_eq!(RunStatus::Running, state.run_status());

        clock.advance(Duration::from_secs(1));
        assert_eq!(None, poller.poll(&[], &state));
        assert_eq!(RunStatus::Error, state.run_status());
        // the last good payload is kept for inspection
        assert_eq!(StatusPayload::from_iter([("frame", "1")]), state.status());
    }

    #[test]
    fn unparseable_output_counts_as_no_output() {
        let clock = FakeClock::new();
        let state = StateStore::new();
        let mut poller = StatusPoller::with_clock(
            KeyValueParser::ffmpeg(),
            Duration::from_secs(5).into(),
            clock.clone(),
        );

        for _ in 0..6 {
            clock.advance(Duration::from_secs(1));
            poller.poll(&lines(&["garbage", "more garbage"]), &state);
        }

        assert_eq!(RunStatus::Error, state.run_status());
    }

    #[test]
    fn no_recovery_from_error() {
        let clock = FakeClock::new();
        let state = StateStore::new();
        let mut poller = poller(&clock);

        clock.advance(Duration::from_secs(31));
        poller.poll(&[], &state);
        assert_eq!(RunStatus::Error, state.run_status());

        assert_eq!(None, poller.poll(&lines(&["frame=1"]), &state));
        assert_eq!(RunStatus::Error, state.run_status());
    }

    #[test]
    fn reset_restarts_the_window() {
        let clock = FakeClock::new();
        let state = StateStore::new();
        let mut poller = poller(&clock);

        clock.advance(Duration::from_secs(25));
        poller.reset();
        clock.advance(Duration::from_secs(25));
        poller.poll(&[], &state);

        assert_eq!(RunStatus::Unknown, state.run_status());
    }

    #[test]
    fn stale_timeout_deserializes_from_duration_string() {
        let timeout: StaleTimeout = serde_yaml::from_str("45s").unwrap();

        assert_eq!(Duration::from_secs(45), Duration::from(timeout));
        assert_eq!(Duration::from_secs(30), Duration::from(StaleTimeout::default()));
    }
}
