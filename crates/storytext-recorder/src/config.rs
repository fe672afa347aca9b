//! Recorder configuration, normally taken from the environment the test
//! harness sets up

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const RECORD_SCRIPT_VAR: &str = "USECASE_RECORD_SCRIPT";
pub const REPLAY_SCRIPT_VAR: &str = "USECASE_REPLAY_SCRIPT";
pub const REPLAY_DELAY_VAR: &str = "USECASE_REPLAY_DELAY";
pub const REPLAY_TIMEOUT_VAR: &str = "USECASE_REPLAY_TIMEOUT";

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    /// Where to record; `None` disables the recorder
    pub record_script: Option<PathBuf>,
    /// What to replay; `None` disables the replayer
    pub replay_script: Option<PathBuf>,
    /// Pause between replayed actions
    pub replay_delay: Duration,
    /// How long replay waits for an application event
    pub max_wait: Duration,
    /// Record OS signals as `receive signal` lines
    pub intercept_signals: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            record_script: None,
            replay_script: None,
            replay_delay: Duration::ZERO,
            max_wait: Duration::from_secs(60),
            intercept_signals: cfg!(unix),
        }
    }
}

impl RecorderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.record_script = non_empty(lookup(RECORD_SCRIPT_VAR)).map(PathBuf::from);
        config.replay_script = non_empty(lookup(REPLAY_SCRIPT_VAR)).map(PathBuf::from);
        if let Some(v) = non_empty(lookup(REPLAY_DELAY_VAR)) {
            config.replay_delay = parse_seconds(REPLAY_DELAY_VAR, &v)?;
        }
        if let Some(v) = non_empty(lookup(REPLAY_TIMEOUT_VAR)) {
            config.max_wait = parse_seconds(REPLAY_TIMEOUT_VAR, &v)?;
        }
        Ok(config)
    }

    pub fn recording(path: impl Into<PathBuf>) -> Self {
        Self {
            record_script: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn without_signals(mut self) -> Self {
        self.intercept_signals = false;
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_seconds(var: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| Error::invalid_config(var, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RecorderConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RecorderConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_is_inactive() {
        let c = config(&[]).unwrap();
        assert_eq!(c, RecorderConfig::default());
        assert!(c.record_script.is_none());
        assert_eq!(c.max_wait, Duration::from_secs(60));
    }

    #[test]
    fn empty_string_means_unset() {
        let c = config(&[(RECORD_SCRIPT_VAR, ""), (REPLAY_SCRIPT_VAR, "  ")]).unwrap();
        assert!(c.record_script.is_none());
        assert!(c.replay_script.is_none());
    }

    #[test]
    fn reads_all_variables() {
        let c = config(&[
            (RECORD_SCRIPT_VAR, "/tmp/rec"),
            (REPLAY_SCRIPT_VAR, "/tmp/rep"),
            (REPLAY_DELAY_VAR, "0.5"),
            (REPLAY_TIMEOUT_VAR, "5"),
        ])
        .unwrap();
        assert_eq!(c.record_script, Some(PathBuf::from("/tmp/rec")));
        assert_eq!(c.replay_script, Some(PathBuf::from("/tmp/rep")));
        assert_eq!(c.replay_delay, Duration::from_millis(500));
        assert_eq!(c.max_wait, Duration::from_secs(5));
    }

    #[test]
    fn malformed_delay_rejected() {
        let err = config(&[(REPLAY_DELAY_VAR, "soon")]).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidConfig);
        assert!(config(&[(REPLAY_DELAY_VAR, "-1")]).is_err());
    }
}
