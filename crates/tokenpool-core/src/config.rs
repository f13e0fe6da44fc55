//! Pilot configuration.
//!
//! Loaded from a JSON file, then overlaid with `TOKENPOOL_*` environment
//! variables. Every field is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{DEFAULT_CHILD_GRACE, ResetValues, StopPolicy};
use crate::claim::ClaimOptions;
use crate::iterators::{
    EndlessViewIterator, PrioritizedViewIterator, TaskIterator, TaskViewIterator,
};
use crate::ports::{DEFAULT_DESIGN_DOC, DocumentStore, ViewRef};

pub const ENV_PREFIX: &str = "TOKENPOOL_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub design_doc: String,
    pub view: String,

    /// Enables the prioritized iterator when set.
    pub high_priority_view: Option<String>,

    pub window: usize,
    pub claim_attempts: u32,

    /// Wrap the iterator in an endless one that polls every
    /// `poll_interval_secs`.
    pub endless: bool,
    pub poll_interval_secs: u64,

    pub max_token_time_secs: Option<u64>,
    pub max_total_time_secs: Option<u64>,
    pub max_tasks: Option<u64>,
    pub max_scrub: u32,

    /// `[lock, done]` written to the current task on shutdown; `null`
    /// disables the write.
    pub token_reset_values: Option<[i64; 2]>,

    pub child_grace_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let claim = ClaimOptions::default();
        Self {
            design_doc: DEFAULT_DESIGN_DOC.to_string(),
            view: "todo".to_string(),
            high_priority_view: None,
            window: claim.window,
            claim_attempts: claim.max_attempts,
            endless: false,
            poll_interval_secs: 10,
            max_token_time_secs: None,
            max_total_time_secs: None,
            max_tasks: None,
            max_scrub: 0,
            token_reset_values: Some([0, 0]),
            child_grace_secs: DEFAULT_CHILD_GRACE.as_secs(),
        }
    }
}

impl RunConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `TOKENPOOL_*` variables from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay `TOKENPOOL_<FIELD>` values obtained through `lookup`.
    ///
    /// `TOKENPOOL_TOKEN_RESET_VALUES` takes `lock,done` or `none`; optional
    /// bounds take `none` to unset them.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |field: &str| {
            let key = format!("{ENV_PREFIX}{field}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, v)) = get("DESIGN_DOC") {
            self.design_doc = v;
        }
        if let Some((_, v)) = get("VIEW") {
            self.view = v;
        }
        if let Some((_, v)) = get("HIGH_PRIORITY_VIEW") {
            self.high_priority_view = (!is_none(&v)).then_some(v);
        }
        if let Some((k, v)) = get("WINDOW") {
            self.window = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("CLAIM_ATTEMPTS") {
            self.claim_attempts = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("ENDLESS") {
            self.endless = parse_bool(&k, &v)?;
        }
        if let Some((k, v)) = get("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("MAX_TOKEN_TIME_SECS") {
            self.max_token_time_secs = parse_optional(&k, &v)?;
        }
        if let Some((k, v)) = get("MAX_TOTAL_TIME_SECS") {
            self.max_total_time_secs = parse_optional(&k, &v)?;
        }
        if let Some((k, v)) = get("MAX_TASKS") {
            self.max_tasks = parse_optional(&k, &v)?;
        }
        if let Some((k, v)) = get("MAX_SCRUB") {
            self.max_scrub = parse(&k, &v)?;
        }
        if let Some((k, v)) = get("TOKEN_RESET_VALUES") {
            self.token_reset_values = parse_reset_values(&k, &v)?;
        }
        if let Some((k, v)) = get("CHILD_GRACE_SECS") {
            self.child_grace_secs = parse(&k, &v)?;
        }
        Ok(self)
    }

    pub fn view(&self) -> ViewRef {
        ViewRef::in_design(&self.design_doc, &self.view)
    }

    pub fn high_priority_view(&self) -> Option<ViewRef> {
        self.high_priority_view
            .as_ref()
            .map(|name| ViewRef::in_design(&self.design_doc, name))
    }

    pub fn claim_options(&self) -> ClaimOptions {
        ClaimOptions {
            window: self.window,
            max_attempts: self.claim_attempts,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn child_grace(&self) -> Duration {
        Duration::from_secs(self.child_grace_secs)
    }

    pub fn reset_values(&self) -> Option<ResetValues> {
        self.token_reset_values
            .map(|[lock, done]| ResetValues::new(lock, done))
    }

    /// Bounds only; a stop function has to be added in code.
    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            max_token_time: self.max_token_time_secs.map(Duration::from_secs),
            max_total_time: self.max_total_time_secs.map(Duration::from_secs),
            max_tasks: self.max_tasks,
            max_scrub: self.max_scrub,
            stop_function: None,
        }
    }

    pub fn build_iterator(&self, store: Arc<dyn DocumentStore>) -> Box<dyn TaskIterator> {
        let opts = self.claim_options();
        let base: Box<dyn TaskIterator> = match self.high_priority_view() {
            Some(high) => Box::new(
                PrioritizedViewIterator::new(store, high, self.view()).with_options(opts),
            ),
            None => Box::new(TaskViewIterator::new(store, self.view()).with_options(opts)),
        };
        if self.endless {
            Box::new(EndlessViewIterator::new(base).with_interval(self.poll_interval()))
        } else {
            base
        }
    }
}

fn is_none(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("null")
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_optional<T: FromStr>(key: &str, value: &str) -> Result<Option<T>, ConfigError> {
    if is_none(value) {
        return Ok(None);
    }
    parse(key, value).map(Some)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_reset_values(key: &str, value: &str) -> Result<Option<[i64; 2]>, ConfigError> {
    if is_none(value) {
        return Ok(None);
    }
    let (lock, done) = value.split_once(',').ok_or_else(|| invalid(key, value))?;
    Ok(Some([parse(key, lock)?, parse(key, done)?]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use rstest::rstest;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"view": "todo_big", "max_scrub": 2}"#).unwrap();

        assert_eq!(config.view(), ViewRef::new("todo_big"));
        assert_eq!(config.max_scrub, 2);
        assert_eq!(config.window, 100);
        assert_eq!(config.claim_attempts, 10);
        assert_eq!(config.reset_values(), Some(ResetValues::new(0, 0)));
        assert_eq!(config.child_grace(), Duration::from_secs(30));
    }

    #[test]
    fn null_reset_values_disable_the_write() {
        let config: RunConfig = serde_json::from_str(r#"{"token_reset_values": null}"#).unwrap();
        assert_eq!(config.reset_values(), None);

        let config: RunConfig =
            serde_json::from_str(r#"{"token_reset_values": [1, 99]}"#).unwrap();
        assert_eq!(config.reset_values(), Some(ResetValues::new(1, 99)));
    }

    #[test]
    fn env_overrides_file_values() {
        let config = RunConfig::default()
            .apply_env_with(env(&[
                ("TOKENPOOL_VIEW", "todo_gpu"),
                ("TOKENPOOL_ENDLESS", "yes"),
                ("TOKENPOOL_MAX_TASKS", "5"),
                ("TOKENPOOL_MAX_TOTAL_TIME_SECS", "3600"),
                ("TOKENPOOL_TOKEN_RESET_VALUES", "1,2"),
            ]))
            .unwrap();

        assert_eq!(config.view, "todo_gpu");
        assert!(config.endless);
        let policy = config.stop_policy();
        assert_eq!(policy.max_tasks, Some(5));
        assert_eq!(policy.max_total_time, Some(Duration::from_secs(3600)));
        assert_eq!(config.reset_values(), Some(ResetValues::new(1, 2)));
    }

    #[test]
    fn env_can_unset_optional_values() {
        let mut config = RunConfig::default();
        config.max_tasks = Some(3);
        let config = config
            .apply_env_with(env(&[
                ("TOKENPOOL_MAX_TASKS", "none"),
                ("TOKENPOOL_TOKEN_RESET_VALUES", "null"),
            ]))
            .unwrap();
        assert_eq!(config.max_tasks, None);
        assert_eq!(config.reset_values(), None);
    }

    #[rstest]
    #[case("TOKENPOOL_WINDOW", "lots")]
    #[case("TOKENPOOL_ENDLESS", "maybe")]
    #[case("TOKENPOOL_TOKEN_RESET_VALUES", "1")]
    #[case("TOKENPOOL_MAX_SCRUB", "-1")]
    fn invalid_env_is_reported(#[case] key: &str, #[case] value: &str) {
        let err = RunConfig::default()
            .apply_env_with(env(&[(key, value)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: k, .. } if k == key));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = RunConfig::from_json_file("/nonexistent/tokenpool.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[rstest]
    #[case::plain(false, false)]
    #[case::endless(true, true)]
    fn only_endless_iterators_take_a_stop_callback(#[case] endless: bool, #[case] takes: bool) {
        let config = RunConfig {
            endless,
            high_priority_view: Some("todo_high".to_string()),
            ..RunConfig::default()
        };
        let mut iterator = config.build_iterator(Arc::new(InMemoryStore::new()));
        assert_eq!(iterator.set_stop_callback(Arc::new(|| true)), takes);
    }
}
