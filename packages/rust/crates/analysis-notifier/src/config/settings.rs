//! Runtime settings loader for analysis-notifier.
//!
//! Loads and merges:
//! - System defaults: `<PRJ_ROOT>/packages/conf/notifier.yaml`
//! - User overrides:  `<config home>/analysis-notifier/settings.yaml`, where the
//!   config home is `--conf`, else `PRJ_CONFIG_HOME`, else `<PRJ_ROOT>/.config`
//!
//! Merge precedence is user over system, field by field. Missing fields fall
//! back to built-in defaults when resolved into runtime configs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::connection::ReconnectPolicy;
use crate::polling::{HttpHistoryConfig, PollConfig};
use crate::waiter::DEFAULT_WAIT_TIMEOUT;

const DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH: &str = "packages/conf/notifier.yaml";
const DEFAULT_USER_SETTINGS_RELATIVE_PATH: &str = "analysis-notifier/settings.yaml";
const DEFAULT_CONFIG_HOME_RELATIVE_PATH: &str = ".config";
const DEFAULT_PUSH_URL: &str = "ws://localhost:8080/ws";
const API_BASE_ENV: &str = "ANALYSIS_API_BASE_URL";

/// Merged `notifier.yaml` contents; every leaf is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierSettings {
    #[serde(default)]
    pub push: PushSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub wait: WaitSettings,
}

/// `push:` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushSettings {
    pub url: Option<String>,
    pub max_reconnect_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// `history:` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistorySettings {
    pub api_base: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// `poll:` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollSettings {
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub freshness_secs: Option<u64>,
}

/// `wait:` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaitSettings {
    pub timeout_ms: Option<u64>,
}

impl NotifierSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            push: self.push.merge(overlay.push),
            history: self.history.merge(overlay.history),
            poll: self.poll.merge(overlay.poll),
            wait: self.wait.merge(overlay.wait),
        }
    }

    /// Push-channel URL.
    pub fn push_url(&self) -> String {
        non_empty(self.push.url.as_deref()).unwrap_or_else(|| DEFAULT_PUSH_URL.to_string())
    }

    /// Reconnect limits; `max_reconnect_attempts: 0` disables reconnects.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        let base_delay = self
            .push
            .base_delay_ms
            .map_or(defaults.base_delay, |ms| Duration::from_millis(ms.max(1)));
        let max_delay = self
            .push
            .max_delay_ms
            .map_or(defaults.max_delay, |ms| Duration::from_millis(ms.max(1)))
            .max(base_delay);
        ReconnectPolicy {
            max_attempts: self.push.max_reconnect_attempts.unwrap_or(defaults.max_attempts),
            base_delay,
            max_delay,
        }
    }

    /// History endpoint config. `ANALYSIS_API_BASE_URL` beats the files.
    pub fn history_config(&self) -> HttpHistoryConfig {
        let defaults = HttpHistoryConfig::default();
        let from_env = std::env::var(API_BASE_ENV).ok();
        let api_base = non_empty(from_env.as_deref())
            .or_else(|| non_empty(self.history.api_base.as_deref()))
            .unwrap_or(defaults.api_base);
        HttpHistoryConfig {
            api_base,
            request_timeout: self
                .history
                .request_timeout_secs
                .map_or(defaults.request_timeout, |secs| {
                    Duration::from_secs(secs.max(1))
                }),
        }
    }

    /// Polling cadence.
    pub fn poll_config(&self) -> PollConfig {
        let defaults = PollConfig::default();
        PollConfig {
            interval: self
                .poll
                .interval_ms
                .map_or(defaults.interval, |ms| Duration::from_millis(ms.max(1))),
            max_attempts: self
                .poll
                .max_attempts
                .map_or(defaults.max_attempts, |attempts| attempts.max(1)),
            freshness: self
                .poll
                .freshness_secs
                .map_or(defaults.freshness, |secs| Duration::from_secs(secs.max(1))),
        }
    }

    /// Deadline calling code uses for completion waits.
    pub fn wait_timeout(&self) -> Duration {
        self.wait
            .timeout_ms
            .map_or(DEFAULT_WAIT_TIMEOUT, |ms| Duration::from_millis(ms.max(1)))
    }
}

impl PushSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            url: overlay.url.or(self.url),
            max_reconnect_attempts: overlay
                .max_reconnect_attempts
                .or(self.max_reconnect_attempts),
            base_delay_ms: overlay.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: overlay.max_delay_ms.or(self.max_delay_ms),
        }
    }
}

impl HistorySettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            api_base: overlay.api_base.or(self.api_base),
            request_timeout_secs: overlay.request_timeout_secs.or(self.request_timeout_secs),
        }
    }
}

impl PollSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            interval_ms: overlay.interval_ms.or(self.interval_ms),
            max_attempts: overlay.max_attempts.or(self.max_attempts),
            freshness_secs: overlay.freshness_secs.or(self.freshness_secs),
        }
    }
}

impl WaitSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            timeout_ms: overlay.timeout_ms.or(self.timeout_ms),
        }
    }
}

/// Load merged settings (user overrides system).
///
/// `conf_dir` replaces the config home (`PRJ_CONFIG_HOME`, else `.config`
/// under the project root); relative paths resolve against the project root.
pub fn load_notifier_settings(conf_dir: Option<&Path>) -> NotifierSettings {
    let (system_path, user_path) = notifier_settings_paths(conf_dir);
    load_notifier_settings_from_paths(&system_path, &user_path)
}

#[doc(hidden)]
pub fn notifier_settings_paths(conf_dir: Option<&Path>) -> (PathBuf, PathBuf) {
    let root = env_path("PRJ_ROOT")
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let config_home = conf_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| env_path("PRJ_CONFIG_HOME"))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_HOME_RELATIVE_PATH));
    (
        root.join(DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH),
        // `join` keeps an absolute config home as is.
        root.join(config_home).join(DEFAULT_USER_SETTINGS_RELATIVE_PATH),
    )
}

#[doc(hidden)]
pub fn load_notifier_settings_from_paths(system: &Path, user: &Path) -> NotifierSettings {
    load_one(system).merge(load_one(user))
}

/// Absent file means "no overrides"; anything unreadable is logged and skipped.
fn load_one(path: &Path) -> NotifierSettings {
    let parsed = match std::fs::read_to_string(path) {
        Ok(raw) => serde_yaml::from_str::<NotifierSettings>(&raw).context("parse settings yaml"),
        Err(error) if error.kind() == ErrorKind::NotFound => return NotifierSettings::default(),
        Err(error) => Err(error).context("read settings file"),
    };
    parsed.unwrap_or_else(|error| {
        tracing::warn!(
            event = "notifier.settings.ignored",
            path = %path.display(),
            error = %format!("{error:#}"),
            "settings file ignored"
        );
        NotifierSettings::default()
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn env_path(name: &str) -> Option<PathBuf> {
    non_empty(std::env::var(name).ok().as_deref()).map(PathBuf::from)
}
