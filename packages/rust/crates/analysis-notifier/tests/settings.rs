#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use analysis_notifier::{PollConfig, ReconnectPolicy, load_notifier_settings_from_paths};

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(path, content).expect("write file");
}

#[test]
fn user_settings_override_system_field_by_field() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let system = tmp.path().join("packages/conf/notifier.yaml");
    let user = tmp.path().join(".config/analysis-notifier/settings.yaml");
    write_file(
        &system,
        r"
push:
  url: ws://scan.internal:8080/ws
  max_reconnect_attempts: 3
  base_delay_ms: 500
poll:
  interval_ms: 1000
  max_attempts: 10
wait:
  timeout_ms: 15000
",
    );
    write_file(
        &user,
        r"
push:
  max_reconnect_attempts: 8
poll:
  freshness_secs: 120
",
    );

    let settings = load_notifier_settings_from_paths(&system, &user);

    assert_eq!(settings.push_url(), "ws://scan.internal:8080/ws");
    assert_eq!(
        settings.reconnect_policy(),
        ReconnectPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    );
    assert_eq!(
        settings.poll_config(),
        PollConfig {
            interval: Duration::from_millis(1_000),
            max_attempts: 10,
            freshness: Duration::from_secs(120),
        }
    );
    assert_eq!(settings.wait_timeout(), Duration::from_millis(15_000));
}

#[test]
fn missing_files_fall_back_to_defaults() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let settings = load_notifier_settings_from_paths(
        &tmp.path().join("absent/system.yaml"),
        &tmp.path().join("absent/user.yaml"),
    );

    assert_eq!(settings.push_url(), "ws://localhost:8080/ws");
    assert_eq!(settings.reconnect_policy(), ReconnectPolicy::default());
    assert_eq!(settings.poll_config(), PollConfig::default());
    assert_eq!(settings.wait_timeout(), Duration::from_secs(60));
}

#[test]
fn malformed_user_file_is_ignored() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let system = tmp.path().join("system.yaml");
    let user = tmp.path().join("user.yaml");
    write_file(
        &system,
        r"
history:
  api_base: http://history.internal/api
  request_timeout_secs: 3
",
    );
    write_file(&user, "push: [not, a, map");

    let settings = load_notifier_settings_from_paths(&system, &user);

    assert_eq!(
        settings.history.api_base.as_deref(),
        Some("http://history.internal/api")
    );
    assert_eq!(settings.history.request_timeout_secs, Some(3));
    assert_eq!(settings.push_url(), "ws://localhost:8080/ws");
}
