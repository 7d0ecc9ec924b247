//! Configuration file loading and validation.

use mqtt_session::{ConfigError, SessionConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn test_load_minimal_config() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost:1883"
client_id = "dev-1"
"#,
    );

    let config = SessionConfig::load_from_file(file.path()).expect("config should load");

    assert_eq!(config.broker.url, "mqtt://localhost:1883");
    assert_eq!(config.broker.client_id, "dev-1");
    assert!(config.session.standard_topics.is_empty());
    assert_eq!(config.session.retry_interval_ms, 10_000);
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
[broker]
url = "mqtts://broker.example.com:8883"
client_id = "shelf-server.prod"

[session]
standard_topics = ["shelf/+/status", "shelf/+/battery"]
retry_interval_ms = 5000
"#,
    );

    let config = SessionConfig::load_from_file(file.path()).expect("config should load");

    assert_eq!(
        config.session.standard_topics,
        vec!["shelf/+/status", "shelf/+/battery"]
    );
    assert_eq!(config.session.retry_interval_ms, 5000);
}

#[test]
fn test_missing_file_errors() {
    let result = SessionConfig::load_from_file(std::path::Path::new("/nonexistent/session.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_errors() {
    let file = write_config("this is not toml [[[");
    let result = SessionConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_client_id_rejected_on_load() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost:1883"
client_id = "has spaces"
"#,
    );

    let result = SessionConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidClientId(_))));
}

#[test]
fn test_zero_retry_interval_rejected_on_load() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost:1883"
client_id = "dev-1"

[session]
retry_interval_ms = 0
"#,
    );

    let result = SessionConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_session_built_from_config() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost:1883"
client_id = "dev-1"

[session]
standard_topics = ["shelf/+/status"]
"#,
    );

    let config = SessionConfig::load_from_file(file.path()).unwrap();
    let session = mqtt_session::MqttSession::from_config(&config);

    assert!(!session.is_connected());
}
