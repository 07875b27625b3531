//! Configuration loading from TOML files

use mqrpc::config::{ConfigError, ServiceConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_full_config_loads() {
    let file = write_config(
        r#"
        [client]
        id = "sensor-kitchen-1"

        [broker]
        url = "mqtts://broker.example.com:8883"
        username_env = "TEST_MQRPC_USER"
        password_env = "TEST_MQRPC_PASS"
        keep_alive_secs = 30

        [flow]
        publish_rate = 25.0
        process_rate = 10.0
        queue_capacity = 128
        default_timeout_secs = 10

        [topics]
        root = "/iot/lab"
        "#,
    );

    let config = ServiceConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.client.id, "sensor-kitchen-1");
    assert_eq!(config.broker.url, "mqtts://broker.example.com:8883");
    assert_eq!(config.broker.keep_alive_secs, 30);
    assert_eq!(config.flow.publish_rate, 25.0);
    assert_eq!(config.flow.queue_capacity, 128);
    assert_eq!(config.topics.root, "/iot/lab");
}

#[test]
fn test_minimal_config_fills_defaults() {
    let file = write_config(
        r#"
        [client]
        id = "minimal"

        [broker]
        url = "mqtt://localhost:1883"
        "#,
    );

    let config = ServiceConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.flow.publish_rate, 100.0);
    assert_eq!(config.flow.process_rate, 50.0);
    assert_eq!(config.flow.queue_capacity, 64);
    assert_eq!(config.flow.default_timeout_secs, 5);
    assert_eq!(config.topics.root, "/mqrpc");
    assert_eq!(config.broker.keep_alive_secs, 60);
    assert!(config.broker.username_env.is_none());
}

#[test]
fn test_missing_file_is_io_error() {
    let result = ServiceConfig::load_from_file("/nonexistent/mqrpc.toml");
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_unparseable_toml_is_parse_error() {
    let file = write_config("this is not toml [[[");
    let result = ServiceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_bad_broker_scheme_rejected_on_load() {
    let file = write_config(
        r#"
        [client]
        id = "c"

        [broker]
        url = "amqp://localhost:5672"
        "#,
    );

    let result = ServiceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_invalid_client_id_rejected_on_load() {
    let file = write_config(
        r#"
        [client]
        id = "has spaces/and/slashes"

        [broker]
        url = "mqtt://localhost:1883"
        "#,
    );

    let result = ServiceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_zero_queue_capacity_rejected_on_load() {
    let file = write_config(
        r#"
        [client]
        id = "c"

        [broker]
        url = "mqtt://localhost:1883"

        [flow]
        queue_capacity = 0
        "#,
    );

    let result = ServiceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_credentials_resolved_from_environment() {
    let file = write_config(
        r#"
        [client]
        id = "c"

        [broker]
        url = "mqtt://localhost:1883"
        username_env = "MQRPC_TEST_CRED_USER"
        password_env = "MQRPC_TEST_CRED_PASS"
        "#,
    );

    let config = ServiceConfig::load_from_file(file.path()).unwrap();

    std::env::set_var("MQRPC_TEST_CRED_USER", "alice");
    std::env::set_var("MQRPC_TEST_CRED_PASS", "s3cret");
    assert_eq!(
        config.broker_credentials(),
        Some(("alice".to_string(), "s3cret".to_string()))
    );

    std::env::remove_var("MQRPC_TEST_CRED_USER");
    std::env::remove_var("MQRPC_TEST_CRED_PASS");
}

#[test]
fn test_missing_credential_env_means_anonymous() {
    let file = write_config(
        r#"
        [client]
        id = "c"

        [broker]
        url = "mqtt://localhost:1883"
        username_env = "MQRPC_TEST_CRED_UNSET"
        "#,
    );

    let config = ServiceConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.broker_credentials(), None);
}
