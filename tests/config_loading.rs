use std::io::Write;

use graphrun_core::config::AppConfig;
use graphrun_core::error::GraphError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[service]
base_url = "https://workflows.example.com/api"
api_key = "sk-test-key"
token_ttl_secs = 600

[service.retry]
max_retries = 4
initial_backoff_ms = 100

[engine]
max_tool_rounds = 8
default_max_iterations = 3

[sandbox]
program = "python3"
args = ["-u", "runner.py"]
timeout_secs = 5

[log]
log_dir = "/tmp/graphrun-logs"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.service.base_url, "https://workflows.example.com/api");
    assert_eq!(config.service.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.service.token_ttl_secs, 600);
    assert_eq!(config.service.retry.max_retries, 4);
    assert_eq!(config.service.retry.initial_backoff_ms, 100);
    assert_eq!(config.service.retry.max_backoff_ms, 8000);

    assert_eq!(config.engine.max_tool_rounds, 8);
    assert_eq!(config.engine.default_max_iterations, 3);

    let sandbox = config.sandbox.expect("sandbox section");
    assert_eq!(sandbox.program, "python3");
    assert_eq!(sandbox.args, vec!["-u", "runner.py"]);
    assert_eq!(sandbox.timeout_secs, 5);
    assert_eq!(sandbox.max_output_bytes, 1024 * 1024);

    let log = config.log.expect("log section");
    assert!(log.enabled);
    assert_eq!(log.log_dir.as_deref(), Some("/tmp/graphrun-logs"));
}

#[test]
fn test_env_vars_expand_in_file() {
    std::env::set_var("GRAPHRUN_TEST_TOKEN", "tok-123");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[service]\naccess_token = \"${GRAPHRUN_TEST_TOKEN}\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.service.access_token.as_deref(), Some("tok-123"));
    std::env::remove_var("GRAPHRUN_TEST_TOKEN");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/graphrun.toml")).unwrap_err();
    assert!(matches!(err, GraphError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nmax_tool_rounds = \"many\"\n")
        .expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, GraphError::Config(_)));
}
