//! Unit tests for configuration loading and validation.

use std::fs;

use camino::Utf8PathBuf;
use rstest::*;
use tempfile::TempDir;

use vmvault::config::{ConfigError, DEFAULT_BIND_ADDRESS, ServiceConfig};
use vmvault::test_support::{EnvGuard, service_config};
use vmvault::workflow::LatestBackupPolicy;

#[fixture]
fn valid_config() -> ServiceConfig {
    service_config()
}

#[rstest]
fn default_service_config_is_valid(valid_config: ServiceConfig) {
    assert_eq!(valid_config.validate(), Ok(()));
}

#[rstest]
#[case::bind_address(|cfg: &mut ServiceConfig| cfg.bind_address = String::new(), "VMVAULT_BIND_ADDRESS", "bind_address")]
#[case::database_url(|cfg: &mut ServiceConfig| cfg.database_url = String::from("  "), "VMVAULT_DATABASE_URL", "database_url")]
#[case::ssh_bin(|cfg: &mut ServiceConfig| cfg.ssh_bin = String::new(), "VMVAULT_SSH_BIN", "ssh_bin")]
#[case::sshpass_bin(|cfg: &mut ServiceConfig| cfg.sshpass_bin = String::new(), "VMVAULT_SSHPASS_BIN", "sshpass_bin")]
#[case::mount_root(|cfg: &mut ServiceConfig| cfg.backup_mount_root = String::new(), "VMVAULT_BACKUP_MOUNT_ROOT", "backup_mount_root")]
fn blank_required_fields_produce_actionable_errors(
    mut valid_config: ServiceConfig,
    #[case] mutate: fn(&mut ServiceConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);
    let error = valid_config.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("vmvault.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
#[case::zero_connect_timeout(|cfg: &mut ServiceConfig| cfg.ssh_connect_timeout_secs = 0, "ssh_connect_timeout_secs")]
#[case::zero_command_timeout(|cfg: &mut ServiceConfig| cfg.command_timeout_secs = 0, "command_timeout_secs")]
#[case::zero_xapi_timeout(|cfg: &mut ServiceConfig| cfg.xapi_timeout_secs = 0, "xapi_timeout_secs")]
#[case::zero_port(|cfg: &mut ServiceConfig| cfg.ssh_port = 0, "ssh_port")]
#[case::bad_scheme(|cfg: &mut ServiceConfig| cfg.xapi_scheme = String::from("ftp"), "xapi_scheme")]
#[case::bad_origin(|cfg: &mut ServiceConfig| cfg.cors_allow_origin = Some(String::from("http://a\nb")), "cors_allow_origin")]
fn out_of_range_values_are_invalid(
    mut valid_config: ServiceConfig,
    #[case] mutate: fn(&mut ServiceConfig),
    #[case] field: &str,
) {
    mutate(&mut valid_config);
    let error = valid_config.validate().expect_err("validation should fail");
    let ConfigError::Invalid(ref message) = error else {
        panic!("expected Invalid error, got {error:?}");
    };
    assert!(message.contains(field), "error should name {field}: {message}");
}

#[rstest]
#[case(None, None)]
#[case(Some("*"), None)]
#[case(Some("https://ops.example.com"), Some("https://ops.example.com"))]
fn cors_origin_treats_wildcard_as_any(
    mut valid_config: ServiceConfig,
    #[case] configured: Option<&str>,
    #[case] expected: Option<&str>,
) {
    valid_config.cors_allow_origin = configured.map(str::to_owned);
    let origin = valid_config.cors_origin().expect("origin parses");
    assert_eq!(
        origin.as_ref().and_then(|value| value.to_str().ok()),
        expected
    );
}

#[rstest]
fn derived_settings_follow_config(mut valid_config: ServiceConfig) {
    valid_config.backup_mount_root = String::from("/mnt/");
    valid_config.backup_subdirectory = String::from("/exports/");
    valid_config.restore_latest_requires_success = false;
    valid_config.ssh_port = 2222;

    let workflow = valid_config.workflow_settings();
    assert_eq!(workflow.latest_policy, LatestBackupPolicy::LatestAttempt);
    assert_eq!(workflow.layout.directory("sr-1", "vm-1"), "/mnt/sr-1/exports/vm-1");

    let ssh = valid_config.ssh_settings();
    assert_eq!(ssh.port, 2222);
    assert_eq!(ssh.command_timeout.as_secs(), 7200);
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("VMVAULT_SSH_PORT", "2222"),
        ("VMVAULT_RESTORE_LATEST_REQUIRES_SUCCESS", "false"),
    ])
    .await;

    let config = ServiceConfig::load_without_cli_args().expect("config loads");
    assert_eq!(config.ssh_port, 2222);
    assert!(!config.restore_latest_requires_success);
    assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
    assert_eq!(config.validate(), Ok(()));
}

#[tokio::test]
async fn config_file_named_by_env_var_is_loaded() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    let path = root.join("vmvault.toml");
    fs::write(
        &path,
        "bind_address = \"127.0.0.1:6000\"\nbackup_subdirectory = \"exports\"\n",
    )
    .unwrap_or_else(|err| panic!("write config: {err}"));
    let _guard = EnvGuard::set_vars(&[("VMVAULT_CONFIG_PATH", path.as_str())]).await;

    let config = ServiceConfig::load_without_cli_args().expect("config loads");
    assert_eq!(config.bind_address, "127.0.0.1:6000");
    assert_eq!(config.backup_subdirectory, "exports");
    assert_eq!(config.command_timeout_secs, 7200);
}
