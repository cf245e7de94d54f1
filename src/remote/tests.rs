//! Tests for SSH argument construction and failure classification.

use super::*;
use crate::model::Password;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};

#[fixture]
fn settings() -> SshSettings {
    SshSettings {
        ssh_bin: String::from("ssh"),
        sshpass_bin: String::from("sshpass"),
        port: 22,
        connect_timeout: Duration::from_secs(10),
        command_timeout: Duration::from_secs(60),
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
    }
}

#[fixture]
fn target() -> HostTarget {
    HostTarget {
        address: String::from("10.0.0.5"),
        username: String::from("root"),
        password: Password::new("hunter2"),
    }
}

fn args_of(request: &CommandRequest) -> Vec<String> {
    request
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
#[tokio::test]
async fn password_travels_through_environment(settings: SshSettings, target: HostTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = SshExecutor::new(settings, runner.clone());
    let command = RemoteCommand::xe("vm-list");

    executor
        .execute(&target, &command)
        .await
        .expect("scripted success");

    let requests = runner.requests();
    let request = requests.first().expect("one request");
    let args = args_of(request);
    assert_eq!(request.program, "sshpass");
    assert_eq!(args.first().map(String::as_str), Some("-e"));
    assert!(
        !args.iter().any(|arg| arg.contains("hunter2")),
        "password leaked into argv: {args:?}"
    );
    assert_eq!(
        request.envs,
        vec![(String::from("SSHPASS"), String::from("hunter2"))]
    );
    assert_eq!(request.timeout, Duration::from_secs(60));
}

#[rstest]
#[tokio::test]
async fn command_line_ends_with_destination_and_command(
    settings: SshSettings,
    target: HostTarget,
) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = SshExecutor::new(settings, runner.clone());
    let command = RemoteCommand::xe("vm-start").param("uuid", "abc");

    executor
        .execute(&target, &command)
        .await
        .expect("scripted success");

    let args = args_of(&runner.requests()[0]);
    assert!(args.contains(&String::from("ConnectTimeout=10")), "{args:?}");
    assert!(args.contains(&String::from("LogLevel=ERROR")), "{args:?}");
    assert!(args.contains(&String::from("StrictHostKeyChecking=no")), "{args:?}");
    assert!(
        args.contains(&String::from("UserKnownHostsFile=/dev/null")),
        "{args:?}"
    );
    let tail: Vec<&str> = args.iter().rev().take(2).map(String::as_str).collect();
    assert_eq!(tail, vec!["xe vm-start uuid=abc", "root@10.0.0.5"]);
}

/// Stands in for `ssh`: it prints the known-hosts notice unless told to
/// keep quiet, the way OpenSSH does with `UserKnownHostsFile=/dev/null`.
const NOISY_SSH: &str = r#"case "$*" in
  *LogLevel=ERROR*) ;;
  *) echo "Warning: Permanently added '10.0.0.5' (ED25519) to the list of known hosts." >&2 ;;
esac
printf 'snap-1\n'
"#;

#[rstest]
#[tokio::test]
async fn default_settings_keep_ssh_notices_out_of_stderr(
    settings: SshSettings,
    target: HostTarget,
) {
    let dir = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let script = dir.path().join("ssh");
    std::fs::write(&script, NOISY_SSH).unwrap_or_else(|err| panic!("write script: {err}"));
    // `sh -e <script> ...` mirrors `sshpass -e <ssh> ...`.
    let executor = SshExecutor::with_process_runner(SshSettings {
        sshpass_bin: String::from("sh"),
        ssh_bin: script.to_string_lossy().into_owned(),
        ..settings
    });

    let output = executor
        .execute(&target, &RemoteCommand::xe("vm-snapshot"))
        .await
        .expect("script runs");

    assert!(output.is_clean(), "{output:?}");
    assert_eq!(output.stdout.trim(), "snap-1");
}

#[rstest]
#[tokio::test]
async fn strict_host_checking_omits_override(settings: SshSettings, target: HostTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let executor = SshExecutor::new(
        SshSettings {
            strict_host_key_checking: true,
            ..settings
        },
        runner.clone(),
    );

    executor
        .execute(&target, &RemoteCommand::xe("vm-list"))
        .await
        .expect("scripted success");

    let args = args_of(&runner.requests()[0]);
    assert!(!args.contains(&String::from("StrictHostKeyChecking=no")));
}

#[rstest]
#[case(Some(5), "", "authentication")]
#[case(Some(6), "", "host key")]
#[case(Some(255), "ssh: connect to host 10.0.0.5 port 22: No route to host", "No route")]
#[case(Some(255), "", "status 255")]
#[case(Some(5), "Permission denied, please try again.", "authentication")]
#[tokio::test]
async fn channel_failures_become_errors(
    settings: SshSettings,
    target: HostTarget,
    #[case] code: Option<i32>,
    #[case] stderr: &str,
    #[case] expected: &str,
) {
    let runner = ScriptedRunner::new();
    runner.push_output(code, "", stderr);
    let executor = SshExecutor::new(settings, runner);

    let err = executor
        .execute(&target, &RemoteCommand::xe("vm-list"))
        .await
        .expect_err("channel failure");
    assert!(err.to_string().contains(expected), "unexpected error: {err}");
}

#[rstest]
#[tokio::test]
async fn command_failures_are_returned_as_output(settings: SshSettings, target: HostTarget) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(1), "", "The uuid you supplied was invalid.");
    let executor = SshExecutor::new(settings, runner);

    let output = executor
        .execute(&target, &RemoteCommand::xe("vm-export"))
        .await
        .expect("command ran");
    assert!(!output.is_clean());
    assert_eq!(output.stderr, "The uuid you supplied was invalid.");
}

#[rstest]
#[case(Some(5), "The server failed to handle your request.")]
#[case(Some(6), "VM_BAD_POWER_STATE")]
#[case(Some(255), "The uuid you supplied was invalid.")]
#[tokio::test]
async fn remote_exit_codes_matching_client_codes_stay_command_failures(
    settings: SshSettings,
    target: HostTarget,
    #[case] code: Option<i32>,
    #[case] stderr: &str,
) {
    let runner = ScriptedRunner::new();
    runner.push_output(code, "", stderr);
    let executor = SshExecutor::new(settings, runner);

    let output = executor
        .execute(&target, &RemoteCommand::xe("vm-export"))
        .await
        .expect("the remote command ran");
    assert_eq!(output.code, code);
    assert_eq!(output.stderr, stderr);
}

#[rstest]
#[tokio::test]
async fn timeouts_propagate(settings: SshSettings, target: HostTarget) {
    let runner = ScriptedRunner::new();
    runner.push_error(RemoteError::Timeout { seconds: 60 });
    let executor = SshExecutor::new(settings, runner);

    let err = executor
        .execute(&target, &RemoteCommand::xe("vm-export"))
        .await
        .expect_err("timeout");
    assert_eq!(err, RemoteError::Timeout { seconds: 60 });
}

#[rstest]
#[case("10.0.0.5", "10.0.0.5")]
#[case("10.0.0.5:8443", "10.0.0.5")]
#[case("xen01.lab:443", "xen01.lab")]
#[case("xen01.lab", "xen01.lab")]
#[case("[fe80::1]:443", "fe80::1")]
#[case("fe80::1", "fe80::1")]
fn ssh_host_drops_control_plane_port(#[case] address: &str, #[case] expected: &str) {
    assert_eq!(ssh_host(address), expected);
}
