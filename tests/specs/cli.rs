//! Black-box CLI specs: stdout, stderr and exit codes.

use assert_cmd::Command;

fn hive(state_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("hive").unwrap_or_else(|e| panic!("binary: {e}"));
    cmd.env("HIVE_STATE_DIR", state_dir);
    cmd.env_remove("HIVE_MODEL");
    cmd.env_remove("HIVE_BACKEND_URL");
    cmd
}

fn run(cmd: &mut Command) -> (i32, String, String) {
    let output = cmd.output().unwrap_or_else(|e| panic!("spawn: {e}"));
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

#[test]
fn no_arguments_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run(&mut hive(dir.path()));
    assert_eq!(code, 1);
    assert!(stderr.contains("Usage"));
}

#[test]
fn help_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(hive(dir.path()).arg("--help"));
    assert_eq!(code, 0);
    assert!(stdout.contains("hive"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("sessions"));
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, _) = run(hive(dir.path()).arg("frobnicate"));
    assert_eq!(code, 1);
}

#[test]
fn run_without_a_task_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, _) = run(hive(dir.path()).arg("run"));
    assert_eq!(code, 1);
}

#[test]
fn run_with_invalid_arch_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run(hive(dir.path()).args(["run", "task", "--arch", "ring"]));
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown architecture"));
}

#[test]
fn autoscale_flags_without_auto_scaling_are_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) =
        run(hive(dir.path()).args(["run", "task", "--strategy", "workload"]));
    assert_eq!(code, 1);
    assert!(stderr.contains("--auto-scaling"));
}

#[test]
fn run_with_unreachable_backend_exits_backend_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run(hive(dir.path())
        .args(["run", "say hi"])
        // Nothing listens here.
        .env("HIVE_BACKEND_URL", "http://127.0.0.1:59998")
        .env("HIVE_CALL_TIMEOUT_MS", "300"));
    assert_eq!(code, 3);
    assert!(stderr.contains("backend unavailable"));
}

#[test]
fn sessions_list_on_a_fresh_state_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(hive(dir.path()).args(["sessions", "list"]));
    assert_eq!(code, 0);
    assert!(stdout.contains("no sessions"));
}

#[test]
fn sessions_show_unknown_id_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run(hive(dir.path()).args(["sessions", "show", "s-nope"]));
    assert_eq!(code, 1);
    assert!(stderr.contains("no session matches"));
}

#[test]
fn status_reports_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(hive(dir.path()).arg("status"));
    assert_eq!(code, 0);
    assert!(stdout.contains("0 total"));
}

#[test]
fn stop_agents_with_nothing_running_reports_zero() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(hive(dir.path()).arg("stop-agents"));
    assert_eq!(code, 0);
    assert!(stdout.contains("0 session(s) stopped"));
}

#[test]
fn cleanup_on_a_fresh_state_dir_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(hive(dir.path()).arg("cleanup"));
    assert_eq!(code, 0);
    assert!(stdout.contains("dropped 0 sealed session(s)"));
}
