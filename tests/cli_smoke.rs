use assert_cmd::Command;
use serde_json::Value;

fn memharvest(config_dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("memharvest").unwrap();
    cmd.arg("--config")
        .arg(config_dir.path().join("memharvest.yaml"))
        .env_remove("MEMHARVEST_LOCALE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    let output = memharvest(&dir).arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for command in ["export", "status", "watch", "serve", "config"] {
        assert!(text.contains(command), "missing {command} in help");
    }
}

#[test]
fn dry_run_export_prints_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("memories.md");
    let output = memharvest(&dir)
        .args(["--dry-run", "--demo-records", "12", "--output", "json", "export", "--out"])
        .arg(&out)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["count"], 12);
    assert_eq!(body["usage"], "87%");
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(body["markdown"].as_str(), Some(written.as_str()));
}

#[test]
fn config_show_prints_defaults_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = memharvest(&dir)
        .args(["--output", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["start_url"], "https://chatgpt.com/");
    assert_eq!(body["serve"]["port"], 8791);
}
