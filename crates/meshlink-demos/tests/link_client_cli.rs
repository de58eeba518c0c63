//! Runs the link-client binary to check how it handles its argument

use std::path::Path;
use std::process::{Command, Output};

fn loopback_config_dir(dir: &Path) {
    std::fs::write(
        dir.join("config.toml"),
        "[[interfaces]]\nname = \"loopback\"\nlisten = \"127.0.0.1:0\"\n",
    )
    .unwrap();
}

fn run_client(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_link-client"))
        .arg("--config")
        .arg(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_invalid_destination_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    loopback_config_dir(dir.path());

    for destination in ["abcd", "zz112233445566778899aabbccddeeff"] {
        let output = run_client(dir.path(), &[destination]);
        assert!(output.status.success(), "{:?}", output);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Invalid destination entered. Check your input!"), "{}", stdout);
    }
}

#[test]
fn test_missing_destination_prints_help() {
    let dir = tempfile::tempdir().unwrap();
    loopback_config_dir(dir.path());

    let output = run_client(dir.path(), &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage:"));
}
