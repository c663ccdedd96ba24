//! CLI behaviour of the agent binary.
use assert_cmd::prelude::*;
use std::process::Command;
use std::time::Duration;

#[test]
fn help_prints_usage_and_exits_zero() {
    let out = Command::cargo_bin("portreaper_agent")
        .expect("bin")
        .arg("--help")
        .output()
        .expect("run agent");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Usage:"), "{stdout}");
    assert!(stdout.contains("--port"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let out = Command::cargo_bin("portreaper_agent")
        .expect("bin")
        .arg("--enableSSL")
        .output()
        .expect("run agent");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unexpected argument"));
}

#[test]
fn starts_with_short_and_long_port_flags() {
    let dir = tempfile::tempdir().expect("tempdir");
    for args in [["-p", "0"], ["--port", "0"]] {
        let mut child = Command::cargo_bin("portreaper_agent")
            .expect("bin")
            .args(args)
            .env("PORTREAPER_LOG_FILE", dir.path().join("audit.log"))
            .spawn()
            .expect("spawn agent");
        std::thread::sleep(Duration::from_millis(150));
        // still serving: no early exit on a valid command line
        assert!(child.try_wait().expect("poll").is_none());
        let _ = child.kill();
        let _ = child.wait();
    }
}
