//! Exit status of the `voxgate` binary under a broken environment.
//!
//! Producers run `voxgate speak` from hooks, where any non-zero status is
//! reported as a hook failure. Other commands should still refuse bad
//! configuration loudly.

use std::path::Path;
use std::process::{Command, Output, Stdio};

fn voxgate(dir: &Path, env: &[(&str, &str)], args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_voxgate"));
    for (key, _) in std::env::vars() {
        if key.starts_with("VOXGATE_") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("RUST_LOG")
        .current_dir(dir)
        .env("VOXGATE_DATA_DIR", dir.join("data"))
        .env("VOXGATE_SOCKET", dir.join("voxgate.sock"))
        .env("VOXGATE_NO_AUTOSTART", "1")
        .envs(env.iter().copied())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output().unwrap()
}

#[test]
fn speak_exits_zero_with_an_invalid_setting() {
    let dir = tempfile::tempdir().unwrap();
    for bad in [
        ("VOXGATE_DEBUG", "maybe"),
        ("VOXGATE_GRANT_TIMEOUT_MS", "soon"),
        ("VOXGATE_QUEUE_CAPACITY", "0"),
    ] {
        let out = voxgate(dir.path(), &[bad], &["speak", "Tests passed"]);
        assert!(out.status.success(), "{bad:?}: {:?}", out.status);
        assert!(out.stdout.is_empty());
    }
    assert!(!dir.path().join("data").exists(), "nothing should have been spoken");
}

#[test]
fn speak_reports_bad_settings_only_when_verbose() {
    let dir = tempfile::tempdir().unwrap();
    let bad = [("VOXGATE_DEBUG", "maybe")];

    let quiet = voxgate(dir.path(), &bad, &["speak", "hello"]);
    assert!(quiet.status.success());
    assert!(quiet.stderr.is_empty());

    let verbose = voxgate(dir.path(), &bad, &["-v", "speak", "hello"]);
    assert!(verbose.status.success());
    assert!(String::from_utf8_lossy(&verbose.stderr).contains("unusable settings"));
}

#[test]
fn other_commands_refuse_an_invalid_setting() {
    let dir = tempfile::tempdir().unwrap();
    let out = voxgate(dir.path(), &[("VOXGATE_DEBUG", "maybe")], &["paths"]);
    assert_eq!(out.status.code(), Some(78));
    assert!(String::from_utf8_lossy(&out.stderr).contains("VOXGATE_DEBUG"));
}
