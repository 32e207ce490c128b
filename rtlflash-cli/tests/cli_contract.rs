//! Integration tests for core CLI contract behavior.

use predicates::prelude::*;

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("rtlflash").expect("binary should build")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rtlflash"))
        .stdout(predicate::str::contains("--firmware"))
        .stdout(predicate::str::contains("--image"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rtlflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn conflicting_transports_are_rejected() {
    let mut cmd = cli_cmd();
    cmd.args(["-T", "/dev/ttyUSB0", "-H", "3285:0609"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used"));
}

#[test]
fn usb_and_hid_flags_conflict() {
    let mut cmd = cli_cmd();
    cmd.args(["-U", "3285:0609,0", "-H", "3285:0609"])
        .assert()
        .failure();
}

#[test]
fn malformed_usb_spec_is_rejected() {
    let mut cmd = cli_cmd();
    cmd.args(["--quiet", "-U", "not-a-spec"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vid:pid"));
}
