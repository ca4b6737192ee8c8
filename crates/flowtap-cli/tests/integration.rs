//! Integration tests for the flowtap CLI, exercised through `assert_cmd`
//! the way the teacher's own CLI crate tests its binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn flowtap() -> Command {
    Command::cargo_bin("flowtap").expect("binary built")
}

#[test]
fn help_lists_core_flags() {
    flowtap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--interface"))
        .stdout(predicate::str::contains("--output-dir"))
        .stdout(predicate::str::contains("--ingest-url"))
        .stdout(predicate::str::contains("--sample-rate"))
        .stdout(predicate::str::contains("--witnesses-per-minute"));
}

#[test]
fn version_reports_package_version() {
    flowtap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_sink_destination_is_an_error() {
    flowtap()
        .args(["--interface", "lo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("output-dir").or(predicate::str::contains("ingest-url")));
}

#[test]
fn malformed_tag_is_rejected_before_any_pipeline_starts() {
    flowtap()
        .args(["--output-dir", "/tmp/flowtap-test-archive", "--tag", "no-equals-sign"])
        .assert()
        .failure();
}
