use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn svcwatch() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("svcwatch"));
    cmd.env_remove("SVCWATCH_SENDER")
        .env_remove("SVCWATCH_PASSWORD")
        .env_remove("SVCWATCH_RECIPIENT")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    svcwatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn validate_accepts_json_config() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("config.json");
    fs::write(
        &config,
        r#"{"services": [{"name": "nginx", "dependencies": ["network-online.target"]}], "monitoring_interval_seconds": 15}"#,
    )
    .unwrap();

    svcwatch()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 service(s), checked every 15s"));
}

#[test]
fn validate_rejects_dependency_cycles() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("services.yaml");
    fs::write(
        &config,
        r#"
services:
  - name: a
    dependencies: [b]
  - name: b
    dependencies: [a]
"#,
    )
    .unwrap();

    svcwatch()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Detected dependency cycle: a -> b -> a"));
}

#[test]
fn check_with_missing_config_reports_error_and_succeeds() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("absent.yaml");

    svcwatch()
        .arg("check")
        .arg("--json")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"config_error\""))
        .stdout(predicate::str::contains("\"interval_seconds\": 60"))
        .stdout(predicate::str::contains("\"services\": []"));
}

#[test]
fn check_with_empty_service_list_probes_nothing() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("services.yaml");
    fs::write(&config, "monitoring_interval_seconds: 10\nservices: []\n").unwrap();

    svcwatch()
        .arg("check")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Checked 0 service(s)"));
}

#[test]
fn partial_credentials_fail_fast() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("services.yaml");
    fs::write(&config, "services: []\n").unwrap();

    svcwatch()
        .arg("check")
        .arg("--config")
        .arg(&config)
        .arg("--sender")
        .arg("ops@example.com")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be given together"));
}

#[test]
fn log_file_receives_records() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("services.yaml");
    let log = temp.path().join("service_monitor.log");
    fs::write(&config, "services: []\n").unwrap();

    svcwatch()
        .arg("check")
        .arg("--config")
        .arg(&config)
        .arg("--log-file")
        .arg(&log)
        .arg("--log-level")
        .arg("debug")
        .assert()
        .success();

    let content = fs::read_to_string(&log).expect("log file written");
    assert!(content.contains("No mail credentials supplied"));
}
