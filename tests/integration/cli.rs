#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use assert_cmd::Command;
use common::{spawn_daemon, wait_for_exit, wait_for_log_line, wait_for_path, write_config};
use nix::sys::signal::Signal;
use predicates::str::contains;
use tempfile::tempdir;

fn mailhubd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mailhubd"))
}

#[test]
fn missing_config_argument_prints_usage() {
    mailhubd()
        .assert()
        .code(1)
        .stderr(contains("mailhubd [options] <conf file>"));
}

#[test]
fn help_exits_zero() {
    mailhubd()
        .arg("-help")
        .assert()
        .success()
        .stdout(contains("-pidfile"));
}

#[test]
fn version_flag_reports_package_version() {
    mailhubd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_flag_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = write_config(temp.path(), "5s");
    mailhubd()
        .arg("-bogus")
        .arg(&config)
        .assert()
        .code(1);
}

#[test]
fn unreadable_config_exits_nonzero() {
    let temp = tempdir().expect("failed to create tempdir");
    mailhubd()
        .arg(temp.path().join("absent.yaml"))
        .assert()
        .code(1)
        .stderr(contains("Failed to parse config"));
}

#[test]
fn malformed_config_exits_nonzero() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("mailhub.yaml");
    fs::write(&config, "smtp: [not, a, mapping\n").expect("failed to write config");

    mailhubd()
        .arg(&config)
        .assert()
        .code(1)
        .stderr(contains("Failed to parse config"));
}

#[test]
fn pidfile_holds_process_id() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");
    let pidfile = dir.join("out.pid");

    let mut child = spawn_daemon(&config, &log, &["-pidfile", pidfile.to_str().unwrap()]);
    wait_for_path(&pidfile);
    wait_for_log_line(&log, "smtp listening on");

    let contents = fs::read_to_string(&pidfile).expect("failed to read pidfile");
    assert_eq!(contents, format!("{}\n", child.id()));

    common::send_signal(&child, Signal::SIGTERM);
    assert!(wait_for_exit(&mut child, Duration::from_secs(10)).success());
    assert!(pidfile.exists(), "pidfile is left in place at exit");
}

#[test]
fn no_pidfile_without_flag() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");

    let mut child = spawn_daemon(&config, &log, &[]);
    wait_for_log_line(&log, "smtp listening on");
    common::send_signal(&child, Signal::SIGTERM);
    assert!(wait_for_exit(&mut child, Duration::from_secs(10)).success());

    let pidfiles: Vec<_> = fs::read_dir(dir)
        .expect("failed to list tempdir")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "pid"))
        .collect();
    assert!(pidfiles.is_empty());
}
