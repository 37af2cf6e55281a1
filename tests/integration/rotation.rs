#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use common::{send_signal, spawn_daemon, wait_for_exit, wait_for_log_line, write_config};
use nix::sys::signal::Signal;
use tempfile::tempdir;

#[test]
fn sighup_reopens_renamed_log_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");
    let rotated = dir.join("mailhub.log.1");

    let mut child = spawn_daemon(&config, &log, &[]);
    wait_for_log_line(&log, "smtp listening on");

    fs::rename(&log, &rotated).expect("failed to rename log");
    send_signal(&child, Signal::SIGHUP);
    let fresh = wait_for_log_line(&log, "reopened log file");
    assert!(!fresh.contains("starting..."));

    send_signal(&child, Signal::SIGTERM);
    assert_eq!(
        wait_for_exit(&mut child, Duration::from_secs(10)).code(),
        Some(0)
    );

    let old = fs::read_to_string(&rotated).expect("failed to read rotated log");
    assert!(old.contains("starting..."));
    assert!(!old.contains("Shutdown complete"));
    wait_for_log_line(&log, "Shutdown complete");
}

#[test]
fn sighup_without_log_file_is_ignored() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let pidfile = dir.join("mailhub.pid");

    let mut child = Command::new(assert_cmd::cargo::cargo_bin!("mailhubd"))
        .arg("-pidfile")
        .arg(&pidfile)
        .arg(&config)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn mailhubd");
    common::wait_for_path(&pidfile);
    // Give the daemon time to register its signal handlers.
    std::thread::sleep(Duration::from_millis(500));

    send_signal(&child, Signal::SIGHUP);
    std::thread::sleep(Duration::from_millis(200));
    assert!(child.try_wait().unwrap().is_none(), "daemon exited on SIGHUP");

    send_signal(&child, Signal::SIGTERM);
    assert_eq!(
        wait_for_exit(&mut child, Duration::from_secs(10)).code(),
        Some(0)
    );
}

#[test]
fn fatal_startup_error_lands_in_log_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");
    let pidfile = dir.join("missing/mailhub.pid");

    let mut child = spawn_daemon(&config, &log, &["-pidfile", pidfile.to_str().unwrap()]);
    let status = wait_for_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(1));

    let mut stderr = String::new();
    child
        .stderr
        .take()
        .expect("stderr was piped")
        .read_to_string(&mut stderr)
        .unwrap();
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let content = wait_for_log_line(&log, "Failed to create");
    assert!(content.contains("missing/mailhub.pid"));
}

#[cfg(target_os = "linux")]
fn fd_target(child: &std::process::Child, fd: u32) -> PathBuf {
    fs::read_link(format!("/proc/{}/fd/{fd}", child.id())).expect("failed to read fd link")
}

#[cfg(target_os = "linux")]
#[test]
fn standard_streams_follow_the_log_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path().canonicalize().unwrap();
    let config = write_config(&dir, "5s");
    let log = dir.join("mailhub.log");
    let rotated = dir.join("mailhub.log.1");

    let mut child = spawn_daemon(&config, &log, &[]);
    wait_for_log_line(&log, "smtp listening on");

    assert_eq!(fd_target(&child, 0), Path::new("/dev/null"));
    assert_eq!(fd_target(&child, 1), log);
    assert_eq!(fd_target(&child, 2), log);

    fs::rename(&log, &rotated).expect("failed to rename log");
    assert_eq!(fd_target(&child, 2), rotated);

    send_signal(&child, Signal::SIGHUP);
    wait_for_log_line(&log, "reopened log file");
    assert_eq!(fd_target(&child, 1), log);
    assert_eq!(fd_target(&child, 2), log);

    send_signal(&child, Signal::SIGTERM);
    assert_eq!(
        wait_for_exit(&mut child, Duration::from_secs(10)).code(),
        Some(0)
    );
}
