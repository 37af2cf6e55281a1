#[path = "common/mod.rs"]
mod common;

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpStream,
    thread,
    time::Duration,
};

use common::{send_signal, spawn_daemon, wait_for_exit, wait_for_log_line, write_config};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use regex::Regex;
use tempfile::tempdir;

fn smtp_address(log: &str) -> String {
    let re = Regex::new(r"smtp listening on (\S+)").unwrap();
    re.captures(log)
        .map(|caps| caps[1].to_string())
        .expect("smtp address missing from log")
}

#[test]
fn sigterm_exits_cleanly() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");

    let mut child = spawn_daemon(&config, &log, &[]);
    wait_for_log_line(&log, "smtp listening on");

    send_signal(&child, Signal::SIGTERM);
    let status = wait_for_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));

    let content = wait_for_log_line(&log, "Shutdown complete");
    assert!(content.contains("Received SIGTERM"));
    assert!(dir.join("mail").is_dir());
}

#[test]
fn open_sessions_are_told_to_go_away() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");

    let mut child = spawn_daemon(&config, &log, &[]);
    let content = wait_for_log_line(&log, "smtp listening on");
    let addr = smtp_address(&content);

    let mut session = TcpStream::connect(&addr).expect("failed to connect to smtp");
    session
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reader = BufReader::new(session.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("220 test.local"));

    session.write_all(b"HELO client\r\n").unwrap();
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("250"));

    send_signal(&child, Signal::SIGTERM);
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("421"), "unexpected reply: {line}");

    let status = wait_for_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[test]
fn repeated_sigterm_still_exits_cleanly() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(dir, "5s");
    let log = dir.join("mailhub.log");

    let mut child = spawn_daemon(&config, &log, &[]);
    wait_for_log_line(&log, "smtp listening on");

    send_signal(&child, Signal::SIGTERM);
    // The daemon may already be gone by the second signal.
    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    thread::sleep(Duration::from_millis(10));

    let status = wait_for_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
    let content = wait_for_log_line(&log, "Shutdown complete");
    assert_eq!(content.matches("Shutdown complete").count(), 1);
}
