#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};

/// Writes a config that binds every listener to an ephemeral loopback port.
pub fn write_config(dir: &Path, grace_period: &str) -> PathBuf {
    let path = dir.join("mailhub.yaml");
    fs::write(
        &path,
        format!(
            r#"smtp:
  address: "127.0.0.1:0"
  domain: "test.local"
pop3:
  address: "127.0.0.1:0"
  domain: "test.local"
web:
  address: "127.0.0.1:0"
datastore:
  path: "mail"
shutdown:
  grace_period: "{grace_period}"
"#
        ),
    )
    .expect("failed to write config");
    path
}

/// Starts the daemon logging to `log_path`.
pub fn spawn_daemon(config: &Path, log_path: &Path, extra: &[&str]) -> Child {
    Command::new(assert_cmd::cargo::cargo_bin!("mailhubd"))
        .arg("-logfile")
        .arg(log_path)
        .args(extra)
        .arg(config)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn mailhubd")
}

pub fn send_signal(child: &Child, signal: Signal) {
    kill(Pid::from_raw(child.id() as i32), signal).expect("failed to signal mailhubd");
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_log_line(path: &Path, needle: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && content.contains(needle)
        {
            return content;
        }

        if Instant::now() >= deadline {
            let content = fs::read_to_string(path).unwrap_or_default();
            panic!("Timed out waiting for '{needle}' in {:?}:\n{content}", path);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Waits for the daemon to exit, killing it if it does not within `timeout`.
pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll mailhubd") {
            return status;
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("mailhubd did not exit within {timeout:?}");
        }

        thread::sleep(Duration::from_millis(50));
    }
}
