//! Log destination management and rotation.
//!
//! A [`LogDestination`] owns the single active sink. Every formatted log event is written
//! under the destination's lock, and [`LogDestination::rotate`] installs the reopened file
//! under that same lock, so an event lands entirely in the old file or entirely in the
//! new one.
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing_subscriber::fmt::MakeWriter;

use crate::error::LogError;

/// Where log output is sent, as selected with `-logfile`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error (the default).
    #[default]
    Stderr,
    /// Standard output.
    Stdout,
    /// A file opened in create-or-append mode.
    File(PathBuf),
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Stderr => write!(f, "stderr"),
            LogTarget::Stdout => write!(f, "stdout"),
            LogTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for LogTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("log file cannot be empty".into()),
            "stderr" => Ok(LogTarget::Stderr),
            "stdout" => Ok(LogTarget::Stdout),
            path => Ok(LogTarget::File(PathBuf::from(path))),
        }
    }
}

/// Result of a rotation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// The configured file was reopened and is now receiving output.
    Reopened(PathBuf),
    /// Output goes to a standard stream; there is nothing to rotate.
    NotConfigured,
}

enum Sink {
    Stderr,
    Stdout,
    File(File),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stderr => io::stderr().lock().write(buf),
            Sink::Stdout => io::stdout().lock().write(buf),
            Sink::File(file) => file.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Sink::Stderr => io::stderr().lock().write_all(buf),
            Sink::Stdout => io::stdout().lock().write_all(buf),
            Sink::File(file) => file.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stderr => io::stderr().flush(),
            Sink::Stdout => io::stdout().flush(),
            Sink::File(file) => file.flush(),
        }
    }
}

struct State {
    sink: Sink,
    path: Option<PathBuf>,
    redirect_stdio: bool,
}

/// Shared handle to the process log sink.
///
/// Clones refer to the same sink. The destination implements [`MakeWriter`] so it can be
/// handed directly to a `tracing_subscriber::fmt` subscriber.
#[derive(Clone)]
pub struct LogDestination {
    state: Arc<Mutex<State>>,
}

impl Default for LogDestination {
    fn default() -> Self {
        Self::stderr()
    }
}

impl LogDestination {
    /// A destination writing to standard error.
    pub fn stderr() -> Self {
        Self::from_state(State {
            sink: Sink::Stderr,
            path: None,
            redirect_stdio: false,
        })
    }

    /// Installs the sink described by `target`.
    ///
    /// With `redirect_stdio` set and a file target, the process's standard output and
    /// error are pointed at the log file and standard input at `/dev/null`, so writes that
    /// bypass the logger still end up in the file. Rotation repeats the redirection for
    /// each reopened file.
    pub fn open(target: &LogTarget, redirect_stdio: bool) -> Result<Self, LogError> {
        let state = match target {
            LogTarget::Stderr => State {
                sink: Sink::Stderr,
                path: None,
                redirect_stdio: false,
            },
            LogTarget::Stdout => State {
                sink: Sink::Stdout,
                path: None,
                redirect_stdio: false,
            },
            LogTarget::File(path) => {
                let file = open_append(path)?;
                if redirect_stdio {
                    close_stdin().map_err(LogError::Redirect)?;
                    point_stdio_at(&file).map_err(LogError::Redirect)?;
                }
                State {
                    sink: Sink::File(file),
                    path: Some(path.clone()),
                    redirect_stdio,
                }
            }
        };

        Ok(Self::from_state(state))
    }

    fn from_state(state: State) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// The configured log file, if output goes to a file.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    /// Whether output goes to a file.
    pub fn is_file(&self) -> bool {
        self.lock().path.is_some()
    }

    /// Closes the current log file and reopens the configured path.
    ///
    /// The new file is opened before the old one is released; if opening fails the
    /// previous handle stays installed and the error is returned. No logging happens
    /// here because the subscriber writes through this destination's lock.
    pub fn rotate(&self) -> Result<Rotation, LogError> {
        let mut state = self.lock();
        let Some(path) = state.path.clone() else {
            return Ok(Rotation::NotConfigured);
        };

        let file = open_append(&path)?;
        if state.redirect_stdio {
            point_stdio_at(&file).map_err(LogError::Redirect)?;
        }

        let previous = mem::replace(&mut state.sink, Sink::File(file));
        drop(state);
        drop(previous);

        Ok(Rotation::Reopened(path))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writer handed out per log event.
pub struct DestinationWriter<'a> {
    destination: &'a LogDestination,
}

impl Write for DestinationWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.destination.lock().sink.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.destination.lock().sink.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.destination.lock().sink.flush()
    }
}

impl<'a> MakeWriter<'a> for LogDestination {
    type Writer = DestinationWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        DestinationWriter { destination: self }
    }
}

fn open_append(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn point_stdio_at(file: &File) -> io::Result<()> {
    point_fds_at(file.as_raw_fd(), &[libc::STDOUT_FILENO, libc::STDERR_FILENO])
}

/// Duplicates `fd` onto every target. All targets move or none do: if one fails, the
/// targets already moved are restored to what they pointed at before.
fn point_fds_at(fd: RawFd, targets: &[RawFd]) -> io::Result<()> {
    let mut moved: Vec<(RawFd, OwnedFd)> = Vec::with_capacity(targets.len());
    for &target in targets {
        let backup = unsafe { libc::dup(target) };
        if backup < 0 {
            let err = io::Error::last_os_error();
            restore_fds(&moved);
            return Err(err);
        }
        let backup = unsafe { OwnedFd::from_raw_fd(backup) };

        if unsafe { libc::dup2(fd, target) } < 0 {
            let err = io::Error::last_os_error();
            restore_fds(&moved);
            return Err(err);
        }
        moved.push((target, backup));
    }
    Ok(())
}

fn restore_fds(moved: &[(RawFd, OwnedFd)]) {
    for (target, backup) in moved.iter().rev() {
        unsafe { libc::dup2(backup.as_raw_fd(), *target) };
    }
}

fn close_stdin() -> io::Result<()> {
    let devnull = File::open("/dev/null")?;
    if unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
