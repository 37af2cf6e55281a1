//! Forced-exit fallback for a stalled shutdown.
use std::{
    fmt, process,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::{debug, error};

/// Exit status used when the grace period elapses before a clean shutdown.
pub const FORCED_EXIT_STATUS: i32 = 124;

/// Single point through which the process exits.
///
/// The first call decides the exit status. In production that call terminates the
/// process, so whichever of the normal shutdown path and the watchdog gets there first
/// wins; [`ProcessExit::recording`] keeps the process alive and only remembers the
/// status.
pub struct ProcessExit {
    status: OnceLock<i32>,
    terminate: Box<dyn Fn(i32) + Send + Sync>,
}

impl ProcessExit {
    /// Exits via [`std::process::exit`].
    pub fn process() -> Self {
        Self {
            status: OnceLock::new(),
            terminate: Box::new(exit_process),
        }
    }

    /// Records the first status without exiting.
    pub fn recording() -> Self {
        Self {
            status: OnceLock::new(),
            terminate: Box::new(|_| {}),
        }
    }

    /// Exits with `code` unless an exit has already been decided. Returns whether this
    /// call decided the status.
    pub fn exit(&self, code: i32) -> bool {
        self.exit_with(code, || {})
    }

    /// Like [`ProcessExit::exit`], running `decided` just before terminating, and only if
    /// this call decided the status.
    pub fn exit_with(&self, code: i32, decided: impl FnOnce()) -> bool {
        if self.status.set(code).is_err() {
            return false;
        }
        decided();
        (self.terminate)(code);
        true
    }

    /// The decided exit status, if any.
    pub fn status(&self) -> Option<i32> {
        self.status.get().copied()
    }
}

impl fmt::Debug for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessExit")
            .field("status", &self.status())
            .finish()
    }
}

fn exit_process(code: i32) {
    process::exit(code)
}

/// One-shot timer that forces the process down once the grace period runs out.
///
/// There is no cancel: a clean exit through the same [`ProcessExit`] simply gets there
/// first.
#[derive(Debug)]
pub struct ShutdownWatchdog {
    grace: Duration,
    armed: AtomicBool,
    exit: Arc<ProcessExit>,
}

impl ShutdownWatchdog {
    pub fn new(grace: Duration, exit: Arc<ProcessExit>) -> Self {
        Self {
            grace,
            armed: AtomicBool::new(false),
            exit,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Starts the timer. Only the first call does anything; returns whether this call
    /// armed it.
    pub fn arm(&self) -> bool {
        if self
            .armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        debug!("Shutdown watchdog armed for {:?}", self.grace);
        let grace = self.grace;
        let exit = Arc::clone(&self.exit);
        thread::spawn(move || {
            thread::sleep(grace);
            exit.exit_with(FORCED_EXIT_STATUS, || {
                error!("Clean shutdown timed out after {grace:?}, forcing exit")
            });
        });
        true
    }
}
