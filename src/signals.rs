//! OS signal routing.
//!
//! Signals are forwarded into an mpsc channel by [`listen`] and consumed one at a time,
//! in arrival order, by a [`SignalRouter`] running on its own thread.
use std::{
    io,
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
};

use nix::sys::signal::Signal;
use signal_hook::{
    consts::{SIGHUP, SIGTERM},
    iterator::{Handle, Signals},
};
use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::{
    logs::{LogDestination, Rotation},
    service::{Drain, Service, ServiceSlot},
    watchdog::ShutdownWatchdog,
};

/// Orchestration action derived from an OS signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LifecycleEvent {
    /// `SIGHUP`: reopen the log file.
    Reload,
    /// `SIGTERM`: begin graceful shutdown.
    Terminate,
}

impl LifecycleEvent {
    pub fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGHUP => Some(LifecycleEvent::Reload),
            SIGTERM => Some(LifecycleEvent::Terminate),
            _ => None,
        }
    }
}

/// Registers for `SIGHUP` and `SIGTERM` and forwards each delivery to `events`.
///
/// Returns a handle that unregisters the listener when closed, and the forwarding
/// thread. The thread exits once the handle is closed or the receiver is dropped.
pub fn listen(
    events: mpsc::Sender<LifecycleEvent>,
) -> io::Result<(Handle, JoinHandle<()>)> {
    let mut signals = Signals::new([SIGHUP, SIGTERM])?;
    let handle = signals.handle();

    let forwarder = thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            for raw in signals.forever() {
                let name = Signal::try_from(raw)
                    .map(|signal| signal.as_str())
                    .unwrap_or("unknown");
                let Some(event) = LifecycleEvent::from_signal(raw) else {
                    continue;
                };
                debug!("Received {name}, queueing {event}");
                if events.send(event).is_err() {
                    break;
                }
            }
        })?;

    Ok((handle, forwarder))
}

/// Single consumer of [`LifecycleEvent`]s.
pub struct SignalRouter {
    logs: LogDestination,
    watchdog: Arc<ShutdownWatchdog>,
    web: ServiceSlot<dyn Service>,
    submission: ServiceSlot<dyn Drain>,
}

impl SignalRouter {
    pub fn new(
        logs: LogDestination,
        watchdog: Arc<ShutdownWatchdog>,
        web: ServiceSlot<dyn Service>,
        submission: ServiceSlot<dyn Drain>,
    ) -> Self {
        Self {
            logs,
            watchdog,
            web,
            submission,
        }
    }

    /// Processes events until every sender has been dropped.
    pub fn run(self, events: mpsc::Receiver<LifecycleEvent>) {
        for event in events {
            self.handle(event);
        }
        debug!("Signal router exiting");
    }

    /// Runs the router on a dedicated thread.
    pub fn spawn(
        self,
        events: mpsc::Receiver<LifecycleEvent>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("signal-router".into())
            .spawn(move || self.run(events))
    }

    pub fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Reload => self.reload(),
            LifecycleEvent::Terminate => self.terminate(),
        }
    }

    fn reload(&self) {
        match self.logs.rotate() {
            Ok(Rotation::Reopened(path)) => {
                info!("Received SIGHUP, reopened log file {}", path.display())
            }
            Ok(Rotation::NotConfigured) => {
                info!("Ignoring SIGHUP, log file not configured")
            }
            Err(err) => error!("Log rotation failed: {err}"),
        }
    }

    fn terminate(&self) {
        if !self.watchdog.arm() {
            warn!("Received SIGTERM, shutdown already in progress");
            return;
        }
        info!(
            "Received SIGTERM, shutting down (forced exit in {:?})",
            self.watchdog.grace()
        );

        match self.web.get() {
            Some(web) => {
                web.stop();
            }
            None => debug!("Web service not running during shutdown"),
        }

        match self.submission.get() {
            Some(submission) => {
                submission.stop();
            }
            None => error!("Mail submission service was not initialized during shutdown"),
        }
    }
}
