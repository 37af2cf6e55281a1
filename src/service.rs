//! Lifecycle handles for the network services hosted by the daemon.
use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use strum_macros::Display;
use tracing::{debug, info};

use crate::error::ServiceError;

/// A long-running network service.
pub trait Service: Send + Sync {
    /// Begins accepting work.
    ///
    /// Implementations either return once their listener is bound, or block the caller
    /// until [`Service::stop`] has been called and the accept loop has wound down.
    fn start(&self) -> Result<(), ServiceError>;

    /// Requests that the service stop accepting new work. Must not block.
    fn stop(&self);
}

/// A service whose in-flight work can be awaited.
pub trait Drain: Service {
    /// Stops accepting work and blocks until in-flight work completes or `timeout`
    /// elapses.
    fn drain(&self, timeout: Option<Duration>);
}

/// Lifecycle state tracked by a [`ServiceHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    NotStarted,
    Running,
    Stopping,
    Drained,
}

/// Owns one service and enforces its lifecycle transitions.
///
/// `stop` and `drain` outside the states where they apply are no-ops, and `stop` reaches
/// the underlying service at most once.
pub struct ServiceHandle<S: ?Sized> {
    name: String,
    state: Mutex<ServiceState>,
    service: Arc<S>,
}

/// A handle that is installed once it has been constructed, so code created earlier
/// (the signal router) can reach it.
pub type ServiceSlot<S> = Arc<OnceLock<Arc<ServiceHandle<S>>>>;

impl<S: Service + ?Sized> ServiceHandle<S> {
    pub fn new(name: impl Into<String>, service: Arc<S>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ServiceState::NotStarted),
            service,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        *self.lock()
    }

    /// Starts the service. Blocks for as long as the service's own `start` does.
    pub fn start(&self) -> Result<(), ServiceError> {
        self.start_unless(|| false).map(|_| ())
    }

    /// Starts the service unless `cancelled` reports true. Returns whether it started.
    ///
    /// `cancelled` is evaluated under the state lock, so a concurrent [`ServiceHandle::stop`]
    /// either sees `NotStarted` before the check or `Running` after it.
    pub fn start_unless(&self, cancelled: impl FnOnce() -> bool) -> Result<bool, ServiceError> {
        {
            let mut state = self.lock();
            if *state != ServiceState::NotStarted {
                return Err(ServiceError::AlreadyStarted(self.name.clone()));
            }
            if cancelled() {
                debug!("Not starting {} service, shutdown already requested", self.name);
                return Ok(false);
            }
            *state = ServiceState::Running;
        }

        debug!("Starting {} service", self.name);
        if let Err(err) = self.service.start() {
            *self.lock() = ServiceState::NotStarted;
            return Err(err);
        }
        Ok(true)
    }

    /// Requests a stop if the service is running. Returns whether a stop was issued.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.lock();
            if *state != ServiceState::Running {
                debug!("Ignoring stop for {} service in state {}", self.name, *state);
                return false;
            }
            *state = ServiceState::Stopping;
        }

        info!("Stopping {} service", self.name);
        self.service.stop();
        true
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Drain + ?Sized> ServiceHandle<S> {
    /// Waits for in-flight work to finish. Returns whether a drain was performed.
    pub fn drain(&self, timeout: Option<Duration>) -> bool {
        {
            let state = self.lock();
            if !matches!(*state, ServiceState::Running | ServiceState::Stopping) {
                debug!("Ignoring drain for {} service in state {}", self.name, *state);
                return false;
            }
        }

        info!("Draining {} service", self.name);
        self.service.drain(timeout);
        *self.lock() = ServiceState::Drained;
        true
    }
}
