//! Startup sequencing and ordered shutdown of the hosted services.
//!
//! ```text
//! startup:   data store -> web (background) -> pop3 (background) -> smtp (blocks)
//! SIGTERM:   arm watchdog -> stop web -> stop smtp
//! shutdown:  smtp returns -> drain smtp -> drain pop3 -> exit 0
//! ```
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    config::Config,
    error::DaemonError,
    logs::LogDestination,
    pop3::Pop3Server,
    service::{Drain, Service, ServiceHandle, ServiceSlot},
    signals::SignalRouter,
    smtp::SmtpServer,
    store::DataStore,
    watchdog::{ProcessExit, ShutdownWatchdog},
    web::WebServer,
};

/// Constructs the daemon's collaborators.
pub trait ServiceFactory {
    fn data_store(&self) -> Result<Arc<DataStore>, DaemonError>;
    fn web(&self, store: Arc<DataStore>) -> Result<Arc<dyn Service>, DaemonError>;
    fn retrieval(&self) -> Result<Arc<dyn Drain>, DaemonError>;
    fn submission(&self) -> Result<Arc<dyn Drain>, DaemonError>;
}

/// Builds the real SMTP, POP3 and web services from configuration.
pub struct ConfiguredServices {
    config: Arc<Config>,
}

impl ConfiguredServices {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl ServiceFactory for ConfiguredServices {
    fn data_store(&self) -> Result<Arc<DataStore>, DaemonError> {
        let datastore = &self.config.datastore;
        let store = DataStore::open(&datastore.path, datastore.retention_minutes)?;
        Ok(Arc::new(store))
    }

    fn web(&self, store: Arc<DataStore>) -> Result<Arc<dyn Service>, DaemonError> {
        Ok(Arc::new(WebServer::new(&self.config, store)?))
    }

    fn retrieval(&self) -> Result<Arc<dyn Drain>, DaemonError> {
        Ok(Arc::new(Pop3Server::new(&self.config.pop3)?))
    }

    fn submission(&self) -> Result<Arc<dyn Drain>, DaemonError> {
        Ok(Arc::new(SmtpServer::new(&self.config.smtp)?))
    }
}

/// Owns the service handles and runs the process from startup to exit.
pub struct LifecycleController<F> {
    factory: F,
    logs: LogDestination,
    watchdog: Arc<ShutdownWatchdog>,
    exit: Arc<ProcessExit>,
    drain_timeout: Option<Duration>,
    web: ServiceSlot<dyn Service>,
    submission: ServiceSlot<dyn Drain>,
}

impl<F: ServiceFactory> LifecycleController<F> {
    pub fn new(
        factory: F,
        logs: LogDestination,
        grace_period: Duration,
        drain_timeout: Option<Duration>,
        exit: Arc<ProcessExit>,
    ) -> Self {
        Self {
            factory,
            logs,
            watchdog: Arc::new(ShutdownWatchdog::new(grace_period, Arc::clone(&exit))),
            exit,
            drain_timeout,
            web: Arc::new(OnceLock::new()),
            submission: Arc::new(OnceLock::new()),
        }
    }

    /// A router wired to this controller's services, watchdog and log destination.
    pub fn router(&self) -> SignalRouter {
        SignalRouter::new(
            self.logs.clone(),
            Arc::clone(&self.watchdog),
            Arc::clone(&self.web),
            Arc::clone(&self.submission),
        )
    }

    pub fn watchdog(&self) -> &Arc<ShutdownWatchdog> {
        &self.watchdog
    }

    /// Starts every service, blocks in the mail submission service until it is stopped,
    /// drains, and exits with status 0.
    ///
    /// Errors are startup failures; once services are running, problems are logged and
    /// shutdown continues.
    pub fn run(self) -> Result<(), DaemonError> {
        let store = self.factory.data_store()?;
        info!("Using data store at {}", store.path().display());

        let web = Arc::new(ServiceHandle::new("web", self.factory.web(store)?));
        web.start()?;
        let _ = self.web.set(web);

        let retrieval = ServiceHandle::new("pop3", self.factory.retrieval()?);
        retrieval.start()?;

        let submission = Arc::new(ServiceHandle::new("smtp", self.factory.submission()?));
        let _ = self.submission.set(Arc::clone(&submission));

        if !submission.start_unless(|| self.watchdog.is_armed())? {
            warn!("Shutdown requested before smtp started; skipping start");
        }

        info!("smtp returned, waiting for active connections to finish");
        submission.drain(self.drain_timeout);
        retrieval.drain(self.drain_timeout);

        info!("Shutdown complete");
        self.exit.exit(0);
        Ok(())
    }
}
