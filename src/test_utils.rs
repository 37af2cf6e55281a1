//! Recording fakes for exercising the lifecycle without opening sockets.
#![allow(missing_docs)]
use std::{
    io,
    path::PathBuf,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{DaemonError, ServiceError},
    lifecycle::ServiceFactory,
    service::{Drain, Service},
    store::DataStore,
};

/// Ordered record of calls made against a group of fakes.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Service double that counts calls and can block in `start` until stopped.
pub struct FakeService {
    name: String,
    journal: Journal,
    blocking: bool,
    fail_start: bool,
    drain_delay: Duration,
    starts: AtomicUsize,
    stops: AtomicUsize,
    drains: AtomicUsize,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self::named("fake", Journal::default())
    }

    pub fn named(name: &str, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            journal,
            blocking: false,
            fail_start: false,
            drain_delay: Duration::ZERO,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            drains: AtomicUsize::new(0),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    /// `start` blocks until `stop` is called.
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    pub fn start_calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn drain_calls(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }

    /// Polls until `start` has been entered at least once.
    pub fn wait_until_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.start_calls() > 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn record(&self, call: &str) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}:{call}", self.name));
    }
}

impl Service for FakeService {
    fn start(&self) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.record("start");
        if self.fail_start {
            return Err(ServiceError::Listener {
                service: self.name.clone(),
                source: io::Error::other("refused by test"),
            });
        }

        if self.blocking {
            let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
            while !*stopped {
                stopped = self
                    .wake
                    .wait(stopped)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            self.record("returned");
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.record("stop");
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }
}

impl Drain for FakeService {
    fn drain(&self, _timeout: Option<Duration>) {
        self.drains.fetch_add(1, Ordering::SeqCst);
        if !self.drain_delay.is_zero() {
            thread::sleep(self.drain_delay);
        }
        self.record("drain");
    }
}

/// Factory producing the three fakes on a shared journal.
pub struct FakeServices {
    pub web: Arc<FakeService>,
    pub retrieval: Arc<FakeService>,
    pub submission: Arc<FakeService>,
    pub journal: Journal,
    store_root: PathBuf,
    fail_store: bool,
}

impl FakeServices {
    /// Fakes whose mail-submission service blocks until stopped, like the real one.
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        let journal = Journal::default();
        Self {
            web: Arc::new(FakeService::named("web", journal.clone())),
            retrieval: Arc::new(FakeService::named("pop3", journal.clone())),
            submission: Arc::new(FakeService::named("smtp", journal.clone()).blocking()),
            journal,
            store_root: store_root.into(),
            fail_store: false,
        }
    }

    pub fn with_submission(mut self, submission: FakeService) -> Self {
        self.submission = Arc::new(submission);
        self
    }

    pub fn with_retrieval(mut self, retrieval: FakeService) -> Self {
        self.retrieval = Arc::new(retrieval);
        self
    }

    /// Makes `data_store` fail, as when the storage root cannot be created.
    pub fn failing_store(mut self) -> Self {
        self.fail_store = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ServiceFactory for FakeServices {
    fn data_store(&self) -> Result<Arc<DataStore>, DaemonError> {
        if self.fail_store {
            return Err(crate::error::StoreError::Create {
                path: self.store_root.clone(),
                source: io::Error::other("refused by test"),
            }
            .into());
        }
        Ok(Arc::new(DataStore::open(&self.store_root, 60)?))
    }

    fn web(&self, _store: Arc<DataStore>) -> Result<Arc<dyn Service>, DaemonError> {
        Ok(self.web.clone())
    }

    fn retrieval(&self) -> Result<Arc<dyn Drain>, DaemonError> {
        Ok(self.retrieval.clone())
    }

    fn submission(&self) -> Result<Arc<dyn Drain>, DaemonError> {
        Ok(self.submission.clone())
    }
}
