//! TCP accept loop shared by the mailhub services.
use std::{
    io::{self, BufRead, BufReader, ErrorKind, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::error::ServiceError;

/// How often the accept loop re-checks the stop flag while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read timeout used by sessions so they notice a stop promptly.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Handles one accepted connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serves `stream` to completion. `stopping` becomes true once the server stops
    /// accepting; handlers should finish the current exchange and close.
    fn handle(&self, stream: TcpStream, stopping: &AtomicBool) -> io::Result<()>;
}

/// Counts in-flight connections and lets callers wait for zero.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: Mutex<usize>,
    idle: Condvar,
}

/// Releases its connection slot on drop.
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl ConnectionTracker {
    pub fn enter(self: &Arc<Self>) -> ConnectionGuard {
        *self.lock() += 1;
        ConnectionGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        *self.lock()
    }

    /// Blocks until no connections remain or `timeout` elapses. Returns whether the
    /// tracker reached zero.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let active = self.lock();
        match timeout {
            None => {
                let _idle = self
                    .idle
                    .wait_while(active, |count| *count > 0)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (_idle, result) = self
                    .idle
                    .wait_timeout_while(active, timeout, |count| *count > 0)
                    .unwrap_or_else(PoisonError::into_inner);
                !result.timed_out()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut active = self.tracker.lock();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.tracker.idle.notify_all();
        }
    }
}

/// A bound listener plus the bookkeeping needed to stop and drain it.
pub struct TcpServer {
    name: String,
    addr: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    stopping: Arc<AtomicBool>,
    connections: Arc<ConnectionTracker>,
}

impl TcpServer {
    pub fn new(
        name: impl Into<String>,
        addr: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            addr,
            handler,
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            stopping: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(ConnectionTracker::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound address, once [`TcpServer::bind`] has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.active()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Binds the configured address.
    pub fn bind(&self) -> Result<SocketAddr, ServiceError> {
        let listener = TcpListener::bind(self.addr).map_err(|source| ServiceError::Bind {
            service: self.name.clone(),
            addr: self.addr,
            source,
        })?;
        let listener_error = |source| ServiceError::Listener {
            service: self.name.clone(),
            source,
        };
        listener.set_nonblocking(true).map_err(listener_error)?;
        let local = listener.local_addr().map_err(listener_error)?;

        let _ = self.local_addr.set(local);
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        info!("{} listening on {}", self.name, local);
        Ok(local)
    }

    /// Runs the accept loop on the calling thread until [`TcpServer::stop`] is called.
    /// The listening socket is closed when this returns.
    pub fn serve(&self) {
        let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!("{} accept loop started without a bound listener", self.name);
            return;
        };

        while !self.is_stopping() {
            match listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL)
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("{} accept failed: {err}", self.name);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        drop(listener);
        info!("{} listener closed", self.name);
    }

    /// Binds, then runs the accept loop on a background thread.
    pub fn spawn(self: &Arc<Self>) -> Result<SocketAddr, ServiceError> {
        let local = self.bind()?;
        let server = Arc::clone(self);
        thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || server.serve())
            .map_err(|source| ServiceError::Listener {
                service: self.name.clone(),
                source,
            })?;
        Ok(local)
    }

    /// Stops accepting new connections. Returns immediately.
    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            debug!("{} stop requested", self.name);
        }
    }

    /// Stops accepting and waits for in-flight connections to finish.
    pub fn drain(&self, timeout: Option<Duration>) {
        self.stop();
        let active = self.active_connections();
        if active > 0 {
            info!("{} waiting for {active} connection(s) to finish", self.name);
        }
        if !self.connections.wait_idle(timeout) {
            warn!(
                "{} drain timed out with {} connection(s) still open",
                self.name,
                self.active_connections()
            );
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("{} accepted connection from {peer}", self.name);
        let guard = self.connections.enter();
        if let Err(err) = stream.set_nonblocking(false) {
            warn!("{} could not configure connection from {peer}: {err}", self.name);
            return;
        }

        let handler = Arc::clone(&self.handler);
        let stopping = Arc::clone(&self.stopping);
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-conn", self.name))
            .spawn(move || {
                let _guard = guard;
                if let Err(err) = handler.handle(stream, &stopping) {
                    debug!("{name} connection from {peer} ended with error: {err}");
                }
            });
        if let Err(err) = spawned {
            error!("{} could not spawn connection thread: {err}", self.name);
        }
    }
}

/// What a line-oriented session sends back for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Send the line and keep reading.
    Line(String),
    /// Send the line and close the connection.
    Close(String),
}

/// Greeting and shutdown text for a line-oriented protocol.
#[derive(Debug, Clone)]
pub struct LineProtocol {
    pub greeting: String,
    pub shutdown: String,
    pub idle_timeout: Duration,
}

/// Runs a CRLF line protocol over `stream`: sends the greeting, then answers each line
/// with `respond` until the client leaves, the session idles out, or the server stops.
pub fn serve_lines(
    stream: TcpStream,
    stopping: &AtomicBool,
    protocol: &LineProtocol,
    mut respond: impl FnMut(&str) -> Reply,
) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    write_line(&mut writer, &protocol.greeting)?;

    let mut line = String::new();
    let mut idle_since = Instant::now();
    loop {
        if stopping.load(Ordering::SeqCst) {
            return write_line(&mut writer, &protocol.shutdown);
        }

        match reader.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let reply = respond(line.trim_end_matches(['\r', '\n']));
                line.clear();
                idle_since = Instant::now();
                match reply {
                    Reply::Line(text) => write_line(&mut writer, &text)?,
                    Reply::Close(text) => return write_line(&mut writer, &text),
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if idle_since.elapsed() >= protocol.idle_timeout {
                    debug!("Closing idle session");
                    return Ok(());
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

fn write_line(writer: &mut TcpStream, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()
}
