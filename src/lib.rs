//! mailhub hosts three independent network services in one process: a mail submission
//! (SMTP) server, a mailbox retrieval (POP3) server and a management web interface. This
//! crate holds the process lifecycle around them: startup sequencing, signal-driven log
//! rotation and graceful shutdown, and the forced-exit watchdog.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Error handling.
pub mod error;

/// Startup and shutdown orchestration.
pub mod lifecycle;

/// Log destination and rotation.
pub mod logs;

/// PID file support.
pub mod pidfile;

/// Mailbox retrieval service.
pub mod pop3;

/// Shared TCP accept loop.
pub mod server;

/// Service lifecycle handles.
pub mod service;

/// OS signal routing.
pub mod signals;

/// Mail submission service.
pub mod smtp;

/// Mailbox data store.
pub mod store;

/// Published process variables.
pub mod vars;

/// Shutdown watchdog.
pub mod watchdog;

/// Management web interface.
pub mod web;

#[doc(hidden)]
pub mod test_utils;
