//! Error handling for mailhub.
use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// Errors that abort the daemon before (or while) its services come up.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The configuration could not be loaded or failed validation.
    #[error("Failed to parse config: {0}")]
    Config(#[from] ConfigError),

    /// The log destination could not be installed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The PID file could not be written.
    #[error(transparent)]
    PidFile(#[from] PidFileError),

    /// The shared data store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A service failed to start.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The OS signal listener could not be registered.
    #[error("Failed to register signal handlers: {0}")]
    Signals(#[source] io::Error),
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file.
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        /// Path that was being read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference named an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration string could not be parsed.
    #[error("Invalid duration value: '{0}'")]
    InvalidDuration(String),

    /// The configuration parsed but is not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error type for log destination operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Error opening (create-or-append) the log file.
    #[error("Failed to open log file {path:?}: {source}")]
    Open {
        /// The configured log file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error pointing the standard streams at the log file.
    #[error("Failed to redirect standard streams to log file: {0}")]
    Redirect(#[source] io::Error),
}

/// Error type for PID file operations.
#[derive(Debug, Error)]
#[error("Failed to create {path:?}: {source}")]
pub struct PidFileError {
    /// The requested PID file path.
    pub path: PathBuf,
    /// The underlying error that occurred.
    #[source]
    pub source: io::Error,
}

/// Error type for the mailbox data store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error creating the data store root directory.
    #[error("Failed to create data store at {path:?}: {source}")]
    Create {
        /// The data store root.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },
}

/// Error type for service lifecycle operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Error binding the service listener.
    #[error("Failed to bind {service} listener on {addr}: {source}")]
    Bind {
        /// The service name.
        service: String,
        /// The configured listen address.
        addr: SocketAddr,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error configuring a bound listener.
    #[error("Failed to configure {service} listener: {source}")]
    Listener {
        /// The service name.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// `start` was called on a handle that has already left `NotStarted`.
    #[error("Service '{0}' was already started")]
    AlreadyStarted(String),
}
