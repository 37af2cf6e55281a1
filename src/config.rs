//! Configuration management for mailhub.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;

/// Represents the structure of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Mail submission (SMTP) listener.
    pub smtp: SmtpConfig,
    /// Mailbox retrieval (POP3) listener.
    pub pop3: Pop3Config,
    /// Management web interface.
    pub web: WebConfig,
    /// Mailbox storage.
    pub datastore: DataStoreConfig,
    /// Shutdown timing.
    pub shutdown: ShutdownConfig,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `mailhub=debug`. Falls back to `RUST_LOG`.
    pub level: Option<String>,
}

/// SMTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub address: SocketAddr,
    /// Domain announced in the greeting.
    pub domain: String,
    /// Idle timeout per connection (e.g. `300s`).
    pub timeout: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 2500)),
            domain: "mailhub.local".into(),
            timeout: "300s".into(),
        }
    }
}

/// POP3 listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pop3Config {
    pub address: SocketAddr,
    /// Domain announced in the greeting.
    pub domain: String,
    /// Idle timeout per connection (e.g. `600s`).
    pub timeout: String,
}

impl Default for Pop3Config {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 1100)),
            domain: "mailhub.local".into(),
            timeout: "600s".into(),
        }
    }
}

/// Web interface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub address: SocketAddr,
    /// HTML fragment served at `/`.
    pub greeting_file: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 9000)),
            greeting_file: None,
        }
    }
}

/// Mailbox storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    /// Root directory holding one subdirectory per mailbox.
    pub path: PathBuf,
    /// How long messages are kept, reported on the status page.
    pub retention_minutes: u64,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mail"),
            retention_minutes: 240,
        }
    }
}

/// Shutdown timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time allowed between the terminate signal and a forced exit.
    pub grace_period: String,
    /// Upper bound for each service drain; unbounded when absent.
    pub drain_timeout: Option<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: "15s".into(),
            drain_timeout: None,
        }
    }
}

impl ShutdownConfig {
    /// Parsed grace period.
    pub fn grace_period(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.grace_period)
    }

    /// Parsed drain bound, if any.
    pub fn drain_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.drain_timeout.as_deref().map(parse_duration).transpose()
    }
}

impl Config {
    /// Checks that the parsed values describe a runnable daemon.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp.domain.trim().is_empty() || self.pop3.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("domain cannot be empty".into()));
        }

        if self.shutdown.grace_period()?.is_zero() {
            return Err(ConfigError::Invalid("grace_period must be non-zero".into()));
        }
        self.shutdown.drain_timeout()?;
        parse_duration(&self.smtp.timeout)?;
        parse_duration(&self.pop3.timeout)?;

        let listeners = [
            ("smtp", self.smtp.address),
            ("pop3", self.pop3.address),
            ("web", self.web.address),
        ];
        for (i, (name, addr)) in listeners.iter().enumerate() {
            if addr.port() == 0 {
                continue;
            }
            for (other, other_addr) in &listeners[i + 1..] {
                if addr == other_addr {
                    return Err(ConfigError::Invalid(format!(
                        "{name} and {other} both listen on {addr}"
                    )));
                }
            }
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.datastore.path.is_relative() {
            self.datastore.path = base.join(&self.datastore.path);
        }
        if let Some(greeting) = &self.web.greeting_file
            && greeting.is_relative()
        {
            self.web.greeting_file = Some(base.join(greeting));
        }
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.into()));
    }

    let invalid = || ConfigError::InvalidDuration(raw.into());

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands `${VAR}` and `$VAR` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            if missing.is_none() {
                missing = Some(var_name.to_string());
            }
            String::new()
        })
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingEnvVar(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Loads, expands, parses and validates the configuration file.
pub fn load_config(config_path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;

    let expanded_content = expand_env_vars(&content)?;

    // An empty document means "all defaults".
    let mut config: Config = if expanded_content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&expanded_content)?
    };

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base_path);
    config.validate()?;

    Ok(config)
}
