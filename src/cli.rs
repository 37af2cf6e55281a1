//! Command-line interface for mailhubd.
use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::logs::LogTarget;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

const LEVELS: [(LevelFilter, &str); 6] = [
    (LevelFilter::OFF, "off"),
    (LevelFilter::ERROR, "error"),
    (LevelFilter::WARN, "warn"),
    (LevelFilter::INFO, "info"),
    (LevelFilter::DEBUG, "debug"),
    (LevelFilter::TRACE, "trace"),
];

impl LogLevelArg {
    /// String representation suitable for an `EnvFilter` directive.
    pub fn as_str(&self) -> &'static str {
        LEVELS
            .iter()
            .find(|(level, _)| *level == self.0)
            .map(|(_, name)| *name)
            .unwrap_or("info")
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<usize>() {
            return LEVELS
                .get(number)
                .map(|(level, _)| LogLevelArg(*level))
                .ok_or_else(|| {
                    format!("unsupported log level number '{number}' (expected 0-5)")
                });
        }

        let name = match trimmed.to_ascii_lowercase().as_str() {
            "err" => "error".to_string(),
            "warning" => "warn".to_string(),
            "information" => "info".to_string(),
            other => other.to_string(),
        };
        LEVELS
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(level, _)| LogLevelArg(*level))
            .ok_or_else(|| format!("invalid log level '{trimmed}'"))
    }
}

/// Command-line interface for mailhubd.
#[derive(Parser, Debug)]
#[command(name = "mailhubd", version)]
#[command(about = "Runs the mailhub SMTP, POP3 and web services", long_about = None)]
#[command(override_usage = "mailhubd [options] <conf file>")]
pub struct Cli {
    /// Write our PID into the specified file (`none` disables).
    #[arg(long, value_name = "PATH")]
    pub pidfile: Option<PathBuf>,

    /// Write log output to the specified file, or to `stdout`/`stderr`.
    #[arg(long, value_name = "PATH", default_value = "stderr")]
    pub logfile: LogTarget,

    /// Override the logging verbosity from the config file.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Path to the configuration file.
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

impl Cli {
    /// The PID file to write, if one was requested.
    pub fn pidfile(&self) -> Option<&Path> {
        self.pidfile
            .as_deref()
            .filter(|path| path.as_os_str() != "none")
    }
}

/// Rewrites single-dash long flags (`-pidfile x`, `-logfile=x`) to their double-dash form
/// so both spellings reach clap. Single-letter flags and everything after `--` are left
/// alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(index, arg)| {
            if index == 0 || passthrough {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                passthrough = true;
                return arg;
            }

            let flag = text
                .strip_prefix('-')
                .filter(|rest| !rest.starts_with('-'))
                .map(|rest| rest.split('=').next().unwrap_or(rest));
            match flag {
                Some(name)
                    if name.len() > 1
                        && name.chars().all(|c| c.is_ascii_alphabetic() || c == '-') =>
                {
                    OsString::from(format!("-{text}"))
                }
                _ => arg,
            }
        })
        .collect()
}

/// Parses `args` (including the program name), accepting Go-style single-dash flags.
pub fn try_parse_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    Cli::try_parse_from(normalize_args(args))
}

/// Parses the process arguments.
pub fn parse_args() -> Result<Cli, clap::Error> {
    try_parse_from(env::args_os())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn accepts_single_dash_long_flags() {
        let cli = try_parse_from([
            "mailhubd",
            "-pidfile",
            "out.pid",
            "-logfile=/var/log/mailhub.log",
            "mailhub.yaml",
        ])
        .unwrap();
        assert_eq!(cli.pidfile(), Some(Path::new("out.pid")));
        assert_eq!(
            cli.logfile,
            LogTarget::File(PathBuf::from("/var/log/mailhub.log"))
        );
        assert_eq!(cli.config, PathBuf::from("mailhub.yaml"));
    }

    #[test]
    fn defaults_disable_pidfile_and_log_to_stderr() {
        let cli = try_parse_from(["mailhubd", "mailhub.yaml"]).unwrap();
        assert_eq!(cli.pidfile(), None);
        assert_eq!(cli.logfile, LogTarget::Stderr);
        assert_eq!(cli.log_level, None);

        let cli = try_parse_from(["mailhubd", "--pidfile", "none", "mailhub.yaml"]).unwrap();
        assert_eq!(cli.pidfile(), None);
    }

    #[test]
    fn missing_or_extra_config_is_rejected() {
        let err = try_parse_from(["mailhubd"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        assert!(try_parse_from(["mailhubd", "a.yaml", "b.yaml"]).is_err());
    }

    #[test]
    fn help_flag_requests_help() {
        let err = try_parse_from(["mailhubd", "-help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn normalize_leaves_short_flags_and_values_alone() {
        let args = normalize_args(["mailhubd", "-h", "--logfile", "-", "--", "-pidfile"]);
        assert_eq!(args, ["mailhubd", "-h", "--logfile", "-", "--", "-pidfile"]);
    }

    #[test]
    fn log_level_accepts_names_and_numbers() {
        assert_eq!("debug".parse::<LogLevelArg>().unwrap().as_str(), "debug");
        assert_eq!("Warning".parse::<LogLevelArg>().unwrap().as_str(), "warn");
        assert_eq!("0".parse::<LogLevelArg>().unwrap().as_str(), "off");
        assert_eq!("5".parse::<LogLevelArg>().unwrap().as_str(), "trace");
        assert!("9".parse::<LogLevelArg>().is_err());
        assert!("loud".parse::<LogLevelArg>().is_err());
    }
}
