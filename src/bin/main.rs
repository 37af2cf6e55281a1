use std::{
    path::Path,
    process,
    sync::{Arc, mpsc},
};

use clap::error::ErrorKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mailhub::{
    cli::{Cli, parse_args},
    config::{Config, load_config},
    error::DaemonError,
    lifecycle::{ConfiguredServices, LifecycleController},
    logs::LogDestination,
    pidfile::write_pidfile,
    signals,
    vars,
    watchdog::ProcessExit,
};

fn main() {
    vars::mark_start();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = err.print();
                process::exit(0);
            }
            _ => {
                let _ = err.print();
                process::exit(1);
            }
        },
    };

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to parse config: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = run(args, config) {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn run(args: Cli, config: Config) -> Result<(), DaemonError> {
    let logs = LogDestination::open(&args.logfile, true)?;
    init_logging(&args, &config, &logs);

    info!(
        "mailhub {} ({}) starting...",
        env!("CARGO_PKG_VERSION"),
        option_env!("MAILHUB_BUILD_DATE").unwrap_or("undefined")
    );

    if let Some(path) = args.pidfile() {
        write_pidfile(path)?;
        info!("Wrote PID file {}", path.display());
    }
    vars::publish_defaults();

    let grace_period = config.shutdown.grace_period()?;
    let drain_timeout = config.shutdown.drain_timeout()?;
    let config = Arc::new(config);
    let controller = LifecycleController::new(
        ConfiguredServices::new(Arc::clone(&config)),
        logs,
        grace_period,
        drain_timeout,
        Arc::new(ProcessExit::process()),
    );

    let (events, queue) = mpsc::channel();
    controller
        .router()
        .spawn(queue)
        .map_err(DaemonError::Signals)?;
    let _listener = signals::listen(events).map_err(DaemonError::Signals)?;
    log_config_location(&args.config);

    controller.run()
}

fn init_logging(args: &Cli, config: &Config, logs: &LogDestination) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else if let Some(level) = &config.logging.level {
        EnvFilter::new(level.trim())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!logs.is_file())
        .with_writer(logs.clone())
        .try_init();
}

fn log_config_location(path: &Path) {
    match path.canonicalize() {
        Ok(resolved) => info!("Loaded configuration from {}", resolved.display()),
        Err(_) => info!("Loaded configuration from {}", path.display()),
    }
}
