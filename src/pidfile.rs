//! PID file support for `-pidfile`.
use std::{fs, path::Path, process};

use crate::error::PidFileError;

/// Writes the current process ID followed by a newline to `path`, replacing any
/// existing contents. The file is left in place at exit.
pub fn write_pidfile(path: &Path) -> Result<(), PidFileError> {
    fs::write(path, format!("{}\n", process::id())).map_err(|source| PidFileError {
        path: path.to_path_buf(),
        source,
    })
}
