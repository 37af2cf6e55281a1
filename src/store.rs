//! Mailbox storage root shared with the web interface.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::StoreError;

/// Directory-backed mailbox store. Each mailbox is a subdirectory of the root.
#[derive(Debug)]
pub struct DataStore {
    root: PathBuf,
    retention_minutes: u64,
}

impl DataStore {
    /// Opens the store, creating the root directory if needed.
    pub fn open(root: &Path, retention_minutes: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(root).map_err(|source| StoreError::Create {
            path: root.to_path_buf(),
            source,
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            retention_minutes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn retention_minutes(&self) -> u64 {
        self.retention_minutes
    }

    /// Counts the mailboxes currently present.
    pub fn mailbox_count(&self) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.root)? {
            if entry?.file_type()?.is_dir() {
                count += 1;
            }
        }
        Ok(count)
    }
}
