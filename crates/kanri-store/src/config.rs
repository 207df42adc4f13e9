use std::path::PathBuf;

use serde::Deserialize;

use crate::database::{Database, StoreProvider};
use crate::error::StoreError;

/// Store location for one bounded-context module.
#[derive(Clone, Debug, Deserialize)]
pub struct StoreConfig {
    pub directory: PathBuf,
}

impl StoreConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.directory.as_os_str().is_empty() {
            return Err(StoreError::Configuration(
                "store directory must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Open the configured store, joining the shared handle if one is
    /// already open at this directory.
    pub fn open(&self) -> Result<Database, StoreError> {
        self.validate()?;
        StoreProvider::database_from(&self.directory)
    }
}
