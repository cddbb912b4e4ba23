//! Data directory resolution, cached for the lifetime of the resolver

use crate::error::{KaboomError, Result};
use crate::host::Host;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};

pub const DATA_DIRECTORY_OPTION: &str = "data_directory";

/// Lazily resolved data directory.
///
/// The first lookup decides forever: a missing or empty setting keeps
/// failing on every later call, and a resolved path is never re-read.
#[derive(Debug, Default)]
pub struct DataDirectory {
    cached: OnceCell<Option<PathBuf>>,
}

impl DataDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, host: &dyn Host) -> Result<&Path> {
        let resolved = self.cached.get_or_init(|| {
            let path = host
                .config_option(DATA_DIRECTORY_OPTION)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from);
            tracing::debug!(?path, "resolved data directory");
            path
        });

        resolved
            .as_deref()
            .ok_or_else(|| KaboomError::ConfigurationMissing("data directory".to_string()))
    }
}
