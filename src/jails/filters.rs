//! Filter definitions in `filter.d`

use super::{is_valid_jail_name, JailConfigError};
use crate::config::Config;
use std::fs;
use std::path::PathBuf;

/// Reads and overwrites `filter.d/<jail>.conf`
#[derive(Debug, Clone)]
pub struct FilterStore {
    dir: PathBuf,
}

impl FilterStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FilterStore { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.paths.filter_dir)
    }

    fn path_for(&self, jail: &str) -> Result<PathBuf, JailConfigError> {
        if !is_valid_jail_name(jail) {
            return Err(JailConfigError::InvalidName(jail.to_string()));
        }
        Ok(self.dir.join(format!("{}.conf", jail)))
    }

    /// Names of the filters present, sorted; subdirectories are skipped
    pub fn list(&self) -> Result<Vec<String>, JailConfigError> {
        let io_err = |source| JailConfigError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() || path.extension().map_or(true, |ext| ext != "conf") {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Current filter definition for `jail`
    pub fn get(&self, jail: &str) -> Result<String, JailConfigError> {
        let path = self.path_for(jail)?;
        fs::read_to_string(&path).map_err(|source| JailConfigError::Io { path, source })
    }

    /// Replace the filter definition for `jail`
    pub fn set(&self, jail: &str, content: &str) -> Result<(), JailConfigError> {
        let path = self.path_for(jail)?;
        fs::write(&path, content).map_err(|source| JailConfigError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("Filter for {} written to {}", jail, path.display());
        Ok(())
    }
}
