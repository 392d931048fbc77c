//! Jail definitions on disk
//!
//! Reads and rewrites the `enabled` flag of jails declared in `jail.local`
//! and in the `jail.d` directory.

pub mod filters;

pub use filters::FilterStore;

use crate::config::Config;
use crate::models::JailInfo;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Section holding global defaults rather than a jail
const DEFAULT_SECTION: &str = "DEFAULT";

/// Errors from reading or rewriting jail files
#[derive(Error, Debug)]
pub enum JailConfigError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid jail name: {0:?}")]
    InvalidName(String),
}

/// Enabled flags of the jails declared in the config files
#[derive(Debug, Clone)]
pub struct JailFiles {
    primary: PathBuf,
    secondary_dir: PathBuf,
}

impl JailFiles {
    pub fn new(primary: impl Into<PathBuf>, secondary_dir: impl Into<PathBuf>) -> Self {
        JailFiles {
            primary: primary.into(),
            secondary_dir: secondary_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.paths.jail_local, &config.paths.jail_d_dir)
    }

    /// Jails declared in the primary file, then in each secondary file
    ///
    /// The primary file must be readable; unreadable secondary files are
    /// skipped.
    pub fn list_jails(&self) -> Result<Vec<JailInfo>, JailConfigError> {
        let text = read(&self.primary)?;
        let mut jails: Vec<JailInfo> = parse_jail_sections(&text)
            .into_iter()
            .map(|(name, enabled)| JailInfo::declared(name, enabled))
            .collect();

        for path in self.secondary_files() {
            match read(&path) {
                Ok(text) => jails.extend(
                    parse_jail_sections(&text)
                        .into_iter()
                        .map(|(name, enabled)| JailInfo::declared(name, enabled)),
                ),
                Err(e) => log::debug!("Skipping {}", e),
            }
        }

        Ok(jails)
    }

    /// Set the `enabled` flag of each jail in `updates`
    ///
    /// The primary file receives every update, gaining new sections for
    /// jails it does not declare. Secondary files are then updated for the
    /// jails they declare; failures there are ignored.
    pub fn apply_enabled_updates(&self, updates: &HashMap<String, bool>) -> Result<(), JailConfigError> {
        if let Some(bad) = updates.keys().find(|name| !is_valid_jail_name(name)) {
            return Err(JailConfigError::InvalidName(bad.clone()));
        }

        let text = read(&self.primary)?;
        let mut pending = updates.clone();
        let rewritten = rewrite_enabled(&text, &mut pending, true);
        write(&self.primary, &rewritten)?;
        log::info!("Updated enabled flags in {}", self.primary.display());

        for path in self.secondary_files() {
            let mut pending = updates.clone();
            let result = read(&path).and_then(|text| {
                let rewritten = rewrite_enabled(&text, &mut pending, false);
                if rewritten == text {
                    return Ok(());
                }
                write(&path, &rewritten)
            });
            if let Err(e) = result {
                log::debug!("Not updating {}", e);
            }
        }

        Ok(())
    }

    fn secondary_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.secondary_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "conf"))
            .collect();
        files.sort();
        files
    }
}

/// Whether `name` can be used as a section header and file name
pub fn is_valid_jail_name(name: &str) -> bool {
    !name.is_empty()
        && name != DEFAULT_SECTION
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

/// `(jail, enabled)` for every non-default section of `text`
///
/// A section without an `enabled` line counts as enabled.
pub fn parse_jail_sections(text: &str) -> Vec<(String, bool)> {
    let mut jails = Vec::new();
    let mut current: Option<(String, bool)> = None;

    for line in text.lines() {
        if let Some(name) = section_name(line) {
            jails.extend(current.take().filter(|(n, _)| n != DEFAULT_SECTION));
            current = Some((name.to_string(), true));
        } else if let Some(value) = enabled_value(line) {
            if let Some((_, enabled)) = current.as_mut() {
                *enabled = value.eq_ignore_ascii_case("true");
            }
        }
    }
    jails.extend(current.filter(|(n, _)| n != DEFAULT_SECTION));

    jails
}

/// Apply `updates` to the `enabled` lines of `text`
///
/// Matched jails are removed from `updates`. Sections without an `enabled`
/// line gain one at their end. With `append_missing`, jails not declared in
/// `text` are appended as new sections (sorted by name) and `updates` is
/// left empty.
pub fn rewrite_enabled(text: &str, updates: &mut HashMap<String, bool>, append_missing: bool) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut seen_enabled = false;

    // Insert a missing enabled line before trailing blank lines of a section
    let close_section = |out: &mut Vec<String>,
                         current: &Option<String>,
                         seen_enabled: bool,
                         updates: &mut HashMap<String, bool>| {
        let Some(jail) = current else { return };
        if seen_enabled {
            return;
        }
        if let Some(value) = updates.remove(jail) {
            let at = out
                .iter()
                .rposition(|l| !l.trim().is_empty())
                .map_or(out.len(), |i| i + 1);
            out.insert(at, format!("enabled = {}", value));
        }
    };

    for line in text.lines() {
        if let Some(name) = section_name(line) {
            close_section(&mut out, &current, seen_enabled, updates);
            current = (name != DEFAULT_SECTION).then(|| name.to_string());
            seen_enabled = false;
            out.push(line.to_string());
            continue;
        }

        if enabled_value(line).is_some() {
            if let Some(jail) = current.as_ref() {
                seen_enabled = true;
                if let Some(value) = updates.remove(jail) {
                    out.push(format!("enabled = {}", value));
                    continue;
                }
            }
        }
        out.push(line.to_string());
    }
    close_section(&mut out, &current, seen_enabled, updates);

    if append_missing && !updates.is_empty() {
        let mut missing: Vec<(String, bool)> = updates.drain().collect();
        missing.sort();
        for (jail, value) in missing {
            if out.last().map_or(false, |l| !l.trim().is_empty()) {
                out.push(String::new());
            }
            out.push(format!("[{}]", jail));
            out.push(format!("enabled = {}", value));
        }
    }

    let mut rewritten = out.join("\n");
    if text.ends_with('\n') || (text.is_empty() && !rewritten.is_empty()) {
        rewritten.push('\n');
    }
    rewritten
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        Some(trimmed[1..trimmed.len() - 1].trim())
    } else {
        None
    }
}

fn enabled_value(line: &str) -> Option<&str> {
    let (key, value) = line.trim().split_once('=')?;
    (key.trim() == "enabled").then(|| value.trim())
}

fn read(path: &Path) -> Result<String, JailConfigError> {
    fs::read_to_string(path).map_err(|source| JailConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<(), JailConfigError> {
    fs::write(path, contents).map_err(|source| JailConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
