//! Seeding settings from an existing `jail.local`

use super::Settings;
use regex::Regex;
use std::sync::OnceLock;

/// Recognized values found in the `[DEFAULT]` section
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JailDefaults {
    pub bantime: Option<String>,
    pub findtime: Option<String>,
    pub maxretry: Option<u32>,
    pub ignoreip: Option<String>,
    pub destemail: Option<String>,
    pub bantime_increment: Option<bool>,
}

fn assignment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9_.]+)\s*=\s*(.+)$").expect("assignment pattern is valid")
    })
}

/// Scan `key = value` lines of the default section
///
/// Keys are case-insensitive and later assignments win. Lines before the
/// first section header count as default scope.
pub fn scan_jail_defaults(text: &str) -> JailDefaults {
    let mut found = JailDefaults::default();
    let mut in_default = true;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            in_default = trimmed[1..trimmed.len() - 1].trim() == "DEFAULT";
            continue;
        }
        if !in_default {
            continue;
        }

        let Some(caps) = assignment_pattern().captures(line) else {
            continue;
        };
        let value = caps[2].trim().to_string();

        match caps[1].to_ascii_lowercase().as_str() {
            "bantime" => found.bantime = Some(value),
            "findtime" => found.findtime = Some(value),
            "maxretry" => match value.parse() {
                Ok(n) => found.maxretry = Some(n),
                Err(_) => log::debug!("Ignoring non-numeric maxretry {:?}", value),
            },
            "ignoreip" => found.ignoreip = Some(value),
            "destemail" => found.destemail = Some(value),
            "bantime.increment" => {
                found.bantime_increment = Some(matches!(
                    value.to_ascii_lowercase().as_str(),
                    "true" | "yes" | "1" | "on"
                ))
            }
            _ => {}
        }
    }

    found
}

impl JailDefaults {
    /// Overwrite the matching fields of `settings`
    pub fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.bantime {
            settings.bantime = v;
        }
        if let Some(v) = self.findtime {
            settings.findtime = v;
        }
        if let Some(v) = self.maxretry {
            settings.maxretry = v;
        }
        if let Some(v) = self.ignoreip {
            settings.ignoreip = v;
        }
        if let Some(v) = self.destemail {
            settings.destemail = v;
        }
        if let Some(v) = self.bantime_increment {
            settings.bantime_increment = v;
        }
    }
}
