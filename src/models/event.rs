use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single `Ban` notice from the fail2ban log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanEvent {
    /// Local (naive) time the ban was logged, millisecond precision
    pub timestamp: NaiveDateTime,
    pub jail: String,
    pub address: String,
    pub raw_line: String,
}

/// Derived view of one jail, recomputed on every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JailInfo {
    pub name: String,
    pub enabled: bool,
    pub total_banned: usize,
    pub new_in_last_hour: usize,
    /// Currently banned addresses, unique, in control-interface order
    pub banned_addresses: Vec<String>,
}

impl JailInfo {
    /// A jail as declared in a config file, with no live status
    pub fn declared(name: impl Into<String>, enabled: bool) -> Self {
        JailInfo {
            name: name.into(),
            enabled,
            total_banned: 0,
            new_in_last_hour: 0,
            banned_addresses: Vec::new(),
        }
    }
}
