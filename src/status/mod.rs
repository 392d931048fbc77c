//! Jail status aggregation
//!
//! Combines live state from the control interface (active jails and their
//! banned addresses) with recent activity from the ban log.

use crate::control::{ControlClient, ControlError};
use crate::input::{most_recent, parse_ban_log, BanHistory};
use crate::input::ban_log::count_since;
use crate::models::{BanEvent, JailInfo};
use crate::settings::{SettingsError, SettingsStore};
use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Number of ban events included in a summary
pub const SUMMARY_RECENT_BANS: usize = 5;

/// Dashboard view: every jail plus the newest bans overall
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub jails: Vec<JailInfo>,
    pub last_bans: Vec<BanEvent>,
}

/// Errors from the reload workflow
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("fail2ban reloaded but the acknowledgment was not saved: {0}")]
    Acknowledge(#[from] SettingsError),
}

/// Read-only view of the daemon's jails
#[derive(Clone)]
pub struct JailStatusAggregator {
    client: Arc<dyn ControlClient>,
}

impl JailStatusAggregator {
    pub fn new(client: Arc<dyn ControlClient>) -> Self {
        JailStatusAggregator { client }
    }

    /// Build a [`JailInfo`] for every active jail
    ///
    /// Fails only if the jail list itself cannot be obtained. A jail whose
    /// addresses cannot be listed is left out, and an unreadable log counts
    /// as an empty history.
    pub async fn build_jail_infos(&self, log_path: &Path) -> Result<Vec<JailInfo>, ControlError> {
        let history = load_history(log_path);
        self.build_jail_infos_with(&history, Local::now().naive_local())
            .await
    }

    /// Same as [`build_jail_infos`](Self::build_jail_infos) against an
    /// already parsed history and a fixed clock
    pub async fn build_jail_infos_with(
        &self,
        history: &BanHistory,
        now: NaiveDateTime,
    ) -> Result<Vec<JailInfo>, ControlError> {
        let jails = self.client.list_jails().await?;
        let one_hour_ago = now - Duration::hours(1);

        let mut results = Vec::with_capacity(jails.len());
        for jail in jails {
            let banned = match self.client.banned_addresses(&jail).await {
                Ok(addresses) => dedup_in_order(addresses),
                Err(e) => {
                    log::warn!("Skipping jail {}: {}", jail, e);
                    continue;
                }
            };

            let new_in_last_hour = history
                .get(&jail)
                .map(|events| count_since(events, one_hour_ago))
                .unwrap_or(0);

            results.push(JailInfo {
                name: jail,
                enabled: true,
                total_banned: banned.len(),
                new_in_last_hour,
                banned_addresses: banned,
            });
        }

        Ok(results)
    }

    /// Jail infos plus the most recent bans across all jails
    pub async fn summary(&self, log_path: &Path) -> Result<Summary, ControlError> {
        let history = load_history(log_path);
        let jails = self
            .build_jail_infos_with(&history, Local::now().naive_local())
            .await?;

        Ok(Summary {
            jails,
            last_bans: most_recent(&history, SUMMARY_RECENT_BANS),
        })
    }

    /// Lift a ban; no local state changes
    pub async fn unban(&self, jail: &str, address: &str) -> Result<(), ControlError> {
        self.client.unban(jail, address).await
    }

    /// Reload the daemon and clear the pending-reload flag
    pub async fn reload_and_acknowledge(&self, settings: &SettingsStore) -> Result<(), ReloadError> {
        self.client.reload().await?;
        settings.mark_reload_done()?;
        Ok(())
    }
}

fn load_history(log_path: &Path) -> BanHistory {
    match parse_ban_log(log_path) {
        Ok(history) => history,
        Err(e) => {
            log::warn!("Cannot read ban log {}: {}", log_path.display(), e);
            BanHistory::new()
        }
    }
}

fn dedup_in_order(addresses: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}
