//! fail2ban ban log parsing
//!
//! Streams the daemon's log line by line and keeps only `Ban` notices
//! emitted by the actions facility, e.g.
//!
//! ```text
//! 2023-01-20 10:15:30,123 fail2ban.actions [1234]: NOTICE  [sshd] Ban 192.168.0.101
//! ```

use crate::models::BanEvent;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

/// Ban events grouped by jail; events within a jail keep log order
pub type BanHistory = BTreeMap<String, Vec<BanEvent>>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

fn ban_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\S+\s+\S+)\s+\S+\.actions\b.*?NOTICE\s+\[(\S+)\]\s+Ban\s+(\S+)")
            .expect("ban line pattern is valid")
    })
}

/// Parse the ban log at `path`
///
/// Fails only if the file cannot be opened or read. Lines that do not
/// match, or carry an unparseable timestamp, are skipped.
pub fn parse_ban_log<P: AsRef<Path>>(path: P) -> io::Result<BanHistory> {
    let file = File::open(path.as_ref())?;
    parse_ban_stream(BufReader::new(file))
}

/// Parse ban events from any buffered reader
pub fn parse_ban_stream<R: BufRead>(mut reader: R) -> io::Result<BanHistory> {
    let mut history = BanHistory::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        if let Some(event) = parse_ban_line(line.trim_end_matches(['\n', '\r'])) {
            history.entry(event.jail.clone()).or_default().push(event);
        }
    }

    Ok(history)
}

/// Parse a single log line into a ban event
pub fn parse_ban_line(line: &str) -> Option<BanEvent> {
    let caps = ban_line_pattern().captures(line)?;
    let timestamp = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;

    Some(BanEvent {
        timestamp,
        jail: caps[2].to_string(),
        address: caps[3].to_string(),
        raw_line: line.to_string(),
    })
}

/// The `n` newest events across all jails, newest first
///
/// Ties keep encounter order (jail name, then log order).
pub fn most_recent(history: &BanHistory, n: usize) -> Vec<BanEvent> {
    let mut all: Vec<&BanEvent> = history.values().flatten().collect();
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    all.into_iter().take(n).cloned().collect()
}

/// Number of events in `events` logged strictly after `since`
pub fn count_since(events: &[BanEvent], since: NaiveDateTime) -> usize {
    events.iter().filter(|e| e.timestamp > since).count()
}
