pub mod ban_log;

pub use ban_log::{most_recent, parse_ban_log, BanHistory};
