pub mod action;
pub mod config;
pub mod control;
pub mod input;
pub mod jails;
pub mod models;
pub mod settings;
pub mod status;

// Re-export commonly used types
pub use models::{BanEvent, JailInfo};
pub use control::{ControlClient, ControlError, Fail2banClient};
pub use settings::{AlertCountries, Settings, SettingsStore};
pub use status::{JailStatusAggregator, Summary};
pub use action::ActionSynthesizer;
pub use jails::{FilterStore, JailFiles};
