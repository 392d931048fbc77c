pub mod event;

pub use event::{BanEvent, JailInfo};
