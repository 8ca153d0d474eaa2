pub mod config;
pub mod daemon;
pub mod prefs;
pub mod storage;
pub mod sync;
