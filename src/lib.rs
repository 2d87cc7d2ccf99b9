pub mod apis;
pub mod builder;
pub mod config;
#[cfg(feature = "db")]
pub mod db;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod recurrence;
pub mod region;
pub mod slug;
pub mod storage;
pub mod types;
