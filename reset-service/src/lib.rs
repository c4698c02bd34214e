pub mod config;
pub mod error;
pub mod job;
pub mod nuke;
pub mod post_reset;
pub mod pretasks;
pub mod storage;
