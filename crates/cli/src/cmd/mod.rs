//! CLI command implementations

pub mod compact;
pub mod init;
pub mod list;
pub mod prune;
