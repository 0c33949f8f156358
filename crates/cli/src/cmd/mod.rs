//! CLI command implementations

pub mod resolve;
pub mod token;
pub mod watch;
