// Backend command handlers behind the command proxy

pub mod agents;
pub mod sessions;

// Re-export all commands for easy routing
pub use agents::*;
pub use sessions::*;
