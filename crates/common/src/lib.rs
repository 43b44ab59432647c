//! flowdbg Common Library
//!
//! Shared model, wire protocol and client-side projection for the flowdbg
//! step debugger.

pub mod breakpoints;
pub mod diagram;
pub mod error;
pub mod protocol;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use breakpoints::BreakpointSet;
pub use diagram::{flowchart, DiagramView, NodeMarks};
pub use error::{Error, Result};
pub use protocol::{ClientCommand, ServerEvent, StepEventData};
pub use state::{Alert, Effect, SessionState};
pub use types::*;

/// flowdbg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-user directory for flowdbg files
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".flowdbg")
}

/// Default client configuration path
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
