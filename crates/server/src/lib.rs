//! flowdbg reference engine
//!
//! Serves flow definitions and drives debug sessions over the flowdbg
//! session protocol.

pub mod config;
pub mod executor;
pub mod registry;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use registry::FlowRegistry;
pub use server::{router, serve, AppState};
pub use state::SessionStore;

/// Build handler state from configuration
pub fn app_state(config: &ServerConfig) -> flowdbg_common::Result<AppState> {
    let flows = match &config.flows_path {
        Some(path) => FlowRegistry::load(path)?,
        None => FlowRegistry::builtin(),
    };
    Ok(AppState::new(config, SessionStore::new(flows)))
}
