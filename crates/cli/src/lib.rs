//! flowdbg CLI
//!
//! Terminal client for remote flow debug sessions: the engine HTTP client,
//! the per-session WebSocket controller and the debugger front end that
//! projects session state onto the flow diagram.

pub mod client;
pub mod commands;
pub mod config;
pub mod debugger;
pub mod output;
pub mod session;

pub use client::EngineClient;
pub use config::ClientConfig;
pub use debugger::Debugger;
pub use session::SessionHandle;
