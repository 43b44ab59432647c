//! CLI Commands

pub mod debug;
pub mod flows;
pub mod sessions;
