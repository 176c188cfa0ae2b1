//! HTTP surface over the session registry.
//!
//! Starting, polling and resetting flows, plus the merged decode playlist.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
