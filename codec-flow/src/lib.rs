//! codec-flow library crate.
//!
//! Runs the sparse video codec scripts as supervised background jobs, one
//! set per client session, and serves their progress over HTTP.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod flow;
pub mod logging;
pub mod session;

pub use error::{Error, FlowError, Result};
