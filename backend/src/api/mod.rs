//! HTTP API module.
//!
//! This module provides the HTTP server, its request/response types and the
//! process-wide log stream.

pub mod logs;
pub mod server;
pub mod types;

pub use logs::*;
pub use server::start_server;
pub use types::*;
