//! lspwire - Language server wire core
//!
//! Reads Content-Length framed JSON-RPC messages from a byte stream and
//! routes them to registered method handlers.

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod infra;
pub mod server;

pub use error::{LspwireError, LspwireResult};
