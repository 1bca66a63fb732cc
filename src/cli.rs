//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

const LONG_ABOUT: &str = r#"
lspwire - Content-Length framed JSON-RPC server core

Speaks the LSP base protocol on stdin/stdout. Diagnostics go to stderr or to
the file given with --log-file; stdout carries protocol traffic only.

CONFIGURATION:
  $XDG_CONFIG_HOME/lspwire/config.toml   (or --config <path>)
  LSPWIRE_MAX_CONCURRENT                 worker limit, 0 = inline
  LSPWIRE_READ_TIMEOUT                   read deadline in seconds
  LSPWIRE_LOG_WIRE                       log raw frames (RUST_LOG=lspwire::wire=trace)
"#;

/// lspwire - Content-Length framed JSON-RPC server core
#[derive(Parser, Debug)]
#[command(name = "lspwire")]
#[command(author, version, about, long_about = LONG_ABOUT)]
pub struct Cli {
    /// Config file (defaults to the XDG location)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log raw frame bodies at trace level
    #[arg(long)]
    pub log_wire: bool,
}
