//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// AgenShield daemon - central policy enforcement point for AI agent hosts
#[derive(Parser, Debug)]
#[command(name = "agenshield")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AGENSHIELD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AGENSHIELD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AGENSHIELD_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AGENSHIELD_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AGENSHIELD_LOG_FORMAT")]
    pub log_format: Option<String>,
}
