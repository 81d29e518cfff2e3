//! AgenShield Daemon Library
//!
//! The central policy-enforcement point for an AI agent host: every network
//! call, subprocess launch, filesystem access, and secret injection an agent
//! (or one of its spawned tools) requests is mediated here.
//!
//! # Core subsystems
//!
//! - **Policy Decision Engine**: priority-ordered evaluation of guarded
//!   operations against a scoped policy set, enriched by a policy graph
//!   whose edges can wake dormant policies, grant capability, inject
//!   secrets, or veto an allow.
//! - **Per-Run Egress Proxy Pool**: one ephemeral local HTTP/HTTPS forward
//!   proxy per sandboxed exec, enforcing URL policy at the wire.
//! - **Sandbox Profile Synthesis**: translates an exec allow decision into a
//!   concrete sandbox specification for the host's sandbox executor.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activity;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod policy;
pub mod proxy;
pub mod rpc;
pub mod sandbox;
pub mod security;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
