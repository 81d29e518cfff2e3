//! Per-run egress proxying.
//!
//! Every sandboxed exec that needs network access gets its own ephemeral
//! local forward proxy, bound to a kernel-assigned port on the loopback
//! interface. The enclosing run only ever sees the port number, injected via
//! proxy environment variables; the proxy applies URL policy live on every
//! connection.

pub mod pool;
pub mod server;

pub use pool::{DefaultActionGetter, ProxyPool, UrlPolicyGetter};
