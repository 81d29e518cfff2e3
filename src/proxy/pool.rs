//! Per-run proxy pool.
//!
//! One process-wide pool owns every per-run proxy. Acquisition at capacity
//! evicts the entry with the oldest activity; idle entries are reaped by a
//! per-entry timer that every proxied request pushes forward. Release closes
//! the listener immediately but never tears down connections that are
//! already in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::activity::ActivityChannel;
use crate::policy::{Policy, PolicyAction};

use super::server::{self, RunContext};

/// Live view of the URL policy slice for a run. The pool holds a callback,
/// not a snapshot, so policy edits apply on the next connection.
pub type UrlPolicyGetter = Arc<dyn Fn() -> Vec<Policy> + Send + Sync>;

/// Live view of the configured default action.
pub type DefaultActionGetter = Arc<dyn Fn() -> PolicyAction + Send + Sync>;

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Hard cap on simultaneously live proxies.
    pub max_concurrent: usize,
    /// Idle time after which a proxy is reclaimed.
    pub idle_timeout: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

struct PoolEntry {
    port: u16,
    command: String,
    last_activity: Arc<Mutex<Instant>>,
    accept_task: AbortHandle,
    idle_task: AbortHandle,
}

struct PoolInner {
    config: ProxyPoolConfig,
    entries: Mutex<HashMap<String, PoolEntry>>,
    activity: Arc<ActivityChannel>,
}

impl PoolInner {
    /// Remove an entry, stopping its accept loop and idle timer. Running
    /// request tasks are independent and complete on their own.
    fn release(&self, exec_id: &str) -> bool {
        let Some(entry) = self.entries.lock().remove(exec_id) else {
            return false;
        };
        entry.accept_task.abort();
        entry.idle_task.abort();
        info!(exec_id, port = entry.port, command = %entry.command, "Released per-run proxy");
        true
    }
}

/// The process-wide per-run proxy pool.
pub struct ProxyPool {
    inner: Arc<PoolInner>,
}

impl ProxyPool {
    /// Create a pool with the given configuration.
    #[must_use]
    pub fn new(config: ProxyPoolConfig, activity: Arc<ActivityChannel>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                entries: Mutex::new(HashMap::new()),
                activity,
            }),
        }
    }

    /// Number of live proxies.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Acquire a per-run proxy for an exec, returning its loopback port.
    ///
    /// Idempotent per exec id: a second acquire returns the existing port.
    /// At capacity, the entry with the oldest activity is evicted first.
    pub async fn acquire(
        &self,
        exec_id: &str,
        command: &str,
        url_policies: UrlPolicyGetter,
        default_action: DefaultActionGetter,
    ) -> Result<u16> {
        if let Some(port) = self
            .inner
            .entries
            .lock()
            .get(exec_id)
            .map(|e| e.port)
        {
            return Ok(port);
        }

        // Evict the stalest entry when full. The victim is chosen and
        // released under separate lock scopes; a concurrent acquire can at
        // worst evict one entry more than strictly necessary.
        let victim = {
            let entries = self.inner.entries.lock();
            if entries.len() >= self.inner.config.max_concurrent {
                entries
                    .iter()
                    .min_by_key(|(_, e)| *e.last_activity.lock())
                    .map(|(id, _)| id.clone())
            } else {
                None
            }
        };
        if let Some(id) = victim {
            warn!(evicted = %id, "Proxy pool at capacity; evicting oldest entry");
            self.inner.release(&id);
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let run = Arc::new(RunContext {
            exec_id: exec_id.to_string(),
            command: command.to_string(),
            url_policies,
            default_action,
            activity: Arc::clone(&self.inner.activity),
            last_activity: Arc::clone(&last_activity),
        });
        let accept_task = tokio::spawn(server::serve(listener, run)).abort_handle();

        let idle_task = tokio::spawn(Self::idle_reaper(
            Arc::downgrade(&self.inner),
            exec_id.to_string(),
            Arc::clone(&last_activity),
            self.inner.config.idle_timeout,
        ))
        .abort_handle();

        let mut entries = self.inner.entries.lock();
        if let Some(existing) = entries.get(exec_id) {
            // Lost a race with a concurrent acquire for the same exec.
            let port = existing.port;
            drop(entries);
            accept_task.abort();
            idle_task.abort();
            return Ok(port);
        }
        entries.insert(
            exec_id.to_string(),
            PoolEntry {
                port,
                command: command.to_string(),
                last_activity,
                accept_task,
                idle_task,
            },
        );
        drop(entries);

        info!(exec_id, command, port, "Started per-run proxy");
        Ok(port)
    }

    /// Release the proxy bound to an exec, if any.
    pub fn release(&self, exec_id: &str) -> bool {
        self.inner.release(exec_id)
    }

    /// Release every entry.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.inner.entries.lock().keys().cloned().collect();
        for id in ids {
            self.inner.release(&id);
        }
        debug!("Proxy pool shut down");
    }

    /// Sleeps until the entry has been idle for the full timeout, then
    /// releases it. Requests push `last_activity` forward, which makes the
    /// next wake-up re-sleep instead of reaping.
    async fn idle_reaper(
        inner: std::sync::Weak<PoolInner>,
        exec_id: String,
        last_activity: Arc<Mutex<Instant>>,
        idle_timeout: Duration,
    ) {
        loop {
            let deadline = *last_activity.lock() + idle_timeout;
            let now = Instant::now();
            if deadline <= now {
                if let Some(inner) = inner.upgrade() {
                    debug!(exec_id = %exec_id, "Reaping idle per-run proxy");
                    inner.release(&exec_id);
                }
                return;
            }
            tokio::time::sleep(deadline - now).await;
        }
    }
}
