//! Rapid-exec chain detection.
//!
//! Interceptors report every exec; a session firing more than ten execs
//! inside one second is flagged with a security warning. Sessions quiet for
//! five minutes are pruned.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Execs inside the window that trip the warning.
const RAPID_EXEC_THRESHOLD: usize = 10;
/// Sliding window width.
const WINDOW: Duration = Duration::from_secs(1);
/// Idle sessions older than this are dropped.
const SESSION_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct SessionWindow {
    timestamps: Vec<Instant>,
    last_seen: Instant,
}

/// Tracks exec bursts per session.
#[derive(Default)]
pub struct ExecChainTracker {
    sessions: DashMap<String, SessionWindow>,
}

impl ExecChainTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one exec for a session. Returns the in-window exec count when
    /// it exceeds the rapid-exec threshold.
    pub fn record(&self, session_id: &str) -> Option<usize> {
        let now = Instant::now();
        self.prune(now);

        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionWindow {
                timestamps: Vec::new(),
                last_seen: now,
            });
        entry.last_seen = now;
        entry
            .timestamps
            .retain(|t| now.duration_since(*t) <= WINDOW);
        entry.timestamps.push(now);

        let count = entry.timestamps.len();
        (count > RAPID_EXEC_THRESHOLD).then_some(count)
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn prune(&self, now: Instant) {
        self.sessions
            .retain(|_, window| now.duration_since(window.last_seen) <= SESSION_TTL);
    }
}
