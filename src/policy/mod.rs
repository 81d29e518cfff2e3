//! Policy data model and decision machinery.
//!
//! A [`Policy`] is the fundamental decision record: an allow/deny rule over a
//! target class (URLs, commands, filesystem paths, skills) with an ordered
//! pattern list, an optional operations filter, a priority, and an optional
//! caller scope. The decision engine evaluates guarded operations against the
//! effective policy set; the policy graph can dynamically enrich that set.

pub mod engine;
pub mod graph;
pub mod pattern;
pub mod scope;

use serde::{Deserialize, Serialize};

pub use engine::{Decision, PolicyEngine};
pub use graph::{GraphEffects, PolicyGraph};
pub use scope::PolicyScope;

/// What a matching policy decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Allow the operation.
    Allow,
    /// Deny the operation.
    Deny,
    /// Reserved for interactive approval flows; the engine treats it as deny.
    Approval,
}

impl PolicyAction {
    /// Whether this action permits the operation today.
    #[must_use]
    pub fn permits(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// The class of target a policy's patterns are interpreted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTarget {
    /// URL patterns (normalized, glob-matched).
    Url,
    /// Command patterns (basename-normalized).
    Command,
    /// Filesystem glob patterns.
    Filesystem,
    /// Skill-slug glob patterns.
    Skill,
}

/// A guarded operation requested by an agent or one of its tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardedOperation {
    /// Outbound HTTP request.
    HttpRequest,
    /// Subprocess launch.
    Exec,
    /// File read.
    FileRead,
    /// File write.
    FileWrite,
    /// Directory listing.
    FileList,
    /// Opening a URL in the host browser.
    OpenUrl,
    /// Injecting a secret into an environment.
    SecretInject,
}

impl GuardedOperation {
    /// The target class this operation is evaluated against.
    #[must_use]
    pub fn target_type(self) -> PolicyTarget {
        match self {
            Self::HttpRequest | Self::OpenUrl => PolicyTarget::Url,
            Self::Exec => PolicyTarget::Command,
            Self::FileRead | Self::FileWrite | Self::FileList => PolicyTarget::Filesystem,
            Self::SecretInject => PolicyTarget::Skill,
        }
    }
}

/// Network posture hint on an exec-target policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkAccess {
    /// No network connectivity.
    None,
    /// Network through a per-run policy-enforcing proxy.
    Proxy,
    /// Unmediated network access.
    Direct,
}

/// The fundamental decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Stable identifier, unique within the effective set.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// What a match decides.
    pub action: PolicyAction,
    /// Target class the patterns apply to.
    pub target: PolicyTarget,
    /// Ordered pattern list; interpretation depends on `target`.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Optional operations filter; empty means all operations of the target class.
    #[serde(default)]
    pub operations: Vec<GuardedOperation>,
    /// Disabled policies are equivalent to absence.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priority evaluates first; ties resolve by insertion order.
    #[serde(default)]
    pub priority: i64,
    /// Optional caller scope; absent means universal.
    #[serde(default)]
    pub scope: Option<String>,
    /// Exec-only network posture hint.
    #[serde(default)]
    pub network_access: Option<NetworkAccess>,
}

fn default_enabled() -> bool {
    true
}

impl Policy {
    /// Parse the scope string into its structured form.
    #[must_use]
    pub fn scope(&self) -> PolicyScope {
        PolicyScope::parse(self.scope.as_deref())
    }

    /// Whether the operations filter admits `op` (empty filter admits all).
    #[must_use]
    pub fn applies_to(&self, op: GuardedOperation) -> bool {
        self.operations.is_empty() || self.operations.contains(&op)
    }
}

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerType {
    /// The agent process itself.
    Agent,
    /// A skill running on the agent's behalf.
    Skill,
}

/// Request-side execution context, constructed fresh per RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    /// Caller type; absent context is treated as agent-like on the URL path.
    pub caller_type: Option<CallerType>,
    /// Skill slug, required iff the caller is a skill.
    pub skill_slug: Option<String>,
    /// Reentrancy counter (informational).
    pub depth: u32,
    /// Enclosing process id for exec-derived events.
    pub pid: Option<u32>,
    /// Parent process id.
    pub ppid: Option<u32>,
    /// Session identifier, used by the exec-chain tracker.
    pub session_id: Option<String>,
    /// Requesting user.
    pub user: Option<String>,
    /// Which interception layer produced the event.
    pub source_layer: Option<String>,
}

impl ExecutionContext {
    /// Context for an agent caller.
    #[must_use]
    pub fn agent() -> Self {
        Self {
            caller_type: Some(CallerType::Agent),
            ..Self::default()
        }
    }

    /// Context for a skill caller.
    #[must_use]
    pub fn skill(slug: impl Into<String>) -> Self {
        Self {
            caller_type: Some(CallerType::Skill),
            skill_slug: Some(slug.into()),
            ..Self::default()
        }
    }
}
