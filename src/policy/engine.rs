//! Priority-ordered policy decision engine.
//!
//! One evaluation is a pure pass over an effective policy set: enabled
//! policies whose scope admits the caller and whose graph node (if any) is
//! awake, sorted by priority descending with insertion order breaking ties.
//! The first pattern match wins. Plain-HTTP targets are rejected up front
//! unless an explicit `http://` allow pattern covers them.
//!
//! The engine is fail-closed on explicit deny, fail-as-configured on
//! no-match, and degrades to a graph-free decision when graph evaluation
//! fails.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Result;
use crate::config::SandboxPathsConfig;
use crate::proxy::{DefaultActionGetter, ProxyPool, UrlPolicyGetter};
use crate::sandbox::{NetworkMode, SandboxSpec, build_sandbox_plan};
use crate::store::{GraphStore, PolicyStore, SecretStore};

use super::graph::{GraphEffects, GraphEvaluator, active_dormant_policy_ids};
use super::pattern::{
    command_matches, fs_matches, is_explicit_http_pattern, skill_matches, url_matches,
};
use super::scope::{aggregate_for_command, scope_matches};
use super::{ExecutionContext, GuardedOperation, Policy, PolicyAction, PolicyTarget};

/// Outcome of a policy check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// The winning policy, absent on default-action fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Sandbox specification, present for every exec decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSpec>,
}

impl Decision {
    fn deny(policy_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            policy_id,
            reason: Some(reason.into()),
            sandbox: None,
        }
    }
}

/// Reason attached to the plain-HTTP pre-check rejection.
pub const PLAIN_HTTP_BLOCKED: &str =
    "Plain HTTP is blocked by default; add an explicit http:// allow policy to permit it";

/// Whether a policy's pattern list matches a target of the given class.
/// Patterns are tried in order; the first hit wins.
fn patterns_match(policy: &Policy, target_type: PolicyTarget, target: &str) -> bool {
    policy.patterns.iter().any(|pattern| match target_type {
        PolicyTarget::Url => url_matches(pattern, target),
        PolicyTarget::Command => command_matches(pattern, target),
        PolicyTarget::Filesystem => fs_matches(pattern, target),
        PolicyTarget::Skill => skill_matches(pattern, target),
    })
}

/// Whether an explicit `http://` allow pattern in the slice covers `target`.
fn explicit_http_allowed<'a>(policies: impl IntoIterator<Item = &'a Policy>, target: &str) -> bool {
    policies
        .into_iter()
        .filter(|p| p.target == PolicyTarget::Url && p.action == PolicyAction::Allow)
        .flat_map(|p| p.patterns.iter())
        .any(|pattern| is_explicit_http_pattern(pattern) && url_matches(pattern, target))
}

fn is_plain_http(target: &str) -> bool {
    target
        .trim()
        .get(..7)
        .is_some_and(|t| t.eq_ignore_ascii_case("http://"))
}

/// Decide a URL against a pre-filtered policy slice, without graph effects.
///
/// This is the procedure the per-run proxy applies on every connection: its
/// slice already embeds graph grants as synthetic highest-priority allow
/// policies, so only pattern evaluation remains.
#[must_use]
pub fn decide_url(policies: &[Policy], url: &str, default_action: PolicyAction) -> Decision {
    let mut ordered: Vec<&Policy> = policies.iter().filter(|p| p.enabled).collect();
    ordered.sort_by_key(|p| Reverse(p.priority));

    if is_plain_http(url) && !explicit_http_allowed(ordered.iter().copied(), url) {
        return Decision::deny(None, PLAIN_HTTP_BLOCKED);
    }

    for policy in ordered {
        if policy.target != PolicyTarget::Url
            || !policy.applies_to(GuardedOperation::HttpRequest)
            || !patterns_match(policy, PolicyTarget::Url, url)
        {
            continue;
        }
        let allowed = policy.action.permits();
        let verb = if allowed { "Allowed" } else { "Denied" };
        return Decision {
            allowed,
            policy_id: Some(policy.id.clone()),
            reason: Some(format!("{verb} by policy '{}'", policy.id)),
            sandbox: None,
        };
    }

    Decision {
        allowed: default_action.permits(),
        policy_id: None,
        reason: Some("No matching policy; default action applied".to_string()),
        sandbox: None,
    }
}

/// The policy decision engine. Constructed once at daemon start; every
/// dependency is explicit so tests can substitute fakes.
pub struct PolicyEngine {
    policies: Arc<dyn PolicyStore>,
    graph: Arc<dyn GraphStore>,
    secrets: Arc<dyn SecretStore>,
    pool: Arc<ProxyPool>,
    default_action: Arc<RwLock<PolicyAction>>,
    sandbox_paths: SandboxPathsConfig,
    broker_http_port: Option<u16>,
}

impl PolicyEngine {
    /// Wire up an engine.
    #[must_use]
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        graph: Arc<dyn GraphStore>,
        secrets: Arc<dyn SecretStore>,
        pool: Arc<ProxyPool>,
        default_action: PolicyAction,
        sandbox_paths: SandboxPathsConfig,
        broker_http_port: Option<u16>,
    ) -> Self {
        Self {
            policies,
            graph,
            secrets,
            pool,
            default_action: Arc::new(RwLock::new(default_action)),
            sandbox_paths,
            broker_http_port,
        }
    }

    /// Current default action for non-matching requests.
    #[must_use]
    pub fn default_action(&self) -> PolicyAction {
        *self.default_action.read()
    }

    /// Swap the default action (configuration edits).
    pub fn set_default_action(&self, action: PolicyAction) {
        *self.default_action.write() = action;
    }

    /// Evaluate a guarded operation.
    ///
    /// Storage failures loading the policy set surface as errors; graph
    /// failures degrade to a decision without graph contributions.
    pub async fn check(
        &self,
        operation: GuardedOperation,
        target: &str,
        ctx: Option<&ExecutionContext>,
        profile_id: Option<&str>,
    ) -> Result<Decision> {
        let target_type = operation.target_type();
        let all = self.policies.get_enabled(profile_id)?;

        // Load the graph and the currently-active dormant set. Any failure
        // here drops the graph's contributions entirely.
        let mut graph = match self.graph.load_graph(profile_id) {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "policy graph load failed; continuing without graph");
                None
            }
        };
        let active_dormant: HashSet<String> = match graph.as_ref() {
            Some(g) => match active_dormant_policy_ids(g, self.graph.as_ref()) {
                Ok(set) => set,
                Err(e) => {
                    warn!(error = %e, "dormant-activation scan failed; continuing without graph");
                    graph = None;
                    HashSet::new()
                }
            },
            None => HashSet::new(),
        };

        // Effective set: enabled, scope-matching, awake.
        let mut applicable: Vec<&Policy> = all
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| scope_matches(p, ctx))
            .filter(|p| match graph.as_ref().and_then(|g| g.node_for_policy(&p.id)) {
                Some(node) => !node.dormant || active_dormant.contains(&p.id),
                None => true,
            })
            .collect();
        applicable.sort_by_key(|p| Reverse(p.priority));

        if target_type == PolicyTarget::Url
            && is_plain_http(target)
            && !explicit_http_allowed(applicable.iter().copied(), target)
        {
            return Ok(Decision::deny(None, PLAIN_HTTP_BLOCKED));
        }

        for &policy in &applicable {
            if policy.target != target_type
                || !policy.applies_to(operation)
                || !patterns_match(policy, target_type, target)
            {
                continue;
            }

            let mut effects = GraphEffects::default();
            if let Some(g) = graph.as_ref() {
                if g.node_for_policy(&policy.id).is_some() {
                    effects = GraphEvaluator::new(g, self.graph.as_ref(), self.secrets.as_ref())
                        .evaluate(&policy.id, ctx);
                }
            }

            if effects.denied {
                let reason = effects
                    .deny_reason
                    .unwrap_or_else(|| "Denied by policy graph".to_string());
                debug!(policy_id = %policy.id, %reason, "graph edge vetoed allow decision");
                return Ok(Decision::deny(Some(policy.id.clone()), reason));
            }

            let allowed = policy.action.permits();
            let verb = if allowed { "Allowed" } else { "Denied" };
            let sandbox = if operation == GuardedOperation::Exec && allowed {
                Some(
                    self.build_exec_sandbox(&all, Some(policy), &effects, target, profile_id)
                        .await,
                )
            } else {
                None
            };
            return Ok(Decision {
                allowed,
                policy_id: Some(policy.id.clone()),
                reason: Some(format!("{verb} by policy '{}'", policy.id)),
                sandbox,
            });
        }

        // No policy matched: the configured default applies. Exec still
        // receives a hardened sandbox specification.
        let default = self.default_action();
        let sandbox = if operation == GuardedOperation::Exec {
            Some(
                self.build_exec_sandbox(&all, None, &GraphEffects::default(), target, profile_id)
                    .await,
            )
        } else {
            None
        };
        Ok(Decision {
            allowed: default.permits(),
            policy_id: None,
            reason: Some("No matching policy; default action applied".to_string()),
            sandbox,
        })
    }

    /// Build the sandbox specification for an exec, acquiring a per-run
    /// proxy when the plan calls for one. A proxy that fails to start
    /// degrades to no network rather than unmediated access.
    async fn build_exec_sandbox(
        &self,
        all: &[Policy],
        matched: Option<&Policy>,
        effects: &GraphEffects,
        target: &str,
        profile_id: Option<&str>,
    ) -> SandboxSpec {
        let plan = build_sandbox_plan(
            &self.sandbox_paths,
            all,
            matched,
            effects,
            target,
            self.broker_http_port,
        );
        let mut spec = plan.spec;

        if plan.mode == NetworkMode::Proxy {
            let exec_id = Uuid::new_v4().to_string();
            let url_policies = self.url_policy_getter(
                profile_id,
                plan.basename.clone(),
                effects.granted_network_patterns.clone(),
            );
            let default_action = self.default_action_getter();
            match self
                .pool
                .acquire(&exec_id, target, url_policies, default_action)
                .await
            {
                Ok(port) => spec.apply_proxy_env(port, &exec_id),
                Err(e) => {
                    warn!(error = %e, command = target, "per-run proxy failed to start; denying network for this run");
                    spec.network_allowed = false;
                }
            }
        }
        spec
    }

    /// Live URL-policy slice for a run: synthetic allow policies derived
    /// from graph network grants first (highest priority), then the
    /// command-scoped aggregation re-read from storage on every call.
    fn url_policy_getter(
        &self,
        profile_id: Option<&str>,
        basename: String,
        granted_patterns: Vec<String>,
    ) -> UrlPolicyGetter {
        let store = Arc::clone(&self.policies);
        let profile = profile_id.map(String::from);
        Arc::new(move || {
            let mut slice = Vec::new();
            if !granted_patterns.is_empty() {
                slice.push(Policy {
                    id: "graph:grant-network".to_string(),
                    name: "Graph network grant".to_string(),
                    action: PolicyAction::Allow,
                    target: PolicyTarget::Url,
                    patterns: granted_patterns.clone(),
                    operations: vec![],
                    enabled: true,
                    priority: i64::MAX,
                    scope: None,
                    network_access: None,
                });
            }
            let all = match store.get_enabled(profile.as_deref()) {
                Ok(policies) => policies,
                Err(e) => {
                    warn!(error = %e, "policy refresh for per-run proxy failed; serving grants only");
                    Vec::new()
                }
            };
            slice.extend(
                aggregate_for_command(&all, &basename)
                    .into_iter()
                    .filter(|p| p.target == PolicyTarget::Url)
                    .cloned(),
            );
            slice
        })
    }

    fn default_action_getter(&self) -> DefaultActionGetter {
        let default_action = Arc::clone(&self.default_action);
        Arc::new(move || *default_action.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityChannel;
    use crate::policy::graph::{EdgeEffect, EdgeLifetime, GraphEdge, GraphNode, PolicyGraph};
    use crate::proxy::pool::ProxyPoolConfig;
    use crate::store::MemoryStore;

    fn url_policy(id: &str, action: PolicyAction, patterns: &[&str], priority: i64) -> Policy {
        Policy {
            id: id.into(),
            name: String::new(),
            action,
            target: PolicyTarget::Url,
            patterns: patterns.iter().map(|s| (*s).to_string()).collect(),
            operations: vec![],
            enabled: true,
            priority,
            scope: None,
            network_access: None,
        }
    }

    fn command_policy(id: &str, action: PolicyAction, patterns: &[&str]) -> Policy {
        Policy {
            id: id.into(),
            name: String::new(),
            action,
            target: PolicyTarget::Command,
            patterns: patterns.iter().map(|s| (*s).to_string()).collect(),
            operations: vec![],
            enabled: true,
            priority: 0,
            scope: None,
            network_access: None,
        }
    }

    fn engine_with(store: Arc<MemoryStore>, default_action: PolicyAction) -> PolicyEngine {
        let pool = Arc::new(ProxyPool::new(
            ProxyPoolConfig::default(),
            Arc::new(ActivityChannel::default()),
        ));
        PolicyEngine::new(
            Arc::clone(&store) as Arc<dyn PolicyStore>,
            Arc::clone(&store) as Arc<dyn GraphStore>,
            store as Arc<dyn SecretStore>,
            pool,
            default_action,
            SandboxPathsConfig::default(),
            Some(48100),
        )
    }

    // ── Plain-HTTP pre-check ──────────────────────────────────────────

    #[tokio::test]
    async fn plain_http_blocked_despite_https_allow() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![url_policy(
            "allow-example",
            PolicyAction::Allow,
            &["example.com"],
            0,
        )]);
        let engine = engine_with(store, PolicyAction::Allow);

        let decision = engine
            .check(GuardedOperation::HttpRequest, "http://example.com", None, None)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().starts_with("Plain HTTP is blocked"));
    }

    #[tokio::test]
    async fn explicit_http_pattern_unlocks_plain_http() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![url_policy(
            "allow-http-example",
            PolicyAction::Allow,
            &["http://example.com"],
            0,
        )]);
        let engine = engine_with(store, PolicyAction::Deny);

        let decision = engine
            .check(GuardedOperation::HttpRequest, "http://example.com", None, None)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.policy_id.as_deref(), Some("allow-http-example"));
    }

    // ── Priority & ordering ───────────────────────────────────────────

    #[tokio::test]
    async fn higher_priority_deny_beats_earlier_allow() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![
            url_policy("a", PolicyAction::Allow, &["example.com"], 10),
            url_policy("b", PolicyAction::Deny, &["example.com"], 100),
        ]);
        let engine = engine_with(store, PolicyAction::Allow);

        let decision = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                None,
                None,
            )
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn insertion_order_breaks_priority_ties() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![
            url_policy("first", PolicyAction::Deny, &["example.com"], 5),
            url_policy("second", PolicyAction::Allow, &["example.com"], 5),
        ]);
        let engine = engine_with(store, PolicyAction::Allow);

        let decision = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(decision.policy_id.as_deref(), Some("first"));
        assert!(!decision.allowed);
    }

    // ── Scope interplay ───────────────────────────────────────────────

    #[tokio::test]
    async fn command_scoped_policies_never_enter_the_url_path() {
        let store = Arc::new(MemoryStore::new());
        let mut scoped = url_policy("curl-only", PolicyAction::Allow, &["example.com"], 0);
        scoped.scope = Some("command:curl".into());
        store.set_policies(vec![scoped]);
        let engine = engine_with(store, PolicyAction::Deny);

        let decision = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                Some(&ExecutionContext::agent()),
                None,
            )
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.policy_id.is_none());
    }

    #[tokio::test]
    async fn skill_scoped_policy_ignored_for_agent_caller() {
        let store = Arc::new(MemoryStore::new());
        let mut scoped = url_policy("skill-allow", PolicyAction::Allow, &["example.com"], 0);
        scoped.scope = Some("skill".into());
        store.set_policies(vec![scoped]);
        let engine = engine_with(store, PolicyAction::Deny);

        let agent = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                Some(&ExecutionContext::agent()),
                None,
            )
            .await
            .unwrap();
        assert!(!agent.allowed);

        let skill = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                Some(&ExecutionContext::skill("web")),
                None,
            )
            .await
            .unwrap();
        assert!(skill.allowed);
    }

    // ── Operations filter & action semantics ──────────────────────────

    #[tokio::test]
    async fn operations_filter_skips_non_covered_operations() {
        let store = Arc::new(MemoryStore::new());
        let mut policy = command_policy("files-only", PolicyAction::Deny, &["*"]);
        policy.operations = vec![GuardedOperation::FileRead];
        store.set_policies(vec![policy]);
        let engine = engine_with(store, PolicyAction::Allow);

        let decision = engine
            .check(GuardedOperation::Exec, "ls", None, None)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(decision.policy_id.is_none());
    }

    #[tokio::test]
    async fn approval_action_is_treated_as_deny() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![url_policy(
            "needs-approval",
            PolicyAction::Approval,
            &["example.com"],
            0,
        )]);
        let engine = engine_with(store, PolicyAction::Allow);

        let decision = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                None,
                None,
            )
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.policy_id.as_deref(), Some("needs-approval"));
    }

    // ── Exec & sandbox ────────────────────────────────────────────────

    #[tokio::test]
    async fn exec_decisions_always_carry_a_sandbox() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![command_policy("allow-ls", PolicyAction::Allow, &["ls:*"])]);
        let engine = engine_with(Arc::clone(&store), PolicyAction::Deny);

        let matched = engine
            .check(GuardedOperation::Exec, "ls -la", None, None)
            .await
            .unwrap();
        assert!(matched.allowed);
        assert!(matched.sandbox.is_some());

        // Default fallback (deny) still returns a hardened spec.
        let defaulted = engine
            .check(GuardedOperation::Exec, "unknown-tool", None, None)
            .await
            .unwrap();
        assert!(!defaulted.allowed);
        let spec = defaulted.sandbox.expect("sandbox present on default");
        assert!(spec.env_deny.contains(&"NODE_OPTIONS".to_string()));
    }

    #[tokio::test]
    async fn deny_decisions_carry_no_sandbox_for_url_ops() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store, PolicyAction::Deny);
        let decision = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://example.com",
                None,
                None,
            )
            .await
            .unwrap();
        assert!(decision.sandbox.is_none());
    }

    // ── Graph interplay ───────────────────────────────────────────────

    fn graph_for_activation() -> PolicyGraph {
        PolicyGraph {
            nodes: vec![
                GraphNode {
                    id: "n1".into(),
                    policy_id: "deploy".into(),
                    dormant: false,
                },
                GraphNode {
                    id: "n2".into(),
                    policy_id: "dormant-url".into(),
                    dormant: true,
                },
            ],
            edges: vec![
                GraphEdge {
                    id: "e-activate".into(),
                    source_node_id: "n1".into(),
                    target_node_id: "n2".into(),
                    effect: EdgeEffect::Activate,
                    lifetime: EdgeLifetime::Session,
                    priority: 0,
                    enabled: true,
                    grant_patterns: vec![],
                    secret_name: None,
                    condition: None,
                },
                GraphEdge {
                    id: "e-secret".into(),
                    source_node_id: "n1".into(),
                    target_node_id: "n2".into(),
                    effect: EdgeEffect::InjectSecret,
                    lifetime: EdgeLifetime::Session,
                    priority: 0,
                    enabled: true,
                    grant_patterns: vec![],
                    secret_name: Some("GOG_TOKEN".into()),
                    condition: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn graph_activation_and_secret_injection_on_exec() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![
            command_policy("deploy", PolicyAction::Allow, &["deploy-tool:*"]),
            url_policy("dormant-url", PolicyAction::Allow, &["internal.example.com"], 0),
        ]);
        store.set_graph(None, graph_for_activation());
        store.put_secret("GOG_TOKEN", "xyz");
        let engine = engine_with(Arc::clone(&store), PolicyAction::Deny);

        // Dormant policy is invisible before activation.
        let before = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://internal.example.com",
                None,
                None,
            )
            .await
            .unwrap();
        assert!(!before.allowed);

        // The exec match fires the activate and inject_secret edges.
        let exec = engine
            .check(GuardedOperation::Exec, "deploy-tool --prod", None, None)
            .await
            .unwrap();
        assert!(exec.allowed);
        let spec = exec.sandbox.unwrap();
        assert_eq!(
            spec.env_injection.get("GOG_TOKEN").map(String::as_str),
            Some("xyz")
        );

        // The dormant policy now participates.
        let after = engine
            .check(
                GuardedOperation::HttpRequest,
                "https://internal.example.com",
                None,
                None,
            )
            .await
            .unwrap();
        assert!(after.allowed);
        assert_eq!(after.policy_id.as_deref(), Some("dormant-url"));
    }

    #[tokio::test]
    async fn graph_deny_edge_overrides_allow() {
        let store = Arc::new(MemoryStore::new());
        store.set_policies(vec![command_policy("risky", PolicyAction::Allow, &["risky:*"])]);
        store.set_graph(
            None,
            PolicyGraph {
                nodes: vec![GraphNode {
                    id: "n1".into(),
                    policy_id: "risky".into(),
                    dormant: false,
                }],
                edges: vec![GraphEdge {
                    id: "e-deny".into(),
                    source_node_id: "n1".into(),
                    target_node_id: "n1".into(),
                    effect: EdgeEffect::Deny,
                    lifetime: EdgeLifetime::Session,
                    priority: 0,
                    enabled: true,
                    grant_patterns: vec![],
                    secret_name: None,
                    condition: Some("blocked during incident response".into()),
                }],
            },
        );
        let engine = engine_with(store, PolicyAction::Allow);

        let decision = engine
            .check(GuardedOperation::Exec, "risky --now", None, None)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason.as_deref(),
            Some("blocked during incident response")
        );
        assert!(decision.sandbox.is_none());
    }

    // ── URL slice decisions (proxy path) ──────────────────────────────

    #[test]
    fn decide_url_applies_priority_and_default() {
        let policies = vec![
            url_policy("deny-all", PolicyAction::Deny, &["**"], 0),
            url_policy("allow-api", PolicyAction::Allow, &["api.example.com/**"], 10),
        ];
        let allowed = decide_url(&policies, "https://api.example.com/v1", PolicyAction::Deny);
        assert!(allowed.allowed);
        assert_eq!(allowed.policy_id.as_deref(), Some("allow-api"));

        let denied = decide_url(&policies, "https://other.com", PolicyAction::Allow);
        assert!(!denied.allowed);
        assert_eq!(denied.policy_id.as_deref(), Some("deny-all"));
    }

    #[test]
    fn decide_url_enforces_plain_http_precheck() {
        let policies = vec![url_policy("allow", PolicyAction::Allow, &["**"], 0)];
        let decision = decide_url(&policies, "http://example.com", PolicyAction::Allow);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().starts_with("Plain HTTP"));
    }

    #[test]
    fn decide_url_falls_back_to_default() {
        let decision = decide_url(&[], "https://example.com", PolicyAction::Allow);
        assert!(decision.allowed);
        assert!(decision.policy_id.is_none());
    }
}
