//! Policy graph: typed edges that enrich the static policy set.
//!
//! The graph is a directed multigraph over policy-bearing nodes. Edges fire
//! when their source node's policy matches a request, and can activate
//! dormant policies, grant extra network or filesystem capability, inject
//! secrets, revoke outstanding activations, or veto an allow decision.
//!
//! Evaluation is deliberately forgiving: a failure inside a single edge is
//! logged and dropped, and the aggregate effects are always returned.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{GraphStore, NewActivation, SecretStore};

use super::ExecutionContext;

/// What an edge does when its source policy matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeEffect {
    /// Wake the target node's dormant policy.
    Activate,
    /// Consume outstanding activations on the target node.
    Revoke,
    /// Grant additional URL patterns to the run's network slice.
    GrantNetwork,
    /// Grant additional filesystem paths (`r:`/`w:` prefixed).
    GrantFs,
    /// Inject a named secret into the run's environment.
    InjectSecret,
    /// Veto the source policy's allow decision.
    Deny,
}

/// How long an activation produced by an `activate` edge lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeLifetime {
    /// Lives until consumed or the daemon restarts.
    Session,
    /// Bound to the requesting process.
    Process,
    /// Latent: the edge itself keeps the target active, no row is written.
    Persistent,
}

/// A policy-bearing graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Opaque node id.
    pub id: String,
    /// The policy this node carries (many-to-one is not supported).
    pub policy_id: String,
    /// A dormant node's policy does not participate in evaluation until
    /// activated.
    #[serde(default)]
    pub dormant: bool,
}

/// A typed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Opaque edge id.
    pub id: String,
    /// Source node (edge fires when this node's policy matches).
    pub source_node_id: String,
    /// Target node (receives the effect).
    pub target_node_id: String,
    /// The effect this edge applies.
    pub effect: EdgeEffect,
    /// Activation lifetime for `activate` edges.
    #[serde(default = "default_lifetime")]
    pub lifetime: EdgeLifetime,
    /// Higher priority processes first.
    #[serde(default)]
    pub priority: i64,
    /// Disabled edges are skipped everywhere.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Patterns for `grant_network` / `grant_fs` effects.
    #[serde(default)]
    pub grant_patterns: Vec<String>,
    /// Secret name for `inject_secret` effects.
    #[serde(default)]
    pub secret_name: Option<String>,
    /// Free-form condition string; doubles as the user-visible deny reason.
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_lifetime() -> EdgeLifetime {
    EdgeLifetime::Session
}

fn default_enabled() -> bool {
    true
}

/// An activation record backing a non-persistent `activate` edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    /// Opaque activation id.
    pub id: String,
    /// The `activate` edge this row backs.
    pub edge_id: String,
    /// When the activation was created.
    pub activated_at: DateTime<Utc>,
    /// Bound process id for process-lifetime activations.
    #[serde(default)]
    pub process_id: Option<u32>,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Consumed activations no longer keep their target active.
    #[serde(default)]
    pub consumed: bool,
}

impl Activation {
    /// Whether this row still keeps its target active.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && self.expires_at.is_none_or(|e| e > now)
    }
}

/// A profile-scoped policy graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyGraph {
    /// Nodes, each carrying one policy.
    pub nodes: Vec<GraphNode>,
    /// Typed edges between nodes.
    pub edges: Vec<GraphEdge>,
}

impl PolicyGraph {
    /// Find the node carrying `policy_id`. The graph stores node→policy,
    /// never the reverse; a policy under multiple nodes is undefined
    /// behavior and the first node wins with a warning.
    #[must_use]
    pub fn node_for_policy(&self, policy_id: &str) -> Option<&GraphNode> {
        let mut found = self.nodes.iter().filter(|n| n.policy_id == policy_id);
        let first = found.next();
        if first.is_some() && found.next().is_some() {
            warn!(policy_id, "policy appears under multiple graph nodes; using the first");
        }
        first
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Enabled outgoing edges of a node, sorted by priority descending
    /// (ties keep definition order).
    #[must_use]
    pub fn outgoing(&self, node_id: &str) -> Vec<&GraphEdge> {
        let mut edges: Vec<&GraphEdge> = self
            .edges
            .iter()
            .filter(|e| e.enabled && e.source_node_id == node_id)
            .collect();
        edges.sort_by_key(|e| std::cmp::Reverse(e.priority));
        edges
    }

    /// Enabled incoming `activate` edges of a node.
    #[must_use]
    pub fn incoming_activations(&self, node_id: &str) -> Vec<&GraphEdge> {
        self.edges
            .iter()
            .filter(|e| {
                e.enabled && e.effect == EdgeEffect::Activate && e.target_node_id == node_id
            })
            .collect()
    }
}

/// Filesystem capability grants accumulated from `grant_fs` edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsGrants {
    /// Readable paths.
    pub read: Vec<String>,
    /// Writable paths.
    pub write: Vec<String>,
}

/// Aggregated side information produced by evaluating a matched policy's
/// outgoing edges.
#[derive(Debug, Clone, Default)]
pub struct GraphEffects {
    /// Extra URL patterns granted to the run's proxy slice.
    pub granted_network_patterns: Vec<String>,
    /// Extra filesystem paths granted to the sandbox.
    pub granted_fs_paths: FsGrants,
    /// Secrets to inject, name → value.
    pub injected_secrets: Vec<(String, String)>,
    /// Policies activated by this evaluation.
    pub activated_policy_ids: Vec<String>,
    /// Deny override: the allow decision is vetoed.
    pub denied: bool,
    /// User-visible reason carried from the denying edge's condition.
    pub deny_reason: Option<String>,
}

/// Compute the set of dormant policy ids that are currently active.
///
/// A dormant node is active iff some incoming enabled `activate` edge is
/// `persistent`, or has at least one non-consumed, non-expired activation
/// row.
pub fn active_dormant_policy_ids(
    graph: &PolicyGraph,
    store: &dyn GraphStore,
) -> crate::Result<HashSet<String>> {
    let mut active = HashSet::new();
    for node in graph.nodes.iter().filter(|n| n.dormant) {
        for edge in graph.incoming_activations(&node.id) {
            if edge.lifetime == EdgeLifetime::Persistent
                || !store.active_activations(Some(&edge.id))?.is_empty()
            {
                active.insert(node.policy_id.clone());
                break;
            }
        }
    }
    Ok(active)
}

/// Evaluates the outgoing edges of a matched policy's node.
pub struct GraphEvaluator<'a> {
    graph: &'a PolicyGraph,
    store: &'a dyn GraphStore,
    secrets: &'a dyn SecretStore,
}

impl<'a> GraphEvaluator<'a> {
    /// Create an evaluator over a loaded graph and its stores.
    #[must_use]
    pub fn new(
        graph: &'a PolicyGraph,
        store: &'a dyn GraphStore,
        secrets: &'a dyn SecretStore,
    ) -> Self {
        Self {
            graph,
            store,
            secrets,
        }
    }

    /// Evaluate the matched policy's outgoing edges, accumulating effects.
    ///
    /// A failure inside one edge is logged and that edge's contribution is
    /// dropped; the remaining edges still run and the aggregate is always
    /// returned.
    #[must_use]
    pub fn evaluate(&self, policy_id: &str, ctx: Option<&ExecutionContext>) -> GraphEffects {
        let mut effects = GraphEffects::default();
        let Some(node) = self.graph.node_for_policy(policy_id) else {
            return effects;
        };

        for edge in self.graph.outgoing(&node.id) {
            if let Err(e) = self.apply_edge(edge, ctx, &mut effects) {
                warn!(edge_id = %edge.id, effect = ?edge.effect, error = %e, "graph edge failed; dropping its contribution");
            }
        }
        effects
    }

    fn apply_edge(
        &self,
        edge: &GraphEdge,
        ctx: Option<&ExecutionContext>,
        effects: &mut GraphEffects,
    ) -> crate::Result<()> {
        match edge.effect {
            EdgeEffect::GrantNetwork => {
                effects
                    .granted_network_patterns
                    .extend(edge.grant_patterns.iter().cloned());
            }
            EdgeEffect::GrantFs => {
                for pattern in &edge.grant_patterns {
                    if let Some(path) = pattern.strip_prefix("w:") {
                        effects.granted_fs_paths.write.push(path.to_string());
                    } else if let Some(path) = pattern.strip_prefix("r:") {
                        effects.granted_fs_paths.read.push(path.to_string());
                    } else {
                        // No prefix means read.
                        effects.granted_fs_paths.read.push(pattern.clone());
                    }
                }
            }
            EdgeEffect::InjectSecret => {
                let Some(name) = edge.secret_name.as_deref() else {
                    return Ok(());
                };
                match self.secrets.get_by_name(name) {
                    Ok(Some(value)) => {
                        effects.injected_secrets.push((name.to_string(), value));
                    }
                    Ok(None) => {
                        debug!(secret = name, edge_id = %edge.id, "secret not found; skipping injection");
                    }
                    Err(e) => {
                        warn!(secret = name, edge_id = %edge.id, error = %e, "secret lookup failed; skipping injection");
                    }
                }
            }
            EdgeEffect::Activate => {
                if let Some(target) = self.graph.node(&edge.target_node_id) {
                    effects.activated_policy_ids.push(target.policy_id.clone());
                }
                match edge.lifetime {
                    EdgeLifetime::Session => {
                        self.store.activate(NewActivation {
                            edge_id: edge.id.clone(),
                            process_id: None,
                            expires_at: None,
                        })?;
                    }
                    EdgeLifetime::Process => {
                        self.store.activate(NewActivation {
                            edge_id: edge.id.clone(),
                            process_id: ctx.and_then(|c| c.pid),
                            expires_at: None,
                        })?;
                    }
                    // Persistent activation is latent in the edge itself.
                    EdgeLifetime::Persistent => {}
                }
            }
            EdgeEffect::Revoke => {
                for incoming in self.graph.incoming_activations(&edge.target_node_id) {
                    for activation in self.store.active_activations(Some(&incoming.id))? {
                        self.store.consume_activation(&activation.id)?;
                    }
                }
            }
            EdgeEffect::Deny => {
                effects.denied = true;
                effects.deny_reason = edge.condition.clone();
            }
        }
        Ok(())
    }
}
