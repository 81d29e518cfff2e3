//! Sandbox specification synthesis.
//!
//! Translates an allow decision for an exec (or the default-action fallback)
//! into a concrete specification the host-specific sandbox executor consumes:
//! allowed/denied paths, allowed binaries, network mode, and injected
//! environment. The core promises that every path in `deniedPaths` is
//! concrete (absolute, wildcard-free); everything else is the executor's
//! translation problem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SandboxPathsConfig;
use crate::policy::graph::GraphEffects;
use crate::policy::pattern::{command_basename, extract_concrete_paths};
use crate::policy::scope::aggregate_for_command;
use crate::policy::{GuardedOperation, NetworkAccess, Policy, PolicyTarget};

/// Commands that are expected to reach the network; an exec of one of these
/// defaults to proxy mode when neither the graph nor the matched policy says
/// otherwise.
const KNOWN_NETWORK_COMMANDS: &[&str] = &[
    "curl", "wget", "git", "npm", "npx", "yarn", "pnpm", "pip", "pip3", "brew", "apt", "ssh",
    "scp", "rsync", "fetch", "http", "nc", "ncat", "node", "deno", "bun",
];

/// Environment variable scrubbed from every sandbox so the interceptor
/// cannot be re-loaded inside it.
const NODE_OPTIONS_ENV: &str = "NODE_OPTIONS";

/// Network posture decided for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// No network.
    None,
    /// Unmediated network.
    Direct,
    /// Network through a per-run policy-enforcing proxy.
    Proxy,
}

/// Wire-form sandbox specification (§ external interfaces). Constructed per
/// exec, handed to the sandbox executor, never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    /// Whether sandboxing is requested at all.
    pub enabled: bool,
    /// Readable paths (absolute paths or globs the executor understands).
    pub allowed_read_paths: Vec<String>,
    /// Writable paths.
    pub allowed_write_paths: Vec<String>,
    /// Denied paths; each entry is a concrete absolute path.
    pub denied_paths: Vec<String>,
    /// Whether any network egress is permitted.
    pub network_allowed: bool,
    /// Host allow-list, used only when the platform supports host filtering.
    pub allowed_hosts: Vec<String>,
    /// Port allow-list.
    pub allowed_ports: Vec<u16>,
    /// Executables (or executable directories) the run may invoke.
    pub allowed_binaries: Vec<String>,
    /// Executables the run may never invoke.
    pub denied_binaries: Vec<String>,
    /// Environment to inject into the run.
    pub env_injection: BTreeMap<String, String>,
    /// Environment names to scrub.
    pub env_deny: Vec<String>,
    /// Optional explicit environment allow-list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_allow: Option<Vec<String>>,
    /// Broker HTTP port, passed through from configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_http_port: Option<u16>,
}

impl SandboxSpec {
    /// Inject the per-run proxy environment: upper- and lowercase proxy
    /// variables pointing at the local proxy, the opaque exec id, and an
    /// empty `NO_PROXY`.
    pub fn apply_proxy_env(&mut self, port: u16, exec_id: &str) {
        let proxy_url = format!("http://127.0.0.1:{port}");
        for name in ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"] {
            self.env_injection
                .insert(name.to_string(), proxy_url.clone());
            self.env_injection
                .insert(name.to_lowercase(), proxy_url.clone());
        }
        self.env_injection
            .insert("AGENSHIELD_EXEC_ID".to_string(), exec_id.to_string());
        self.env_injection
            .insert("NO_PROXY".to_string(), String::new());
        self.network_allowed = true;
        self.allowed_hosts = vec!["localhost".to_string()];
    }
}

/// A built specification plus the network mode the engine still has to act
/// on (proxy acquisition happens above this layer).
#[derive(Debug, Clone)]
pub struct SandboxPlan {
    /// The specification under construction.
    pub spec: SandboxSpec,
    /// Decided network posture.
    pub mode: NetworkMode,
    /// Resolved command basename.
    pub basename: String,
}

/// File operations that qualify a command-target deny policy for concrete
/// deny-path extraction.
fn is_file_operation(op: GuardedOperation) -> bool {
    matches!(
        op,
        GuardedOperation::FileRead | GuardedOperation::FileWrite | GuardedOperation::FileList
    )
}

/// Build a sandbox plan for an exec of `target`.
///
/// `policies` is the full enabled set for the profile; command-scoped
/// aggregation (universal first) happens here. `matched` is the winning
/// policy, absent when the engine fell back to the default action.
#[must_use]
pub fn build_sandbox_plan(
    paths: &SandboxPathsConfig,
    policies: &[Policy],
    matched: Option<&Policy>,
    effects: &GraphEffects,
    target: &str,
    broker_http_port: Option<u16>,
) -> SandboxPlan {
    let basename = command_basename(target);
    let slice = aggregate_for_command(policies, &basename);

    let mut spec = SandboxSpec {
        enabled: true,
        allowed_read_paths: Vec::new(),
        allowed_write_paths: Vec::new(),
        denied_paths: Vec::new(),
        network_allowed: false,
        allowed_hosts: Vec::new(),
        allowed_ports: Vec::new(),
        allowed_binaries: Vec::new(),
        denied_binaries: Vec::new(),
        env_injection: BTreeMap::new(),
        env_deny: vec![NODE_OPTIONS_ENV.to_string()],
        env_allow: None,
        broker_http_port,
    };

    // Concrete deny paths from filesystem deny policies and command-target
    // deny policies that cover file operations.
    let deny_patterns = slice
        .iter()
        .filter(|p| !p.action.permits())
        .filter(|p| {
            p.target == PolicyTarget::Filesystem
                || (p.target == PolicyTarget::Command
                    && p.operations.iter().copied().any(is_file_operation))
        })
        .flat_map(|p| p.patterns.iter().map(String::as_str));
    spec.denied_paths = extract_concrete_paths(deny_patterns);

    // Allow paths from filesystem/command policies in the command slice.
    for policy in slice
        .iter()
        .filter(|p| p.action.permits())
        .filter(|p| matches!(p.target, PolicyTarget::Filesystem | PolicyTarget::Command))
    {
        let reads = policy.operations.is_empty()
            || policy
                .operations
                .iter()
                .any(|&op| matches!(op, GuardedOperation::FileRead | GuardedOperation::FileList));
        let writes = policy.operations.contains(&GuardedOperation::FileWrite);
        if policy.target == PolicyTarget::Command && policy.operations.is_empty() {
            // A bare command allow grants execution, not filesystem reach.
            continue;
        }
        if reads {
            spec.allowed_read_paths
                .extend(policy.patterns.iter().cloned());
        }
        if writes {
            spec.allowed_write_paths
                .extend(policy.patterns.iter().cloned());
        }
    }

    // Resolve the command binary itself.
    let first_token = target
        .trim()
        .strip_prefix("fork:")
        .unwrap_or(target.trim())
        .split_whitespace()
        .next()
        .unwrap_or("");
    if first_token.starts_with('/') {
        spec.allowed_binaries.push(first_token.to_string());
        if let Ok(real) = std::fs::canonicalize(first_token) {
            let real = real.to_string_lossy().to_string();
            if real != first_token {
                spec.allowed_binaries.push(real);
            }
        }
    }

    // Per-agent-home allowances.
    if let Some(home) = paths.agent_home() {
        spec.allowed_write_paths.push(path_str(&home));
        for dir in binary_dirs(paths, &home) {
            spec.allowed_binaries.push(path_str(&dir));
        }
        let metadata = home.join(&paths.metadata_dir_name);
        spec.denied_paths.push(path_str(&metadata));
        spec.allowed_read_paths
            .push(path_str(&metadata.join("workspace")));
    }

    // Merge graph effects.
    spec.allowed_read_paths
        .extend(effects.granted_fs_paths.read.iter().cloned());
    spec.allowed_write_paths
        .extend(effects.granted_fs_paths.write.iter().cloned());
    for (name, value) in &effects.injected_secrets {
        spec.env_injection.insert(name.clone(), value.clone());
    }

    // Network mode: graph grants force proxy; then the matched policy's
    // hint; then the known-network-command set; else none.
    let mode = if !effects.granted_network_patterns.is_empty() {
        NetworkMode::Proxy
    } else if let Some(access) = matched.and_then(|p| p.network_access) {
        match access {
            NetworkAccess::None => NetworkMode::None,
            NetworkAccess::Proxy => NetworkMode::Proxy,
            NetworkAccess::Direct => NetworkMode::Direct,
        }
    } else if KNOWN_NETWORK_COMMANDS
        .iter()
        .any(|c| basename.eq_ignore_ascii_case(c))
    {
        NetworkMode::Proxy
    } else {
        NetworkMode::None
    };

    match mode {
        NetworkMode::None => spec.network_allowed = false,
        NetworkMode::Direct => spec.network_allowed = true,
        // Proxy env is applied by the caller once a port is bound.
        NetworkMode::Proxy => {}
    }

    SandboxPlan {
        spec,
        mode,
        basename,
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Allowed binary locations: the shield binary directory plus the per-user
/// brew, nvm, and bin directories.
fn binary_dirs(paths: &SandboxPathsConfig, home: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(shield) = &paths.shield_bin_dir {
        dirs.push(shield.clone());
    }
    dirs.push(home.join("homebrew/bin"));
    dirs.push(home.join(".nvm"));
    dirs.push(home.join("bin"));
    dirs
}
