//! Caller-scope resolution.
//!
//! A policy's scope restricts which callers it applies to. Scope matching is
//! permissive about unknown scope prefixes so that newer configuration can be
//! served to older daemons without silently dropping policies.

use super::{CallerType, ExecutionContext, Policy};

/// Structured form of a policy scope string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyScope {
    /// No scope: applies to every caller.
    Universal,
    /// Agent callers only (and no-context requests, which are agent-like).
    Agent,
    /// Any skill caller.
    AnySkill,
    /// A specific skill, by slug.
    Skill(String),
    /// Only when the enclosing exec's resolved basename matches. Never
    /// included via ordinary scope resolution; see [`aggregate_for_command`].
    Command(String),
    /// Unrecognized scope prefix, included for forward compatibility.
    Unknown(String),
}

impl PolicyScope {
    /// Parse an optional scope string.
    #[must_use]
    pub fn parse(scope: Option<&str>) -> Self {
        let Some(raw) = scope else {
            return Self::Universal;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Universal;
        }
        if raw == "agent" {
            return Self::Agent;
        }
        if raw == "skill" {
            return Self::AnySkill;
        }
        if let Some(slug) = raw.strip_prefix("skill:") {
            return Self::Skill(slug.to_string());
        }
        if let Some(basename) = raw.strip_prefix("command:") {
            return Self::Command(basename.to_string());
        }
        Self::Unknown(raw.to_string())
    }
}

/// Whether a policy's scope admits the given execution context.
///
/// Command-scoped policies are **never** admitted here; they participate only
/// in command-scoped aggregation for sandbox builds and per-run proxy slices.
#[must_use]
pub fn scope_matches(policy: &Policy, ctx: Option<&ExecutionContext>) -> bool {
    match policy.scope() {
        PolicyScope::Universal | PolicyScope::Unknown(_) => true,
        PolicyScope::Agent => {
            // No-context requests are treated as agent-like.
            !matches!(
                ctx.and_then(|c| c.caller_type),
                Some(CallerType::Skill)
            )
        }
        PolicyScope::AnySkill => {
            matches!(ctx.and_then(|c| c.caller_type), Some(CallerType::Skill))
        }
        PolicyScope::Skill(slug) => {
            matches!(ctx.and_then(|c| c.caller_type), Some(CallerType::Skill))
                && ctx
                    .and_then(|c| c.skill_slug.as_deref())
                    .is_some_and(|s| s.eq_ignore_ascii_case(&slug))
        }
        PolicyScope::Command(_) => false,
    }
}

/// Aggregate policies for an enclosing command: all universal policies first,
/// preserving their relative order, then command-scoped policies whose
/// basename equals the command's basename (case-insensitively).
///
/// The universal-before-command ordering is contractual; pattern
/// concatenations built from this aggregation observe it.
#[must_use]
pub fn aggregate_for_command<'a>(policies: &'a [Policy], basename: &str) -> Vec<&'a Policy> {
    let mut out: Vec<&Policy> = policies
        .iter()
        .filter(|p| matches!(p.scope(), PolicyScope::Universal))
        .collect();
    out.extend(policies.iter().filter(|p| {
        matches!(p.scope(), PolicyScope::Command(ref b) if b.eq_ignore_ascii_case(basename))
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyAction, PolicyTarget};

    fn policy(id: &str, scope: Option<&str>) -> Policy {
        Policy {
            id: id.into(),
            name: String::new(),
            action: PolicyAction::Allow,
            target: PolicyTarget::Url,
            patterns: vec!["example.com".into()],
            operations: vec![],
            enabled: true,
            priority: 0,
            scope: scope.map(String::from),
            network_access: None,
        }
    }

    // ── Scope parsing ─────────────────────────────────────────────────

    #[test]
    fn parse_scope_forms() {
        assert_eq!(PolicyScope::parse(None), PolicyScope::Universal);
        assert_eq!(PolicyScope::parse(Some("")), PolicyScope::Universal);
        assert_eq!(PolicyScope::parse(Some("agent")), PolicyScope::Agent);
        assert_eq!(PolicyScope::parse(Some("skill")), PolicyScope::AnySkill);
        assert_eq!(
            PolicyScope::parse(Some("skill:web-search")),
            PolicyScope::Skill("web-search".into())
        );
        assert_eq!(
            PolicyScope::parse(Some("command:curl")),
            PolicyScope::Command("curl".into())
        );
        assert_eq!(
            PolicyScope::parse(Some("tenant:acme")),
            PolicyScope::Unknown("tenant:acme".into())
        );
    }

    // ── Scope matching ────────────────────────────────────────────────

    #[test]
    fn universal_matches_everyone() {
        let p = policy("u", None);
        assert!(scope_matches(&p, None));
        assert!(scope_matches(&p, Some(&ExecutionContext::agent())));
        assert!(scope_matches(&p, Some(&ExecutionContext::skill("s"))));
    }

    #[test]
    fn agent_scope_includes_no_context_requests() {
        let p = policy("a", Some("agent"));
        assert!(scope_matches(&p, None));
        assert!(scope_matches(&p, Some(&ExecutionContext::agent())));
        assert!(!scope_matches(&p, Some(&ExecutionContext::skill("s"))));
    }

    #[test]
    fn skill_scope_requires_skill_caller() {
        let p = policy("s", Some("skill"));
        assert!(!scope_matches(&p, None));
        assert!(!scope_matches(&p, Some(&ExecutionContext::agent())));
        assert!(scope_matches(&p, Some(&ExecutionContext::skill("any"))));
    }

    #[test]
    fn skill_slug_scope_matches_case_insensitively() {
        let p = policy("s", Some("skill:Web-Search"));
        assert!(scope_matches(&p, Some(&ExecutionContext::skill("web-search"))));
        assert!(!scope_matches(&p, Some(&ExecutionContext::skill("other"))));
        assert!(!scope_matches(&p, Some(&ExecutionContext::agent())));
    }

    #[test]
    fn command_scope_never_matches_via_scope_resolution() {
        let p = policy("c", Some("command:curl"));
        assert!(!scope_matches(&p, None));
        assert!(!scope_matches(&p, Some(&ExecutionContext::agent())));
        assert!(!scope_matches(&p, Some(&ExecutionContext::skill("s"))));
    }

    #[test]
    fn unknown_scope_is_permissive() {
        let p = policy("x", Some("future:thing"));
        assert!(scope_matches(&p, None));
        assert!(scope_matches(&p, Some(&ExecutionContext::skill("s"))));
    }

    // ── Command aggregation ───────────────────────────────────────────

    #[test]
    fn universal_precede_command_scoped() {
        let policies = vec![
            policy("cmd-first", Some("command:curl")),
            policy("u1", None),
            policy("skill", Some("skill")),
            policy("u2", None),
            policy("cmd-second", Some("command:CURL")),
            policy("other-cmd", Some("command:wget")),
        ];
        let slice = aggregate_for_command(&policies, "curl");
        let ids: Vec<&str> = slice.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2", "cmd-first", "cmd-second"]);
    }

    #[test]
    fn aggregation_excludes_caller_scoped_policies() {
        let policies = vec![
            policy("agent", Some("agent")),
            policy("skill", Some("skill:web")),
            policy("u", None),
        ];
        let slice = aggregate_for_command(&policies, "git");
        let ids: Vec<&str> = slice.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["u"]);
    }
}
