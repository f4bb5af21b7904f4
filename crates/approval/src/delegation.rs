//! Delegation chains: grantor→grantee links let a non-approver respond when
//! every hop consents and scope only narrows.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One delegation grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRule {
    /// Principal delegating authority.
    pub grantor: String,
    /// Principal receiving authority.
    pub grantee: String,
    /// Action-type scope the grant covers (`*`, `ads.*`, or exact).
    pub scope: String,
    /// Grant expiry (ms since epoch); `None` never expires.
    pub expires_at_ms: Option<u64>,
    /// Maximum hop depth this rule may appear at. Default 1: no re-delegation.
    pub max_chain_depth: u32,
}

impl DelegationRule {
    /// A direct, non-re-delegatable grant.
    pub fn direct(
        grantor: impl Into<String>,
        grantee: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            grantor: grantor.into(),
            grantee: grantee.into(),
            scope: scope.into(),
            expires_at_ms: None,
            max_chain_depth: 1,
        }
    }
}

/// Whether `outer` covers `inner` under prefix-wildcard semantics.
pub fn scope_covers(outer: &str, inner: &str) -> bool {
    if outer == "*" {
        return true;
    }
    if let Some(prefix) = outer.strip_suffix('*') {
        return inner.starts_with(prefix);
    }
    outer == inner
}

/// Intersect two scopes. `*` defers to the other; equal scopes hold; a
/// subset wins; disjoint scopes return `None`. Commutative and idempotent,
/// so a chain can only narrow.
pub fn narrow_scope(a: &str, b: &str) -> Option<String> {
    if a == "*" {
        return Some(b.to_string());
    }
    if b == "*" {
        return Some(a.to_string());
    }
    if a == b {
        return Some(a.to_string());
    }
    if scope_covers(a, b) {
        return Some(b.to_string());
    }
    if scope_covers(b, a) {
        return Some(a.to_string());
    }
    None
}

/// Options for chain resolution.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Overall hop ceiling regardless of per-rule depths.
    pub max_depth: u32,
    /// Resolution time (ms since epoch) for grant-expiry checks.
    pub now_ms: u64,
    /// Scope the responder must be authorized for, when known.
    pub required_scope: Option<String>,
}

impl ChainOptions {
    /// Default ceiling of 5 hops at the given time.
    pub fn at(now_ms: u64) -> Self {
        Self { max_depth: 5, now_ms, required_scope: None }
    }

    /// Require the effective scope to cover `scope`.
    pub fn with_required_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = Some(scope.into());
        self
    }
}

/// Result of walking the delegation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationResolution {
    /// Whether an authorized path to a listed approver exists.
    pub authorized: bool,
    /// Principals along the path, responder first, approver last.
    pub chain: Vec<String>,
    /// Hops used.
    pub depth: u32,
    /// Scope in effect at the end of the path.
    pub effective_scope: Option<String>,
}

impl DelegationResolution {
    fn unauthorized() -> Self {
        Self { authorized: false, chain: Vec::new(), depth: 0, effective_scope: None }
    }
}

/// BFS backward through `grantee → grantor` links from `principal`, looking
/// for any of `approver_ids`. Each hop must be unexpired, within the rule's
/// own depth limit, and narrow (never widen) the effective scope.
pub fn resolve_delegation_chain(
    principal: &str,
    approver_ids: &[String],
    rules: &[DelegationRule],
    options: &ChainOptions,
) -> DelegationResolution {
    if approver_ids.iter().any(|a| a == principal) {
        return DelegationResolution {
            authorized: true,
            chain: vec![principal.to_string()],
            depth: 0,
            effective_scope: Some("*".to_string()),
        };
    }

    // Frontier entries: (current principal, chain so far, scope so far).
    let mut frontier: Vec<(String, Vec<String>, String)> =
        vec![(principal.to_string(), vec![principal.to_string()], "*".to_string())];
    let mut visited: HashSet<String> = HashSet::from([principal.to_string()]);

    for depth in 1..=options.max_depth {
        let mut next = Vec::new();
        for (current, chain, scope) in &frontier {
            for rule in rules.iter().filter(|r| r.grantee == *current) {
                if let Some(expiry) = rule.expires_at_ms {
                    if expiry <= options.now_ms {
                        continue;
                    }
                }
                if depth > rule.max_chain_depth {
                    continue;
                }
                let Some(narrowed) = narrow_scope(scope, &rule.scope) else {
                    continue;
                };
                if visited.contains(&rule.grantor) {
                    continue;
                }
                let mut extended = chain.clone();
                extended.push(rule.grantor.clone());
                if approver_ids.iter().any(|a| *a == rule.grantor) {
                    let scope_ok = options
                        .required_scope
                        .as_deref()
                        .map_or(true, |req| scope_covers(&narrowed, req));
                    if scope_ok {
                        return DelegationResolution {
                            authorized: true,
                            chain: extended,
                            depth,
                            effective_scope: Some(narrowed),
                        };
                    }
                    continue;
                }
                visited.insert(rule.grantor.clone());
                next.push((rule.grantor.clone(), extended, narrowed));
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    DelegationResolution::unauthorized()
}
