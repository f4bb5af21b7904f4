//! In-memory store implementations (tests and degraded bootstrap mode).

use crate::error::StorageError;
use crate::traits::{
    ApprovalStore, CompetenceStore, EnvelopeFilter, EnvelopeStore, IdentityStore, PolicyStore,
};
use approval::{ApprovalRequest, ApprovalState, ApprovalStatus, DelegationRule};
use arbiter_core::envelope::ActionEnvelope;
use arbiter_core::governance::GovernanceProfile;
use arbiter_core::principal::Principal;
use async_trait::async_trait;
use competence::CompetenceRecord;
use dashmap::DashMap;
use identity::{IdentitySpec, RoleOverlay};
use policy::Policy;
use std::sync::RwLock;

/// In-memory envelope store.
#[derive(Default)]
pub struct InMemoryEnvelopeStore {
    envelopes: DashMap<String, ActionEnvelope>,
}

impl InMemoryEnvelopeStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeStore for InMemoryEnvelopeStore {
    async fn create(&self, envelope: ActionEnvelope) -> Result<(), StorageError> {
        self.envelopes.insert(envelope.id.clone(), envelope);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ActionEnvelope, StorageError> {
        self.envelopes
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| StorageError::NotFound { kind: "envelope", id: id.to_string() })
    }

    async fn update(
        &self,
        envelope: ActionEnvelope,
        observed_version: u64,
    ) -> Result<(), StorageError> {
        let mut entry = self
            .envelopes
            .get_mut(&envelope.id)
            .ok_or_else(|| StorageError::NotFound { kind: "envelope", id: envelope.id.clone() })?;
        if entry.version != observed_version {
            return Err(StorageError::StaleVersion {
                kind: "envelope",
                id: envelope.id.clone(),
                expected: observed_version,
                found: entry.version,
            });
        }
        *entry = envelope;
        Ok(())
    }

    async fn list(&self, filter: &EnvelopeFilter) -> Result<Vec<ActionEnvelope>, StorageError> {
        let mut out: Vec<ActionEnvelope> = self
            .envelopes
            .iter()
            .filter(|e| {
                filter.principal_id.as_deref().map_or(true, |p| e.principal_id == p)
                    && filter.organization_id.as_deref().map_or(true, |o| e.organization_id == o)
                    && filter.status.map_or(true, |s| e.status == s)
            })
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

/// In-memory policy store.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<String, Policy>,
}

impl InMemoryPolicyStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn upsert(&self, policy: Policy) -> Result<(), StorageError> {
        self.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.policies.remove(id).is_some())
    }

    async fn for_scope(
        &self,
        cartridge_id: &str,
        organization_id: &str,
    ) -> Result<Vec<Policy>, StorageError> {
        let mut out: Vec<Policy> = self
            .policies
            .iter()
            .filter(|p| p.applies_to(cartridge_id, organization_id))
            .map(|p| p.clone())
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

/// In-memory identity store.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    specs: DashMap<String, IdentitySpec>,
    overlays: DashMap<String, Vec<RoleOverlay>>,
    principals: DashMap<String, Principal>,
    delegations: RwLock<Vec<DelegationRule>>,
    org_profiles: DashMap<String, GovernanceProfile>,
}

impl InMemoryIdentityStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn spec_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Option<IdentitySpec>, StorageError> {
        Ok(self.specs.get(principal_id).map(|s| s.clone()))
    }

    async fn upsert_spec(&self, spec: IdentitySpec) -> Result<(), StorageError> {
        self.specs.insert(spec.principal_id.clone(), spec);
        Ok(())
    }

    async fn overlays_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Vec<RoleOverlay>, StorageError> {
        Ok(self.overlays.get(principal_id).map(|o| o.clone()).unwrap_or_default())
    }

    async fn upsert_overlay(
        &self,
        principal_id: &str,
        overlay: RoleOverlay,
    ) -> Result<(), StorageError> {
        let mut entry = self.overlays.entry(principal_id.to_string()).or_default();
        entry.retain(|o| o.id != overlay.id);
        entry.push(overlay);
        Ok(())
    }

    async fn principal(&self, id: &str) -> Result<Option<Principal>, StorageError> {
        Ok(self.principals.get(id).map(|p| p.clone()))
    }

    async fn upsert_principal(&self, principal: Principal) -> Result<(), StorageError> {
        self.principals.insert(principal.id.clone(), principal);
        Ok(())
    }

    async fn delegation_rules(&self) -> Result<Vec<DelegationRule>, StorageError> {
        Ok(self.delegations.read().expect("delegation lock poisoned").clone())
    }

    async fn add_delegation_rule(&self, rule: DelegationRule) -> Result<(), StorageError> {
        self.delegations.write().expect("delegation lock poisoned").push(rule);
        Ok(())
    }

    async fn organization_profile(
        &self,
        organization_id: &str,
    ) -> Result<Option<GovernanceProfile>, StorageError> {
        Ok(self.org_profiles.get(organization_id).map(|p| *p))
    }

    async fn set_organization_profile(
        &self,
        organization_id: &str,
        profile: GovernanceProfile,
    ) -> Result<(), StorageError> {
        self.org_profiles.insert(organization_id.to_string(), profile);
        Ok(())
    }
}

/// In-memory approval store.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    approvals: DashMap<String, (ApprovalRequest, ApprovalState)>,
}

impl InMemoryApprovalStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create(
        &self,
        request: ApprovalRequest,
        state: ApprovalState,
    ) -> Result<(), StorageError> {
        self.approvals.insert(request.id.clone(), (request, state));
        Ok(())
    }

    async fn get(
        &self,
        id: &str,
    ) -> Result<Option<(ApprovalRequest, ApprovalState)>, StorageError> {
        Ok(self.approvals.get(id).map(|e| e.clone()))
    }

    async fn update_state(
        &self,
        state: ApprovalState,
        observed_version: u64,
    ) -> Result<(), StorageError> {
        let mut entry = self.approvals.get_mut(&state.approval_id).ok_or_else(|| {
            StorageError::NotFound { kind: "approval", id: state.approval_id.clone() }
        })?;
        if entry.1.version != observed_version {
            return Err(StorageError::StaleVersion {
                kind: "approval",
                id: state.approval_id.clone(),
                expected: observed_version,
                found: entry.1.version,
            });
        }
        entry.1 = state;
        Ok(())
    }

    async fn list_pending(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<(ApprovalRequest, ApprovalState)>, StorageError> {
        let mut out: Vec<(ApprovalRequest, ApprovalState)> = self
            .approvals
            .iter()
            .filter(|e| {
                e.1.status == ApprovalStatus::Pending
                    && organization_id.map_or(true, |o| e.0.organization_id == o)
            })
            .map(|e| e.clone())
            .collect();
        out.sort_by(|a, b| a.0.created_at_ms.cmp(&b.0.created_at_ms));
        Ok(out)
    }
}

/// In-memory competence store.
#[derive(Default)]
pub struct InMemoryCompetenceStore {
    records: DashMap<(String, String), CompetenceRecord>,
}

impl InMemoryCompetenceStore {
    /// Fresh empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompetenceStore for InMemoryCompetenceStore {
    async fn get(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Option<CompetenceRecord>, StorageError> {
        Ok(self
            .records
            .get(&(principal_id.to_string(), action_type.to_string()))
            .map(|r| r.clone()))
    }

    async fn put(&self, record: CompetenceRecord) -> Result<(), StorageError> {
        self.records
            .insert((record.principal_id.clone(), record.action_type.clone()), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::envelope::{EnvelopeStatus, Proposal};
    use arbiter_core::governance::ApprovalLevel;
    use arbiter_core::risk::RiskCategory;
    use serde_json::json;

    fn envelope(principal: &str, now: u64) -> ActionEnvelope {
        ActionEnvelope::new_proposed(
            principal,
            "org-1",
            "ads-spend",
            Proposal {
                id: format!("act-{}", now),
                action_type: "ads.campaign.pause".into(),
                parameters: json!({"campaignId": "camp_123"}),
                evidence: vec![],
                confidence: 1.0,
            },
            None,
            now,
        )
    }

    #[tokio::test]
    async fn envelope_update_enforces_version() {
        let store = InMemoryEnvelopeStore::new();
        let mut env = envelope("agent-1", 1_000);
        store.create(env.clone()).await.unwrap();
        let observed = env.version;
        env.transition(EnvelopeStatus::Approved, 1_001).unwrap();
        store.update(env.clone(), observed).await.unwrap();
        // A writer holding the old version loses.
        let mut stale = store.get(&env.id).await.unwrap();
        stale.transition(EnvelopeStatus::Executing, 1_002).unwrap();
        let err = store.update(stale, observed).await.unwrap_err();
        assert!(matches!(err, StorageError::StaleVersion { .. }));
    }

    #[tokio::test]
    async fn envelope_filter_and_limit() {
        let store = InMemoryEnvelopeStore::new();
        for i in 0..5 {
            store.create(envelope("agent-1", 1_000 + i)).await.unwrap();
        }
        store.create(envelope("agent-2", 9_000)).await.unwrap();
        let filter = EnvelopeFilter {
            principal_id: Some("agent-1".into()),
            limit: Some(3),
            ..Default::default()
        };
        let got = store.list(&filter).await.unwrap();
        assert_eq!(got.len(), 3);
        // Newest first.
        assert!(got[0].created_at_ms >= got[1].created_at_ms);
    }

    #[tokio::test]
    async fn policy_scope_includes_globals_sorted() {
        let store = InMemoryPolicyStore::new();
        let mk = |id: &str, priority: i32, cart: Option<&str>| policy::Policy {
            id: id.into(),
            priority,
            active: true,
            cartridge_id: cart.map(str::to_string),
            organization_id: None,
            rule: policy::Rule::Leaf {
                field: "action_type".into(),
                operator: policy::Operator::Prefix,
                value: json!("ads."),
            },
            effect: policy::PolicyEffect::Allow,
            approval_requirement: None,
            transform: None,
            description: None,
        };
        store.upsert(mk("global-low", 5, None)).await.unwrap();
        store.upsert(mk("ads-only", 10, Some("ads-spend"))).await.unwrap();
        store.upsert(mk("other-cart", 1, Some("payments"))).await.unwrap();
        let got = store.for_scope("ads-spend", "org-1").await.unwrap();
        let ids: Vec<&str> = got.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["global-low", "ads-only"]);
    }

    #[tokio::test]
    async fn identity_store_roundtrips() {
        let store = InMemoryIdentityStore::new();
        store
            .upsert_principal(Principal {
                id: "agent-1".into(),
                kind: arbiter_core::principal::PrincipalType::Agent,
                organization_id: "org-1".into(),
                roles: vec!["optimizer".into()],
            })
            .await
            .unwrap();
        let p = store.principal("agent-1").await.unwrap().unwrap();
        assert_eq!(p.organization_id, "org-1");
        assert!(store.principal("ghost").await.unwrap().is_none());

        store
            .upsert_spec(identity::IdentitySpec::guarded("spec-1", "agent-1", "org-1"))
            .await
            .unwrap();
        assert!(store.spec_for_principal("agent-1").await.unwrap().is_some());

        store.add_delegation_rule(approval::DelegationRule::direct("a", "b", "*")).await.unwrap();
        assert_eq!(store.delegation_rules().await.unwrap().len(), 1);

        assert!(store.organization_profile("org-1").await.unwrap().is_none());
        store.set_organization_profile("org-1", GovernanceProfile::Locked).await.unwrap();
        assert_eq!(
            store.organization_profile("org-1").await.unwrap(),
            Some(GovernanceProfile::Locked)
        );
    }

    #[tokio::test]
    async fn approval_state_update_enforces_version() {
        let store = InMemoryApprovalStore::new();
        let (req, mut state) = ApprovalRequest::create(
            "act-1",
            "env-1",
            "org-1",
            "s",
            RiskCategory::Medium,
            ApprovalLevel::Standard,
            "ads.campaign.pause",
            &json!({"campaignId": "camp_123"}),
            "agent-1",
            "ads-spend",
            vec!["alice".into()],
            None,
            10_000,
            None,
            1_000,
        );
        store.create(req.clone(), state.clone()).await.unwrap();
        let observed = state.version;
        state.version += 1;
        store.update_state(state.clone(), observed).await.unwrap();
        let err = store.update_state(state.clone(), observed).await.unwrap_err();
        assert!(matches!(err, StorageError::StaleVersion { .. }));
        assert_eq!(store.list_pending(Some("org-1")).await.unwrap().len(), 1);
        assert!(store.list_pending(Some("org-other")).await.unwrap().is_empty());
    }
}
