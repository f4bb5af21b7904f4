//! Async store traits.

use crate::error::StorageError;
use approval::{ApprovalRequest, ApprovalState, DelegationRule};
use arbiter_core::envelope::{ActionEnvelope, EnvelopeStatus};
use arbiter_core::governance::GovernanceProfile;
use arbiter_core::principal::Principal;
use async_trait::async_trait;
use competence::CompetenceRecord;
use identity::{IdentitySpec, RoleOverlay};
use policy::Policy;

/// Filter for envelope listings.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeFilter {
    /// Restrict to a principal.
    pub principal_id: Option<String>,
    /// Restrict to an organization.
    pub organization_id: Option<String>,
    /// Restrict to a status.
    pub status: Option<EnvelopeStatus>,
    /// Cap the result count (newest first).
    pub limit: Option<usize>,
}

/// Envelope persistence.
///
/// `update` takes the version the writer observed before mutating; a
/// mismatch returns [`StorageError::StaleVersion`] and writes nothing.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Persist a fresh envelope.
    async fn create(&self, envelope: ActionEnvelope) -> Result<(), StorageError>;

    /// Load by id.
    async fn get(&self, id: &str) -> Result<ActionEnvelope, StorageError>;

    /// Replace an envelope, guarded by the previously-observed version.
    async fn update(
        &self,
        envelope: ActionEnvelope,
        observed_version: u64,
    ) -> Result<(), StorageError>;

    /// List envelopes matching a filter, newest first.
    async fn list(&self, filter: &EnvelopeFilter) -> Result<Vec<ActionEnvelope>, StorageError>;
}

/// Policy persistence. Scope queries include globals (`None` cartridge/org)
/// and return ascending priority with deterministic id tie-break.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Insert or replace a policy.
    async fn upsert(&self, policy: Policy) -> Result<(), StorageError>;

    /// Delete by id; returns whether one existed.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// Policies applying to (cartridge, organization), globals included.
    async fn for_scope(
        &self,
        cartridge_id: &str,
        organization_id: &str,
    ) -> Result<Vec<Policy>, StorageError>;
}

/// Identity persistence: specs, overlays, principals, delegations, and
/// organization-level governance-profile overrides.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Spec governing a principal, when one exists.
    async fn spec_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Option<IdentitySpec>, StorageError>;

    /// Insert or replace a spec.
    async fn upsert_spec(&self, spec: IdentitySpec) -> Result<(), StorageError>;

    /// Overlays attached to a principal.
    async fn overlays_for_principal(
        &self,
        principal_id: &str,
    ) -> Result<Vec<RoleOverlay>, StorageError>;

    /// Attach an overlay to a principal.
    async fn upsert_overlay(
        &self,
        principal_id: &str,
        overlay: RoleOverlay,
    ) -> Result<(), StorageError>;

    /// Principal lookup.
    async fn principal(&self, id: &str) -> Result<Option<Principal>, StorageError>;

    /// Insert or replace a principal.
    async fn upsert_principal(&self, principal: Principal) -> Result<(), StorageError>;

    /// All delegation rules (the resolver filters).
    async fn delegation_rules(&self) -> Result<Vec<DelegationRule>, StorageError>;

    /// Add a delegation rule.
    async fn add_delegation_rule(&self, rule: DelegationRule) -> Result<(), StorageError>;

    /// Organization-level governance-profile override, when set.
    async fn organization_profile(
        &self,
        organization_id: &str,
    ) -> Result<Option<GovernanceProfile>, StorageError>;

    /// Set the organization-level governance profile (emergency halt).
    async fn set_organization_profile(
        &self,
        organization_id: &str,
        profile: GovernanceProfile,
    ) -> Result<(), StorageError>;
}

/// Approval persistence. State updates are version-guarded.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persist a request and its initial state.
    async fn create(
        &self,
        request: ApprovalRequest,
        state: ApprovalState,
    ) -> Result<(), StorageError>;

    /// Load request + state by id.
    async fn get(&self, id: &str)
        -> Result<Option<(ApprovalRequest, ApprovalState)>, StorageError>;

    /// Replace the state, guarded by the previously-observed version.
    async fn update_state(
        &self,
        state: ApprovalState,
        observed_version: u64,
    ) -> Result<(), StorageError>;

    /// All pending approvals, optionally scoped to an organization.
    async fn list_pending(
        &self,
        organization_id: Option<&str>,
    ) -> Result<Vec<(ApprovalRequest, ApprovalState)>, StorageError>;
}

/// Competence persistence.
#[async_trait]
pub trait CompetenceStore: Send + Sync {
    /// Record for (principal, action type), when one exists.
    async fn get(
        &self,
        principal_id: &str,
        action_type: &str,
    ) -> Result<Option<CompetenceRecord>, StorageError>;

    /// Insert or replace a record.
    async fn put(&self, record: CompetenceRecord) -> Result<(), StorageError>;
}
