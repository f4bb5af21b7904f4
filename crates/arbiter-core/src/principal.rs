//! Principals: the callers and approvers the broker governs.

use serde::{Deserialize, Serialize};

/// Kind of principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    /// A human operator.
    User,
    /// An autonomous agent.
    Agent,
    /// Internal system identity (jobs, overrides).
    System,
}

/// A caller or approver identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Unique principal id.
    pub id: String,
    /// Principal kind.
    #[serde(rename = "type")]
    pub kind: PrincipalType,
    /// Owning organization.
    pub organization_id: String,
    /// Role names (opaque to the core).
    pub roles: Vec<String>,
}
