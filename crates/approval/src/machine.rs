//! Approval state machine: transitions only from `pending`, optimistic
//! versioning, quorum accounting, and lazy expiry.

use crate::request::{
    binding_hash, ApprovalRequest, ApprovalState, ApprovalStatus, QuorumEntry,
};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Approval-layer errors; all leave the state unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    /// Writer observed an older version than the stored one.
    #[error("stale version: expected {expected}, found {found}")]
    StaleVersion {
        /// Version the writer supplied.
        expected: u64,
        /// Version actually stored.
        found: u64,
    },
    /// Transition attempted on a non-pending state.
    #[error("cannot transition approval in status {0}")]
    CannotTransition(&'static str),
    /// The approver already contributed a quorum entry.
    #[error("duplicate approver {0}")]
    DuplicateApprover(String),
    /// The response payload does not re-canonicalize to the bound hash.
    #[error("binding mismatch")]
    BindingMismatch,
    /// Patch responses are disallowed under quorum.
    #[error("patch is not supported under quorum")]
    PatchUnsupported,
    /// The pending window elapsed; only `expire` may run now.
    #[error("approval window elapsed")]
    Expired,
}

/// Lazy expiry check: pending and strictly past the deadline.
pub fn is_expired(state: &ApprovalState, now_ms: u64) -> bool {
    state.status == ApprovalStatus::Pending && now_ms > state.expires_at_ms
}

fn guard(state: &ApprovalState, expected_version: u64, now_ms: u64) -> Result<(), ApprovalError> {
    if state.version != expected_version {
        return Err(ApprovalError::StaleVersion { expected: expected_version, found: state.version });
    }
    if state.status != ApprovalStatus::Pending {
        return Err(ApprovalError::CannotTransition(state.status.as_str()));
    }
    if is_expired(state, now_ms) {
        return Err(ApprovalError::Expired);
    }
    Ok(())
}

fn verify_binding(
    request: &ApprovalRequest,
    supplied_hash: Option<&str>,
) -> Result<(), ApprovalError> {
    match supplied_hash {
        Some(h) if h != request.binding_hash => Err(ApprovalError::BindingMismatch),
        _ => Ok(()),
    }
}

/// Approve. Under quorum, appends a distinct entry and transitions once the
/// Nth distinct approver lands; otherwise transitions immediately.
pub fn approve(
    request: &ApprovalRequest,
    state: &mut ApprovalState,
    approver_id: &str,
    supplied_hash: Option<&str>,
    expected_version: u64,
    now_ms: u64,
) -> Result<ApprovalStatus, ApprovalError> {
    guard(state, expected_version, now_ms)?;
    verify_binding(request, supplied_hash)?;

    if let Some(progress) = &mut state.quorum {
        if progress.entries.iter().any(|e| e.approver_id == approver_id) {
            return Err(ApprovalError::DuplicateApprover(approver_id.to_string()));
        }
        progress.entries.push(QuorumEntry {
            approver_id: approver_id.to_string(),
            binding_hash: request.binding_hash.clone(),
            approved_at_ms: now_ms,
        });
        if (progress.entries.len() as u32) < progress.required {
            state.version += 1;
            return Ok(ApprovalStatus::Pending);
        }
    }

    state.status = ApprovalStatus::Approved;
    state.responded_by = Some(approver_id.to_string());
    state.responded_at_ms = Some(now_ms);
    state.version += 1;
    Ok(ApprovalStatus::Approved)
}

/// Reject. Short-circuits quorum.
pub fn reject(
    request: &ApprovalRequest,
    state: &mut ApprovalState,
    approver_id: &str,
    supplied_hash: Option<&str>,
    expected_version: u64,
    now_ms: u64,
) -> Result<ApprovalStatus, ApprovalError> {
    guard(state, expected_version, now_ms)?;
    verify_binding(request, supplied_hash)?;
    state.status = ApprovalStatus::Rejected;
    state.responded_by = Some(approver_id.to_string());
    state.responded_at_ms = Some(now_ms);
    state.version += 1;
    Ok(ApprovalStatus::Rejected)
}

/// Approve with a payload patch. The patch must re-canonicalize to the bound
/// hash, so only formatting-equivalent payloads pass. Disallowed under quorum.
pub fn patch(
    request: &ApprovalRequest,
    state: &mut ApprovalState,
    approver_id: &str,
    patch_value: JsonValue,
    action_type: &str,
    principal_id: &str,
    cartridge_id: &str,
    expected_version: u64,
    now_ms: u64,
) -> Result<ApprovalStatus, ApprovalError> {
    guard(state, expected_version, now_ms)?;
    if state.quorum.is_some() {
        return Err(ApprovalError::PatchUnsupported);
    }
    let patched_hash = binding_hash(action_type, &patch_value, principal_id, cartridge_id);
    if patched_hash != request.binding_hash {
        return Err(ApprovalError::BindingMismatch);
    }
    state.status = ApprovalStatus::Patched;
    state.responded_by = Some(approver_id.to_string());
    state.responded_at_ms = Some(now_ms);
    state.patch_value = Some(patch_value);
    state.version += 1;
    Ok(ApprovalStatus::Patched)
}

/// Expire a stale pending state. Used by the expiry job and lazy reads.
pub fn expire(
    state: &mut ApprovalState,
    expected_version: u64,
    now_ms: u64,
) -> Result<ApprovalStatus, ApprovalError> {
    if state.version != expected_version {
        return Err(ApprovalError::StaleVersion { expected: expected_version, found: state.version });
    }
    if state.status != ApprovalStatus::Pending {
        return Err(ApprovalError::CannotTransition(state.status.as_str()));
    }
    if now_ms <= state.expires_at_ms {
        return Err(ApprovalError::CannotTransition("pending"));
    }
    state.status = ApprovalStatus::Expired;
    state.responded_at_ms = Some(now_ms);
    state.version += 1;
    Ok(ApprovalStatus::Expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QuorumRule;
    use arbiter_core::governance::ApprovalLevel;
    use arbiter_core::risk::RiskCategory;
    use serde_json::json;

    fn fixture(quorum: Option<QuorumRule>) -> (ApprovalRequest, ApprovalState) {
        ApprovalRequest::create(
            "act-1",
            "env-1",
            "org-1",
            "pause camp_123",
            RiskCategory::Medium,
            ApprovalLevel::Standard,
            "ads.campaign.pause",
            &json!({"campaignId": "camp_123"}),
            "default",
            "ads-spend",
            vec!["alice".into(), "bob".into(), "carol".into()],
            None,
            10_000,
            quorum,
            1_000,
        )
    }

    #[test]
    fn single_approver_approves() {
        let (req, mut state) = fixture(None);
        let status = approve(&req, &mut state, "alice", None, 1, 2_000).unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
        assert_eq!(state.version, 2);
        assert_eq!(state.responded_by.as_deref(), Some("alice"));
    }

    #[test]
    fn transitions_only_from_pending() {
        let (req, mut state) = fixture(None);
        approve(&req, &mut state, "alice", None, 1, 2_000).unwrap();
        let err = approve(&req, &mut state, "bob", None, 2, 2_100).unwrap_err();
        assert_eq!(err, ApprovalError::CannotTransition("approved"));
    }

    #[test]
    fn stale_version_is_rejected() {
        let (req, mut state) = fixture(None);
        let err = approve(&req, &mut state, "alice", None, 7, 2_000).unwrap_err();
        assert!(matches!(err, ApprovalError::StaleVersion { expected: 7, found: 1 }));
        assert_eq!(state.status, ApprovalStatus::Pending);
    }

    #[test]
    fn binding_hash_is_verified_when_supplied() {
        let (req, mut state) = fixture(None);
        let err =
            approve(&req, &mut state, "alice", Some("deadbeef"), 1, 2_000).unwrap_err();
        assert_eq!(err, ApprovalError::BindingMismatch);
        let ok = approve(&req, &mut state, "alice", Some(req.binding_hash.as_str()), 1, 2_000);
        assert!(ok.is_ok());
    }

    #[test]
    fn quorum_approves_on_nth_distinct() {
        let (req, mut state) = fixture(Some(QuorumRule { required: 2 }));
        let first = approve(&req, &mut state, "alice", None, 1, 2_000).unwrap();
        assert_eq!(first, ApprovalStatus::Pending);
        let second = approve(&req, &mut state, "bob", None, 2, 2_100).unwrap();
        assert_eq!(second, ApprovalStatus::Approved);
        // The (N+1)th responder acts on a settled state.
        let err = approve(&req, &mut state, "carol", None, 3, 2_200).unwrap_err();
        assert_eq!(err, ApprovalError::CannotTransition("approved"));
    }

    #[test]
    fn quorum_rejects_duplicate_approver() {
        let (req, mut state) = fixture(Some(QuorumRule { required: 2 }));
        approve(&req, &mut state, "alice", None, 1, 2_000).unwrap();
        let err = approve(&req, &mut state, "alice", None, 2, 2_100).unwrap_err();
        assert_eq!(err, ApprovalError::DuplicateApprover("alice".into()));
        assert_eq!(state.quorum.as_ref().unwrap().entries.len(), 1);
    }

    #[test]
    fn any_reject_short_circuits_quorum() {
        let (req, mut state) = fixture(Some(QuorumRule { required: 3 }));
        approve(&req, &mut state, "alice", None, 1, 2_000).unwrap();
        let status = reject(&req, &mut state, "bob", None, 2, 2_100).unwrap();
        assert_eq!(status, ApprovalStatus::Rejected);
    }

    #[test]
    fn patch_requires_equal_canonical_form() {
        let (req, mut state) = fixture(None);
        // Same value, different key order: equal canonical form.
        let equal: serde_json::Value =
            serde_json::from_str(r#"{"campaignId": "camp_123"}"#).unwrap();
        let status = patch(
            &req, &mut state, "alice", equal, "ads.campaign.pause", "default", "ads-spend", 1,
            2_000,
        )
        .unwrap();
        assert_eq!(status, ApprovalStatus::Patched);
    }

    #[test]
    fn patch_with_changed_payload_is_binding_mismatch() {
        let (req, mut state) = fixture(None);
        let err = patch(
            &req,
            &mut state,
            "alice",
            json!({"campaignId": "camp_999"}),
            "ads.campaign.pause",
            "default",
            "ads-spend",
            1,
            2_000,
        )
        .unwrap_err();
        assert_eq!(err, ApprovalError::BindingMismatch);
    }

    #[test]
    fn patch_is_disallowed_under_quorum() {
        let (req, mut state) = fixture(Some(QuorumRule { required: 2 }));
        let err = patch(
            &req,
            &mut state,
            "alice",
            json!({"campaignId": "camp_123"}),
            "ads.campaign.pause",
            "default",
            "ads-spend",
            1,
            2_000,
        )
        .unwrap_err();
        assert_eq!(err, ApprovalError::PatchUnsupported);
    }

    #[test]
    fn approve_at_the_deadline_still_lands() {
        let (req, mut state) = fixture(None);
        let deadline = state.expires_at_ms;
        let status = approve(&req, &mut state, "alice", None, 1, deadline).unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
        let _ = req;
    }

    #[test]
    fn approve_past_the_deadline_is_expired() {
        let (req, mut state) = fixture(None);
        let past_deadline = state.expires_at_ms + 1;
        let err = approve(&req, &mut state, "alice", None, 1, past_deadline).unwrap_err();
        assert_eq!(err, ApprovalError::Expired);
        // Only expire may run now.
        let status = expire(&mut state, 1, past_deadline).unwrap();
        assert_eq!(status, ApprovalStatus::Expired);
        let _ = req;
    }

    #[test]
    fn expire_refuses_before_deadline() {
        let (_req, mut state) = fixture(None);
        let deadline = state.expires_at_ms;
        assert!(expire(&mut state, 1, deadline).is_err());
    }
}
