//! Moderation and reporting lifecycles as pure transition functions.
//!
//! Entity state lives in the repository; this module only decides whether a
//! transition is legal and what the next state is, so the rules exist in one
//! place instead of being scattered across handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{ModerationStatus, ReportStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("only staff may moderate content")]
    NotStaff,
    #[error("content has already been moderated")]
    AlreadyDecided,
    #[error("report is already resolved")]
    AlreadyResolved,
}

/// What the caller must do with the record after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Persist the new status.
    Keep(ModerationStatus),
    /// Remove the record outright (rejected comments are not retained).
    Delete,
}

/// Legal image/tag transitions: `pending -> approved | rejected`, staff only.
/// Approved and rejected are terminal.
pub fn transition(
    current: ModerationStatus,
    decision: Decision,
    actor_is_staff: bool,
) -> Result<ModerationStatus, TransitionError> {
    if !actor_is_staff {
        return Err(TransitionError::NotStaff);
    }
    match current {
        ModerationStatus::Pending => Ok(match decision {
            Decision::Approve => ModerationStatus::Approved,
            Decision::Reject => ModerationStatus::Rejected,
        }),
        ModerationStatus::Approved | ModerationStatus::Rejected => {
            Err(TransitionError::AlreadyDecided)
        }
    }
}

/// Comment transitions follow the image rules, except rejection is
/// destructive: the comment is deleted rather than kept with a rejected tag.
pub fn transition_comment(
    current: ModerationStatus,
    decision: Decision,
    actor_is_staff: bool,
) -> Result<Outcome, TransitionError> {
    let next = transition(current, decision, actor_is_staff)?;
    Ok(match next {
        ModerationStatus::Rejected => Outcome::Delete,
        other => Outcome::Keep(other),
    })
}

/// Reports only ever move `pending -> resolved`, staff only, terminal.
pub fn resolve_report(
    current: ReportStatus,
    actor_is_staff: bool,
) -> Result<ReportStatus, TransitionError> {
    if !actor_is_staff {
        return Err(TransitionError::NotStaff);
    }
    match current {
        ReportStatus::Pending => Ok(ReportStatus::Resolved),
        ReportStatus::Resolved => Err(TransitionError::AlreadyResolved),
    }
}
