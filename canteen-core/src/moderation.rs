//! Pure moderation transition function.
//!
//! `transition` takes the current status of a store or review and an
//! administrator's decision, and says what (if anything) should change.
//! It has no side effects; the server persists the outcome and runs any
//! follow-up work after commit.

use crate::status::ModerationStatus;

/// An administrator's decision about a pending entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    /// Reason is already trimmed and non-empty.
    Reject { reason: String },
}

impl Decision {
    /// Build a rejection, trimming the reason. Blank reasons are refused.
    pub fn reject(reason: &str) -> Result<Self, ModerationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ModerationError::MissingReason);
        }
        Ok(Self::Reject {
            reason: reason.to_string(),
        })
    }

    /// Build a decision from the `{status, reason}` shape used on the wire.
    pub fn from_request(
        status: ModerationStatus,
        reason: Option<&str>,
    ) -> Result<Self, ModerationError> {
        match status {
            ModerationStatus::Approved => Ok(Self::Approve),
            ModerationStatus::Rejected => Self::reject(reason.unwrap_or_default()),
            ModerationStatus::Pending => Err(ModerationError::InvalidTarget(status)),
        }
    }

    /// The status this decision moves an entity to.
    pub fn target(&self) -> ModerationStatus {
        match self {
            Self::Approve => ModerationStatus::Approved,
            Self::Reject { .. } => ModerationStatus::Rejected,
        }
    }
}

/// Outcome of applying a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The entity already carries this decision; nothing to write.
    Unchanged,
    /// Write the new status and rejection reason (`None` clears it).
    Changed {
        status: ModerationStatus,
        rejection_reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModerationError {
    /// The entity already reached the other terminal status.
    #[error("already processed: entity is {current}")]
    AlreadyProcessed { current: ModerationStatus },
    #[error("a rejection reason is required")]
    MissingReason,
    #[error("cannot moderate to status '{0}'; expected approved or rejected")]
    InvalidTarget(ModerationStatus),
}

/// Apply `decision` to an entity currently in `current`.
///
/// - same terminal status: `Unchanged` (retry-safe)
/// - pending: `Changed`
/// - the other terminal status: `AlreadyProcessed`
pub fn transition(
    current: ModerationStatus,
    decision: &Decision,
) -> Result<Transition, ModerationError> {
    let target = decision.target();
    if !current.is_terminal() {
        return Ok(Transition::Changed {
            status: target,
            rejection_reason: match decision {
                Decision::Approve => None,
                Decision::Reject { reason } => Some(reason.clone()),
            },
        });
    }
    if current == target {
        Ok(Transition::Unchanged)
    } else {
        Err(ModerationError::AlreadyProcessed { current })
    }
}
