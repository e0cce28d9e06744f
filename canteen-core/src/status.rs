//! Moderation status shared by stores and reviews.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workflow state of a moderated entity.
///
/// Everything starts out `Pending`. `Approved` and `Rejected` are terminal
/// as far as moderation is concerned; only editing a review sends it back
/// to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub const ALL: [ModerationStatus; 3] = [Self::Pending, Self::Approved, Self::Rejected];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}' (expected pending, approved or rejected)")]
pub struct UnknownStatus(pub String);

impl FromStr for ModerationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_str() {
        for status in ModerationStatus::ALL {
            assert_eq!(status.as_str().parse::<ModerationStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            " Approved ".parse::<ModerationStatus>(),
            Ok(ModerationStatus::Approved)
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("archived".parse::<ModerationStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&ModerationStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
    }

    #[test]
    fn test_only_pending_is_not_terminal() {
        assert!(!ModerationStatus::Pending.is_terminal());
        assert!(ModerationStatus::Approved.is_terminal());
        assert!(ModerationStatus::Rejected.is_terminal());
    }
}
