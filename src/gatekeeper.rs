//! Review policy seam
//!
//! Approval policy evaluation lives outside the engine. The engine only asks
//! a [`Gatekeeper`] for a verdict and derives the request status from it.

use crate::types::{PullRequest, ReviewResult};

/// Verdict of a gatekeeper, with human-readable reasons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// All requirements are met
    Passed(Vec<String>),
    /// Waiting on reviews
    Pending(Vec<String>),
    /// Changes were requested; the source branch must be updated
    Failed(Vec<String>),
}

impl GateVerdict {
    /// Reasons attached to the verdict
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Passed(reasons) | Self::Pending(reasons) | Self::Failed(reasons) => reasons,
        }
    }

    /// Whether integration is allowed
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed(_))
    }
}

/// Evaluates whether a request is approved for integration
pub trait Gatekeeper: Send + Sync {
    /// Check the request against the review policy
    fn check(&self, request: &PullRequest) -> GateVerdict;
}

/// Gatekeeper that approves every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPass;

impl Gatekeeper for AlwaysPass {
    fn check(&self, _request: &PullRequest) -> GateVerdict {
        GateVerdict::Passed(vec!["No review required".to_string()])
    }
}

/// Requires an approval of the latest update from every invited reviewer
///
/// A disapproval of the latest update fails the gate. Reviews of earlier
/// updates do not count: a new push asks everyone to look again.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewGatekeeper;

impl Gatekeeper for ReviewGatekeeper {
    fn check(&self, request: &PullRequest) -> GateVerdict {
        let Some(latest) = request.latest_update() else {
            return GateVerdict::Pending(vec!["No update to review".to_string()]);
        };

        let mut approved = Vec::new();
        let mut pending = Vec::new();
        let mut disapproved = Vec::new();

        for invitation in request.review_invitations.iter().filter(|i| !i.excluded) {
            let result = request
                .reviews
                .iter()
                .filter(|r| {
                    r.reviewer == invitation.reviewer && r.update_sequence == latest.sequence
                })
                .max_by_key(|r| r.date)
                .map(|r| r.result);

            match result {
                Some(ReviewResult::Approve) => {
                    approved.push(format!("Approved by {}", invitation.reviewer));
                }
                Some(ReviewResult::Disapprove) => {
                    disapproved.push(format!("Disapproved by {}", invitation.reviewer));
                }
                None => pending.push(format!("To be approved by {}", invitation.reviewer)),
            }
        }

        if !disapproved.is_empty() {
            GateVerdict::Failed(disapproved)
        } else if !pending.is_empty() {
            GateVerdict::Pending(pending)
        } else {
            GateVerdict::Passed(approved)
        }
    }
}
