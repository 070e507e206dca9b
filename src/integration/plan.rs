//! Integration planning - pure functions deciding how to integrate
//!
//! Nothing here touches a repository. The commit graph facts a decision
//! depends on are gathered beforehand by the executor and passed in, which
//! keeps every strategy's branching logic unit testable.

use crate::error::{Error, Result};
use crate::types::{CommitId, IntegrationPreview, IntegrationStrategy, PullRequest, RequestId};
use crate::vcs::FastForwardMode;

/// Request data a preview is computed from
#[derive(Debug, Clone)]
pub struct PreviewInput {
    /// Request id, used in generated messages
    pub request_id: RequestId,
    /// Request title
    pub title: String,
    /// Request description
    pub description: Option<String>,
    /// Strategy to preview
    pub strategy: IntegrationStrategy,
    /// Current head of the target branch
    pub target_head: CommitId,
    /// Head of the request's latest update
    pub request_head: CommitId,
}

impl PreviewInput {
    /// Collect the input for `request` against the given target head
    pub fn new(request: &PullRequest, target_head: CommitId) -> Result<Self> {
        let request_head = request
            .request_head()
            .cloned()
            .ok_or_else(|| Error::Internal(format!("pull request #{} has no update", request.id)))?;
        Ok(Self {
            request_id: request.id,
            title: request.title.clone(),
            description: request.description.clone(),
            strategy: request.strategy,
            target_head,
            request_head,
        })
    }
}

/// Commit graph facts about the target and request heads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphFacts {
    /// Target head is an ancestor of (or equal to) the request head
    pub target_is_ancestor: bool,
    /// Commits on the request head not reachable from the target head.
    /// Only gathered when the decision needs it.
    pub commits_ahead: Option<usize>,
}

impl GraphFacts {
    /// Whether planning `strategy` needs [`commits_ahead`](Self::commits_ahead)
    pub const fn needs_commit_count(
        strategy: IntegrationStrategy,
        target_is_ancestor: bool,
    ) -> bool {
        target_is_ancestor && matches!(strategy, IntegrationStrategy::MergeWithSquash)
    }
}

/// Operation run inside the ephemeral clone, on top of the checked out commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOperation {
    /// Cherry-pick the commits of `head` missing from `upstream`
    CherryPick {
        /// Commits already present
        upstream: CommitId,
        /// Tip of the commits to replay
        head: CommitId,
    },
    /// Squash `commit` into a single new commit
    Squash {
        /// Commit to squash
        commit: CommitId,
        /// Message of the squashed commit
        message: String,
    },
    /// Merge `commit`
    Merge {
        /// Commit to merge
        commit: CommitId,
        /// Fast-forward behavior
        mode: FastForwardMode,
        /// Message of the merge commit
        message: String,
    },
}

/// How to produce the integrated commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewPlan {
    /// The request head already is the integrated result
    FastForward(CommitId),
    /// Clone the target repository, check out `checkout` and run `operation`
    InClone {
        /// Commit to reset the clone to
        checkout: CommitId,
        /// What to do on top of it
        operation: CloneOperation,
    },
}

impl std::fmt::Display for PreviewPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FastForward(commit) => write!(f, "fast-forward to {}", commit.short()),
            Self::InClone {
                checkout,
                operation,
            } => {
                let what = match operation {
                    CloneOperation::CherryPick { .. } => "cherry-pick",
                    CloneOperation::Squash { .. } => "squash",
                    CloneOperation::Merge {
                        mode: FastForwardMode::FastForward,
                        ..
                    } => "merge",
                    CloneOperation::Merge {
                        mode: FastForwardMode::NoFastForward,
                        ..
                    } => "merge --no-ff",
                };
                write!(f, "{what} on {}", checkout.short())
            }
        }
    }
}

/// Message of a squashed commit
pub fn squash_message(request_id: RequestId, title: &str, description: Option<&str>) -> String {
    let mut message = format!("{title}\n\n");
    if let Some(description) = description {
        message.push_str(description);
        message.push_str("\n\n");
    }
    message.push_str(&format!("(squashed commit of pull request #{request_id})\n"));
    message
}

/// Message of a merge commit
pub fn merge_message(request_id: RequestId, title: &str) -> String {
    format!("Merge pull request #{request_id}\n\n{title}\n")
}

/// Decide how to compute the preview (PURE)
pub fn plan_preview(input: &PreviewInput, facts: GraphFacts) -> PreviewPlan {
    let target = input.target_head.clone();
    let head = input.request_head.clone();

    match input.strategy {
        IntegrationStrategy::MergeIfNecessary if facts.target_is_ancestor => {
            PreviewPlan::FastForward(head)
        }
        IntegrationStrategy::MergeWithSquash
            if facts.target_is_ancestor && facts.commits_ahead == Some(1) =>
        {
            PreviewPlan::FastForward(head)
        }
        IntegrationStrategy::RebaseTargetOntoSource => PreviewPlan::InClone {
            checkout: head.clone(),
            operation: CloneOperation::CherryPick {
                upstream: head,
                head: target,
            },
        },
        IntegrationStrategy::RebaseSourceOntoTarget => PreviewPlan::InClone {
            checkout: target.clone(),
            operation: CloneOperation::CherryPick {
                upstream: target,
                head,
            },
        },
        IntegrationStrategy::MergeWithSquash => PreviewPlan::InClone {
            checkout: target,
            operation: CloneOperation::Squash {
                commit: head,
                message: squash_message(
                    input.request_id,
                    &input.title,
                    input.description.as_deref(),
                ),
            },
        },
        IntegrationStrategy::MergeAlways | IntegrationStrategy::MergeIfNecessary => {
            let mode = if input.strategy == IntegrationStrategy::MergeAlways {
                FastForwardMode::NoFastForward
            } else {
                FastForwardMode::FastForward
            };
            PreviewPlan::InClone {
                checkout: target,
                operation: CloneOperation::Merge {
                    commit: head,
                    mode,
                    message: merge_message(input.request_id, &input.title),
                },
            }
        }
    }
}

/// Ref mutations and records making up an integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationSteps {
    /// Commit the target (and maybe source) branch moves to
    pub integrated: CommitId,
    /// Comment to fold into the integrated commit's message
    pub amend_with: Option<String>,
    /// Whether the source branch moves to the integrated commit too
    pub update_source: bool,
    /// Comment to record on the request
    pub record_comment: Option<String>,
}

/// Decide the steps of integrating with `preview` (PURE)
///
/// Fails with [`Error::IllegalState`] when the preview has conflicts.
pub fn plan_integration(
    strategy: IntegrationStrategy,
    preview: &IntegrationPreview,
    comment: Option<&str>,
) -> Result<IntegrationSteps> {
    let integrated = preview
        .integrated
        .clone()
        .ok_or_else(|| Error::illegal_state("There are integration conflicts."))?;

    // A comment only becomes part of history when integrating created a new commit
    let amend_with = comment
        .filter(|_| strategy.is_merge() && integrated != preview.request_head)
        .map(str::to_string);
    let record_comment = if amend_with.is_some() {
        None
    } else {
        comment.map(str::to_string)
    };

    Ok(IntegrationSteps {
        integrated,
        amend_with,
        update_source: strategy.rewrites_source(),
        record_comment,
    })
}

/// Message of an integrated commit with `comment` folded in
pub fn amended_message(original: &str, comment: &str) -> String {
    format!("{}\n\n{}\n", original.trim_end(), comment.trim_end())
}
