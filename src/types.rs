//! Core types for pr-engine

use crate::gatekeeper::GateVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix of branch refs
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Strip `refs/heads/` from a ref name, returning the branch name
pub fn ref_to_branch(ref_name: &str) -> Option<&str> {
    ref_name
        .strip_prefix(BRANCH_REF_PREFIX)
        .filter(|branch| !branch.is_empty())
}

/// Pull request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git commit ID (hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    /// Wrap a hex commit id
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(hex: &str) -> Self {
        Self(hex.to_string())
    }
}

/// A git repository known to the engine
///
/// Two repositories are the same repository when their ids match; the path
/// is where the engine finds it on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Repository id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Path to the repository on disk (bare or non-bare)
    pub path: PathBuf,
}

impl Repository {
    /// Create a repository handle
    pub fn new(id: u64, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
        }
    }
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Repository {}

/// A branch inside a specific repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAndBranch {
    /// Repository holding the branch
    pub repository: Repository,
    /// Branch name (without `refs/heads/`)
    pub branch: String,
}

impl RepoAndBranch {
    /// Create a branch reference
    pub fn new(repository: Repository, branch: impl Into<String>) -> Self {
        Self {
            repository,
            branch: branch.into(),
        }
    }

    /// Fully qualified ref name of the branch
    pub fn ref_name(&self) -> String {
        format!("{BRANCH_REF_PREFIX}{}", self.branch)
    }
}

impl std::fmt::Display for RepoAndBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository.name, self.branch)
    }
}

// =============================================================================
// Integration strategies and status
// =============================================================================

/// How the source branch is integrated into the target branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationStrategy {
    /// Always create a merge commit
    MergeAlways,
    /// Fast-forward when possible, otherwise create a merge commit
    MergeIfNecessary,
    /// Squash source history into a single commit
    MergeWithSquash,
    /// Replay source commits onto target, then fast-forward target
    RebaseSourceOntoTarget,
    /// Replay target commits onto source; result becomes the new target
    RebaseTargetOntoSource,
}

impl IntegrationStrategy {
    /// All strategies, in declaration order
    pub const ALL: [Self; 5] = [
        Self::MergeAlways,
        Self::MergeIfNecessary,
        Self::MergeWithSquash,
        Self::RebaseSourceOntoTarget,
        Self::RebaseTargetOntoSource,
    ];

    /// Whether the strategy produces its result through a merge-like commit
    pub const fn is_merge(self) -> bool {
        matches!(
            self,
            Self::MergeAlways | Self::MergeIfNecessary | Self::MergeWithSquash
        )
    }

    /// Whether integrating also rewrites the source branch
    pub const fn rewrites_source(self) -> bool {
        matches!(self, Self::RebaseSourceOntoTarget | Self::MergeWithSquash)
    }
}

impl std::fmt::Display for IntegrationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MergeAlways => write!(f, "merge-always"),
            Self::MergeIfNecessary => write!(f, "merge-if-necessary"),
            Self::MergeWithSquash => write!(f, "merge-with-squash"),
            Self::RebaseSourceOntoTarget => write!(f, "rebase-source-onto-target"),
            Self::RebaseTargetOntoSource => write!(f, "rebase-target-onto-source"),
        }
    }
}

impl FromStr for IntegrationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.to_string() == normalized)
            .ok_or_else(|| format!("unknown integration strategy '{s}'"))
    }
}

/// Terminal state of a closed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseStatus {
    /// Closed without integrating
    Discarded,
    /// Source changes are part of the target branch
    Integrated,
}

/// Derived status of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Reviewers asked for changes to the source branch
    PendingUpdate,
    /// Required approvals are outstanding
    PendingApproval,
    /// Approved and waiting to be integrated
    PendingIntegrate,
    /// Closed as integrated
    Integrated,
    /// Closed as discarded
    Discarded,
}

impl RequestStatus {
    /// Derive the status from the close status and the gatekeeper verdict.
    ///
    /// The status is never stored; recomputing it from current data keeps it
    /// from drifting away from the updates and reviews it summarizes.
    pub fn derive(close_status: Option<CloseStatus>, verdict: &GateVerdict) -> Self {
        match close_status {
            Some(CloseStatus::Integrated) => Self::Integrated,
            Some(CloseStatus::Discarded) => Self::Discarded,
            None => match verdict {
                GateVerdict::Passed(_) => Self::PendingIntegrate,
                GateVerdict::Pending(_) => Self::PendingApproval,
                GateVerdict::Failed(_) => Self::PendingUpdate,
            },
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingUpdate => write!(f, "pending update"),
            Self::PendingApproval => write!(f, "pending approval"),
            Self::PendingIntegrate => write!(f, "pending integrate"),
            Self::Integrated => write!(f, "integrated"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

// =============================================================================
// Request records
// =============================================================================

/// Immutable record of the source head at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestUpdate {
    /// Owning request
    pub request_id: RequestId,
    /// Position in the request's update list (1-based)
    pub sequence: u32,
    /// Source head commit
    pub head_commit: CommitId,
    /// When the update was recorded
    pub date: DateTime<Utc>,
}

impl PullRequestUpdate {
    /// Ref in the target repository keeping this update's head reachable
    pub fn head_ref(&self) -> String {
        format!("refs/pull/{}/updates/{}/head", self.request_id, self.sequence)
    }
}

/// Cached result of an integration preview computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationPreview {
    /// Target head the preview was computed against
    pub target_head: CommitId,
    /// Source head the preview was computed for
    pub request_head: CommitId,
    /// Strategy used
    pub strategy: IntegrationStrategy,
    /// Resulting commit, `None` when the integration has conflicts
    pub integrated: Option<CommitId>,
}

impl IntegrationPreview {
    /// Whether the preview no longer describes the given heads and strategy
    pub fn is_obsolete(
        &self,
        target_head: &CommitId,
        request_head: &CommitId,
        strategy: IntegrationStrategy,
    ) -> bool {
        &self.target_head != target_head
            || &self.request_head != request_head
            || self.strategy != strategy
    }

    /// Whether the integration is blocked by conflicts
    pub const fn has_conflicts(&self) -> bool {
        self.integrated.is_none()
    }
}

/// Kind of audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityAction {
    /// Closed request was reopened
    Reopen,
    /// Request was discarded
    Discard,
    /// Request was integrated
    Integrate,
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reopen => write!(f, "reopen"),
            Self::Discard => write!(f, "discard"),
            Self::Integrate => write!(f, "integrate"),
        }
    }
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestActivity {
    /// Owning request
    pub request_id: RequestId,
    /// Acting user, `None` for the system
    pub user: Option<String>,
    /// When it happened
    pub date: DateTime<Utc>,
    /// What happened
    pub action: ActivityAction,
}

/// Comment attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestComment {
    /// Owning request
    pub request_id: RequestId,
    /// Author, `None` for the system
    pub user: Option<String>,
    /// Comment text
    pub content: String,
    /// When it was written
    pub date: DateTime<Utc>,
}

/// Invitation for a user to review the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInvitation {
    /// Invited reviewer
    pub reviewer: String,
    /// When the invitation was (or is scheduled to be) sent
    pub date: DateTime<Utc>,
    /// Whether the reviewer was removed from the request
    pub excluded: bool,
}

/// Outcome of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewResult {
    /// Changes approved
    Approve,
    /// Changes rejected
    Disapprove,
}

/// A review of a specific update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Reviewer
    pub reviewer: String,
    /// Update the review applies to
    pub update_sequence: u32,
    /// Verdict
    pub result: ReviewResult,
    /// When the review was given
    pub date: DateTime<Utc>,
}

/// Input for opening a new pull request
#[derive(Debug, Clone)]
pub struct PullRequestDraft {
    /// Title
    pub title: String,
    /// Markdown description
    pub description: Option<String>,
    /// Submitting user
    pub submitter: Option<String>,
    /// Branch with the proposed changes
    pub source: RepoAndBranch,
    /// Branch to integrate into
    pub target: RepoAndBranch,
    /// Strategy; the first applicable strategy is used when `None`
    pub strategy: Option<IntegrationStrategy>,
    /// Assignee responsible for integrating
    pub assignee: Option<String>,
    /// Users invited to review
    pub reviewers: Vec<String>,
    /// Base commit; the merge base of source and target when `None`
    pub base_commit: Option<CommitId>,
}

impl PullRequestDraft {
    /// Draft with only the required fields set
    pub fn new(title: impl Into<String>, source: RepoAndBranch, target: RepoAndBranch) -> Self {
        Self {
            title: title.into(),
            description: None,
            submitter: None,
            source,
            target,
            strategy: None,
            assignee: None,
            reviewers: Vec::new(),
            base_commit: None,
        }
    }
}

/// A proposal to merge a source branch into a target branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Request id
    pub id: RequestId,
    /// Title
    pub title: String,
    /// Markdown description
    pub description: Option<String>,
    /// Submitting user
    pub submitter: Option<String>,
    /// Branch with the proposed changes
    pub source: RepoAndBranch,
    /// Branch to integrate into
    pub target: RepoAndBranch,
    /// Commit the request was based on
    pub base_commit: CommitId,
    /// Chosen integration strategy
    pub strategy: IntegrationStrategy,
    /// `None` while the request is open
    pub close_status: Option<CloseStatus>,
    updates: Vec<PullRequestUpdate>,
    /// Last computed integration preview
    pub last_integration_preview: Option<IntegrationPreview>,
    /// When the request was submitted
    pub submit_date: DateTime<Utc>,
    /// Timestamp of the last lifecycle event
    pub last_event_date: DateTime<Utc>,
    /// User responsible for integrating; auto-integration is off while set
    pub assignee: Option<String>,
    /// Review invitations
    pub review_invitations: Vec<ReviewInvitation>,
    /// Reviews received
    pub reviews: Vec<Review>,
    /// Set once the source repository is deleted; the source branch can no
    /// longer be resolved or restored
    #[serde(default)]
    pub source_repository_deleted: bool,
    /// Revision of the stored record. Stores reject writes of a stale
    /// revision.
    #[serde(default)]
    pub version: u64,
}

impl PullRequest {
    /// Build a new open request from a draft with its first update
    pub fn from_draft(
        id: RequestId,
        draft: PullRequestDraft,
        strategy: IntegrationStrategy,
        base_commit: CommitId,
        source_head: CommitId,
        now: DateTime<Utc>,
    ) -> Self {
        let review_invitations = draft
            .reviewers
            .into_iter()
            .map(|reviewer| ReviewInvitation {
                reviewer,
                date: now,
                excluded: false,
            })
            .collect();

        let mut request = Self {
            id,
            title: draft.title,
            description: draft.description,
            submitter: draft.submitter,
            source: draft.source,
            target: draft.target,
            base_commit,
            strategy,
            close_status: None,
            updates: Vec::new(),
            last_integration_preview: None,
            submit_date: now,
            last_event_date: now,
            assignee: draft.assignee,
            review_invitations,
            reviews: Vec::new(),
            source_repository_deleted: false,
            version: 0,
        };
        request.add_update(source_head, now);
        request
    }

    /// Whether the request is neither discarded nor integrated
    pub const fn is_open(&self) -> bool {
        self.close_status.is_none()
    }

    /// Updates, oldest first
    pub fn updates(&self) -> &[PullRequestUpdate] {
        &self.updates
    }

    /// Mutable access to update dates, used only when first persisting
    pub(crate) fn updates_mut(&mut self) -> &mut [PullRequestUpdate] {
        &mut self.updates
    }

    /// Most recent update
    pub fn latest_update(&self) -> Option<&PullRequestUpdate> {
        self.updates.last()
    }

    /// Head commit of the most recent update
    pub fn request_head(&self) -> Option<&CommitId> {
        self.latest_update().map(|update| &update.head_commit)
    }

    /// Append a new update for the given source head
    pub fn add_update(&mut self, head_commit: CommitId, date: DateTime<Utc>) -> &PullRequestUpdate {
        let sequence = u32::try_from(self.updates.len() + 1).unwrap_or(u32::MAX);
        self.updates.push(PullRequestUpdate {
            request_id: self.id,
            sequence,
            head_commit,
            date,
        });
        &self.updates[self.updates.len() - 1]
    }

    /// Ref marking the commit the request was based on
    pub fn base_ref(&self) -> String {
        format!("refs/pull/{}/base", self.id)
    }

    /// Ref tracking the latest source head inside the target repository
    pub fn head_ref(&self) -> String {
        format!("refs/pull/{}/head", self.id)
    }

    /// Scratch ref exposing the computed integration preview
    pub fn integrate_ref(&self) -> String {
        format!("refs/pull/{}/integrate", self.id)
    }

    /// Source branch, unless its repository was deleted
    pub fn live_source(&self) -> Option<&RepoAndBranch> {
        (!self.source_repository_deleted).then_some(&self.source)
    }

    /// Whether source and target live in different repositories
    pub fn is_cross_repository(&self) -> bool {
        self.source.repository != self.target.repository
    }
}
