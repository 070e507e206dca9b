//! Request persistence seam
//!
//! The engine loads and saves requests through [`RequestStore`]. Writes are
//! never issued one by one: a [`Transaction`] stages them and hands the store a
//! single [`ChangeSet`] to apply atomically.

mod memory;
mod transaction;

pub use memory::MemoryStore;
pub use transaction::{Deferred, Transaction};

use crate::error::Result;
use crate::types::{PullRequest, PullRequestActivity, PullRequestComment, RepoAndBranch, RequestId};
use async_trait::async_trait;

/// Filter for request queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RequestCriteria {
    /// Only open requests
    pub open_only: bool,
    /// Source branch must equal this
    pub source: Option<RepoAndBranch>,
    /// Target branch must equal this
    pub target: Option<RepoAndBranch>,
    /// Source or target branch must equal this
    pub source_or_target: Option<RepoAndBranch>,
    /// Source repository id must equal this
    pub source_repository: Option<u64>,
    /// Target repository id must equal this
    pub target_repository: Option<u64>,
}

impl RequestCriteria {
    /// Criteria selecting open requests
    #[must_use]
    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Self::default()
        }
    }

    /// Restrict to requests from `source`
    #[must_use]
    pub fn with_source(mut self, source: RepoAndBranch) -> Self {
        self.source = Some(source);
        self
    }

    /// Restrict to requests into `target`
    #[must_use]
    pub fn with_target(mut self, target: RepoAndBranch) -> Self {
        self.target = Some(target);
        self
    }

    /// Restrict to requests having `branch` as source or target
    #[must_use]
    pub fn touching(mut self, branch: RepoAndBranch) -> Self {
        self.source_or_target = Some(branch);
        self
    }

    /// Restrict to requests whose source lives in repository `id`
    #[must_use]
    pub const fn from_repository(mut self, id: u64) -> Self {
        self.source_repository = Some(id);
        self
    }

    /// Restrict to requests whose target lives in repository `id`
    #[must_use]
    pub const fn to_repository(mut self, id: u64) -> Self {
        self.target_repository = Some(id);
        self
    }

    /// Whether `request` satisfies every set filter
    pub fn matches(&self, request: &PullRequest) -> bool {
        if self.open_only && !request.is_open() {
            return false;
        }
        let source = request.live_source();
        if self.source.as_ref().is_some_and(|s| Some(s) != source) {
            return false;
        }
        if self.target.as_ref().is_some_and(|t| *t != request.target) {
            return false;
        }
        if self
            .source_or_target
            .as_ref()
            .is_some_and(|b| Some(b) != source && *b != request.target)
        {
            return false;
        }
        if self
            .source_repository
            .is_some_and(|id| source.is_none_or(|s| s.repository.id != id))
        {
            return false;
        }
        if self
            .target_repository
            .is_some_and(|id| id != request.target.repository.id)
        {
            return false;
        }
        true
    }
}

/// Writes applied atomically by [`RequestStore::commit`]
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Requests to insert or replace
    pub requests: Vec<PullRequest>,
    /// Requests to remove, together with their activities and comments
    pub deleted: Vec<RequestId>,
    /// Activities to append
    pub activities: Vec<PullRequestActivity>,
    /// Comments to append
    pub comments: Vec<PullRequestComment>,
}

impl ChangeSet {
    /// Whether there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.deleted.is_empty()
            && self.activities.is_empty()
            && self.comments.is_empty()
    }
}

/// Persistence of requests and their audit trail
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Allocate a fresh request id
    async fn next_request_id(&self) -> Result<RequestId>;

    /// Load a request by id
    async fn load(&self, id: RequestId) -> Result<Option<PullRequest>>;

    /// Requests matching `criteria`, ordered by id
    async fn query(&self, criteria: &RequestCriteria) -> Result<Vec<PullRequest>>;

    /// Apply all changes or none of them.
    ///
    /// Every written request must carry the version currently stored (0 for
    /// a new request); its stored version is then bumped. A stale version
    /// fails the whole commit with [`Error::ConcurrentModification`].
    ///
    /// [`Error::ConcurrentModification`]: crate::error::Error::ConcurrentModification
    async fn commit(&self, changes: ChangeSet) -> Result<()>;

    /// Activities of a request, oldest first
    async fn activities(&self, id: RequestId) -> Result<Vec<PullRequestActivity>>;

    /// Comments of a request, oldest first
    async fn comments(&self, id: RequestId) -> Result<Vec<PullRequestComment>>;
}
