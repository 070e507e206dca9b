//! Unit of work over a [`RequestStore`]

use crate::error::{Error, Result};
use crate::listener::PullRequestEvent;
use crate::store::{ChangeSet, RequestCriteria, RequestStore};
use crate::types::{
    PullRequest, PullRequestActivity, PullRequestComment, RepoAndBranch, RequestId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Work that may only run once the transaction is durable
#[derive(Debug, Clone)]
pub enum Deferred {
    /// Submit an integration preview computation
    SchedulePreview(RequestId),
    /// Run the consolidation check in the background
    Check(RequestId),
    /// Handle a target branch move for every open request into the branch,
    /// in the background
    TargetBranchUpdated(RepoAndBranch),
    /// Deliver an event to listeners
    Notify(PullRequestEvent),
}

/// Staged writes plus deferred work.
///
/// Reads see staged writes. Dropping a transaction without calling
/// [`commit`](Self::commit) discards everything, deferred work included.
/// An exclusive transaction holds its writer guard until it commits or is
/// dropped; deferred work runs after the guard is released.
pub struct Transaction {
    store: Arc<dyn RequestStore>,
    _writer: Option<OwnedMutexGuard<()>>,
    requests: BTreeMap<RequestId, PullRequest>,
    deleted: BTreeSet<RequestId>,
    activities: Vec<PullRequestActivity>,
    comments: Vec<PullRequestComment>,
    deferred: Vec<Deferred>,
}

impl Transaction {
    /// Begin a transaction
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self {
            store,
            _writer: None,
            requests: BTreeMap::new(),
            deleted: BTreeSet::new(),
            activities: Vec::new(),
            comments: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Begin a transaction holding `writer` for its whole lifetime
    pub fn exclusive(store: Arc<dyn RequestStore>, writer: OwnedMutexGuard<()>) -> Self {
        Self {
            _writer: Some(writer),
            ..Self::new(store)
        }
    }

    /// Load a request, preferring the staged version
    pub async fn find(&self, id: RequestId) -> Result<Option<PullRequest>> {
        if self.deleted.contains(&id) {
            return Ok(None);
        }
        if let Some(request) = self.requests.get(&id) {
            return Ok(Some(request.clone()));
        }
        self.store.load(id).await
    }

    /// Load a request that must exist
    pub async fn load(&self, id: RequestId) -> Result<PullRequest> {
        self.find(id).await?.ok_or(Error::RequestNotFound(id))
    }

    /// Query the store with staged writes applied on top
    pub async fn query(&self, criteria: &RequestCriteria) -> Result<Vec<PullRequest>> {
        let mut merged: BTreeMap<RequestId, PullRequest> = self
            .store
            .query(criteria)
            .await?
            .into_iter()
            .map(|request| (request.id, request))
            .collect();

        for (id, staged) in &self.requests {
            if criteria.matches(staged) {
                merged.insert(*id, staged.clone());
            } else {
                merged.remove(id);
            }
        }
        for id in &self.deleted {
            merged.remove(id);
        }
        Ok(merged.into_values().collect())
    }

    /// Stage an insert or replace
    pub fn save(&mut self, request: &PullRequest) {
        self.deleted.remove(&request.id);
        self.requests.insert(request.id, request.clone());
    }

    /// Stage a removal
    pub fn delete(&mut self, id: RequestId) {
        self.requests.remove(&id);
        self.deleted.insert(id);
    }

    /// Stage an activity
    pub fn add_activity(&mut self, activity: PullRequestActivity) {
        self.activities.push(activity);
    }

    /// Stage a comment
    pub fn add_comment(&mut self, comment: PullRequestComment) {
        self.comments.push(comment);
    }

    /// Run `work` after a successful commit
    pub fn after_commit(&mut self, work: Deferred) {
        self.deferred.push(work);
    }

    /// Apply staged writes atomically and hand back the deferred work, in
    /// the order it was registered
    pub async fn commit(self) -> Result<Vec<Deferred>> {
        let changes = ChangeSet {
            requests: self.requests.into_values().collect(),
            deleted: self.deleted.into_iter().collect(),
            activities: self.activities,
            comments: self.comments,
        };
        if !changes.is_empty() {
            debug!(
                requests = changes.requests.len(),
                deleted = changes.deleted.len(),
                activities = changes.activities.len(),
                comments = changes.comments.len(),
                "committing transaction"
            );
            self.store.commit(changes).await?;
        }
        Ok(self.deferred)
    }
}
