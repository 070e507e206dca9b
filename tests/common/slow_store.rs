//! Store wrapper holding a commit open for a while

use async_trait::async_trait;
use pr_engine::error::Result;
use pr_engine::store::{ChangeSet, MemoryStore, RequestCriteria, RequestStore};
use pr_engine::types::{PullRequest, PullRequestActivity, PullRequestComment, RequestId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// [`MemoryStore`] whose next commit can be delayed
///
/// Lets a test interleave another operation while a transaction is in the
/// middle of committing.
#[derive(Default)]
pub struct SlowStore {
    inner: MemoryStore,
    next_delay: Mutex<Option<Duration>>,
    commit_started: Notify,
}

impl SlowStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold the next commit for `delay` before applying it
    pub fn delay_next_commit(&self, delay: Duration) {
        *self.next_delay.lock().unwrap() = Some(delay);
    }

    /// Resolve once the delayed commit has started
    pub async fn commit_started(&self) {
        self.commit_started.notified().await;
    }
}

#[async_trait]
impl RequestStore for SlowStore {
    async fn next_request_id(&self) -> Result<RequestId> {
        self.inner.next_request_id().await
    }

    async fn load(&self, id: RequestId) -> Result<Option<PullRequest>> {
        self.inner.load(id).await
    }

    async fn query(&self, criteria: &RequestCriteria) -> Result<Vec<PullRequest>> {
        self.inner.query(criteria).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let delay = self.next_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            self.commit_started.notify_one();
            tokio::time::sleep(delay).await;
        }
        self.inner.commit(changes).await
    }

    async fn activities(&self, id: RequestId) -> Result<Vec<PullRequestActivity>> {
        self.inner.activities(id).await
    }

    async fn comments(&self, id: RequestId) -> Result<Vec<PullRequestComment>> {
        self.inner.comments(id).await
    }
}
