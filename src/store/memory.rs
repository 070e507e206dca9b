//! In-memory request store

use crate::error::{Error, Result};
use crate::store::{ChangeSet, RequestCriteria, RequestStore};
use crate::types::{PullRequest, PullRequestActivity, PullRequestComment, RequestId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    last_id: u64,
    requests: BTreeMap<RequestId, PullRequest>,
    activities: Vec<PullRequestActivity>,
    comments: Vec<PullRequestComment>,
}

/// Store keeping everything in process memory
///
/// Used by the CLI and the tests. Commits are atomic because the whole change
/// set is checked and applied under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn next_request_id(&self) -> Result<RequestId> {
        let mut tables = self.tables()?;
        tables.last_id += 1;
        Ok(RequestId(tables.last_id))
    }

    async fn load(&self, id: RequestId) -> Result<Option<PullRequest>> {
        Ok(self.tables()?.requests.get(&id).cloned())
    }

    async fn query(&self, criteria: &RequestCriteria) -> Result<Vec<PullRequest>> {
        Ok(self
            .tables()?
            .requests
            .values()
            .filter(|request| criteria.matches(request))
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.tables()?;
        for request in &changes.requests {
            let stored = tables.requests.get(&request.id).map_or(0, |r| r.version);
            if stored != request.version {
                return Err(Error::ConcurrentModification(request.id));
            }
        }
        for id in &changes.deleted {
            tables.requests.remove(id);
            tables.activities.retain(|a| a.request_id != *id);
            tables.comments.retain(|c| c.request_id != *id);
        }
        for mut request in changes.requests {
            request.version += 1;
            tables.last_id = tables.last_id.max(request.id.0);
            tables.requests.insert(request.id, request);
        }
        tables.activities.extend(changes.activities);
        tables.comments.extend(changes.comments);
        Ok(())
    }

    async fn activities(&self, id: RequestId) -> Result<Vec<PullRequestActivity>> {
        let mut activities: Vec<_> = self
            .tables()?
            .activities
            .iter()
            .filter(|a| a.request_id == id)
            .cloned()
            .collect();
        activities.sort_by_key(|a| a.date);
        Ok(activities)
    }

    async fn comments(&self, id: RequestId) -> Result<Vec<PullRequestComment>> {
        let mut comments: Vec<_> = self
            .tables()?
            .comments
            .iter()
            .filter(|c| c.request_id == id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.date);
        Ok(comments)
    }
}
