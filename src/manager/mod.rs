//! Pull request lifecycle management
//!
//! [`PullRequestManager`] is the entry point of the engine. Every operation
//! runs in a [`Transaction`]; listener events, preview submissions and
//! background re-checks are staged as [`Deferred`] work and only run once the
//! transaction has committed.
//!
//! - [`lifecycle`]: open, update, reopen, discard, integrate, check
//! - [`preview`]: integration previews and the scheduler job computing them

pub mod lifecycle;
pub mod preview;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::gatekeeper::{AlwaysPass, Gatekeeper};
use crate::integration::IntegrationPreviewCalculator;
use crate::listener::{PullRequestListener, dispatch};
use crate::policy::{IntegrationPolicy, applicable_strategies};
use crate::scheduler::SingleFlightScheduler;
use crate::store::{Deferred, RequestCriteria, RequestStore, Transaction};
use crate::types::{
    IntegrationStrategy, PullRequest, PullRequestActivity, PullRequestComment, RepoAndBranch,
    Repository, RequestId, RequestStatus,
};
use crate::vcs::VersionControl;
use preview::PreviewTask;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::error;

/// Comment recorded when the engine integrates a request on its own
pub const AUTO_INTEGRATE_COMMENT: &str = "Integrated automatically by system";

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) struct Inner {
    store: Arc<dyn RequestStore>,
    vcs: Arc<dyn VersionControl>,
    gatekeeper: Arc<dyn Gatekeeper>,
    listeners: Vec<Arc<dyn PullRequestListener>>,
    calculator: IntegrationPreviewCalculator,
    scheduler: SingleFlightScheduler,
    policies: RwLock<Vec<IntegrationPolicy>>,
    cache_dir: PathBuf,
    writer: Arc<AsyncMutex<()>>,
    background: Mutex<JoinSet<()>>,
}

/// Manages pull requests from open to integration
///
/// Cheap to clone; clones share the same state and worker pool.
#[derive(Clone)]
pub struct PullRequestManager {
    inner: Arc<Inner>,
}

/// Builder for [`PullRequestManager`]
pub struct PullRequestManagerBuilder {
    store: Arc<dyn RequestStore>,
    vcs: Arc<dyn VersionControl>,
    gatekeeper: Arc<dyn Gatekeeper>,
    listeners: Vec<Arc<dyn PullRequestListener>>,
    config: EngineConfig,
}

impl PullRequestManagerBuilder {
    /// Use `gatekeeper` to derive request status (default: approve everything)
    #[must_use]
    pub fn gatekeeper(mut self, gatekeeper: Arc<dyn Gatekeeper>) -> Self {
        self.gatekeeper = gatekeeper;
        self
    }

    /// Register a listener; listeners are notified in registration order
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn PullRequestListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Apply engine configuration
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager and start its preview workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<PullRequestManager> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("manager needs a tokio runtime: {e}")))?;
        let workers = self.config.preview_workers();
        let cache_dir = self.config.cache_dir();

        let inner = Arc::new_cyclic(|weak| Inner {
            store: self.store,
            calculator: IntegrationPreviewCalculator::new(Arc::clone(&self.vcs)),
            vcs: self.vcs,
            gatekeeper: self.gatekeeper,
            listeners: self.listeners,
            scheduler: SingleFlightScheduler::with_runtime(
                Arc::new(PreviewTask::new(weak.clone())),
                workers,
                runtime,
            ),
            policies: RwLock::new(self.config.integration_policies),
            cache_dir,
            writer: Arc::new(AsyncMutex::new(())),
            background: Mutex::new(JoinSet::new()),
        });
        Ok(PullRequestManager { inner })
    }
}

impl PullRequestManager {
    /// Start building a manager over a store and a version control facade
    pub fn builder(
        store: Arc<dyn RequestStore>,
        vcs: Arc<dyn VersionControl>,
    ) -> PullRequestManagerBuilder {
        PullRequestManagerBuilder {
            store,
            vcs,
            gatekeeper: Arc::new(AlwaysPass),
            listeners: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.inner.store
    }

    /// Preview scheduler
    pub fn scheduler(&self) -> &SingleFlightScheduler {
        &self.inner.scheduler
    }

    /// Load a request
    pub async fn load(&self, id: RequestId) -> Result<PullRequest> {
        self.inner
            .store
            .load(id)
            .await?
            .ok_or(Error::RequestNotFound(id))
    }

    /// Activities of a request, oldest first
    pub async fn activities(&self, id: RequestId) -> Result<Vec<PullRequestActivity>> {
        self.inner.store.activities(id).await
    }

    /// Comments of a request, oldest first
    pub async fn comments(&self, id: RequestId) -> Result<Vec<PullRequestComment>> {
        self.inner.store.comments(id).await
    }

    /// Derived status of `request`
    pub fn status(&self, request: &PullRequest) -> RequestStatus {
        RequestStatus::derive(request.close_status, &self.inner.gatekeeper.check(request))
    }

    /// Strategies the integration policies allow for `request`
    pub fn applicable_integration_strategies(
        &self,
        request: &PullRequest,
    ) -> Vec<IntegrationStrategy> {
        applicable_strategies(&self.policies(), request)
    }

    /// Apply a new configuration: worker pool size and integration policies.
    /// Queued preview computations are kept.
    pub fn reconfigure(&self, config: &EngineConfig) {
        self.inner.scheduler.set_workers(config.preview_workers());
        *self
            .inner
            .policies
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.integration_policies.clone();
    }

    /// Cache directory of a request
    pub fn request_cache_dir(&self, id: RequestId) -> PathBuf {
        self.inner.cache_dir.join("requests").join(id.to_string())
    }

    /// Open request from `source` into `target`, if any
    pub async fn find_open(
        &self,
        target: &RepoAndBranch,
        source: &RepoAndBranch,
    ) -> Result<Option<PullRequest>> {
        let criteria = RequestCriteria::open()
            .with_target(target.clone())
            .with_source(source.clone());
        Ok(self.inner.store.query(&criteria).await?.into_iter().next())
    }

    /// Open requests into `target`, optionally only from `source_repo`
    pub async fn query_open_to(
        &self,
        target: &RepoAndBranch,
        source_repo: Option<&Repository>,
    ) -> Result<Vec<PullRequest>> {
        let mut criteria = RequestCriteria::open().with_target(target.clone());
        if let Some(repo) = source_repo {
            criteria = criteria.from_repository(repo.id);
        }
        self.inner.store.query(&criteria).await
    }

    /// Open requests from `source`, optionally only into `target_repo`
    pub async fn query_open_from(
        &self,
        source: &RepoAndBranch,
        target_repo: Option<&Repository>,
    ) -> Result<Vec<PullRequest>> {
        let mut criteria = RequestCriteria::open().with_source(source.clone());
        if let Some(repo) = target_repo {
            criteria = criteria.to_repository(repo.id);
        }
        self.inner.store.query(&criteria).await
    }

    /// Open requests having `branch` as source or target
    pub async fn query_open(&self, branch: &RepoAndBranch) -> Result<Vec<PullRequest>> {
        self.inner
            .store
            .query(&RequestCriteria::open().touching(branch.clone()))
            .await
    }

    /// Wait until no preview computation or background check is pending
    pub async fn settle(&self) {
        loop {
            self.inner.scheduler.wait_idle().await;
            let mut tasks = std::mem::take(
                &mut *self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() && self.inner.scheduler.is_idle() {
                return;
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    fn policies(&self) -> Vec<IntegrationPolicy> {
        self.inner
            .policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn vcs(&self) -> &dyn VersionControl {
        self.inner.vcs.as_ref()
    }

    /// Begin a transaction. Transactions of one manager never overlap, so a
    /// request loaded in one cannot be overwritten by another.
    async fn begin(&self) -> Transaction {
        let writer = Arc::clone(&self.inner.writer).lock_owned().await;
        Transaction::exclusive(Arc::clone(&self.inner.store), writer)
    }

    /// Commit `tx`, then run its deferred work
    async fn commit(&self, tx: Transaction) -> Result<()> {
        let deferred = tx.commit().await?;
        self.run_deferred(deferred).await;
        Ok(())
    }

    async fn run_deferred(&self, deferred: Vec<Deferred>) {
        for work in deferred {
            match work {
                Deferred::SchedulePreview(id) => self.inner.scheduler.submit(id),
                Deferred::Check(id) => self.spawn_background(check_task(self.clone(), id)),
                Deferred::TargetBranchUpdated(branch) => {
                    self.spawn_background(target_update_task(self.clone(), branch));
                }
                Deferred::Notify(event) => dispatch(&self.inner.listeners, &event).await,
            }
        }
    }

    /// Background checks and target updates still running
    pub fn background_tasks(&self) -> usize {
        let mut tasks = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        reap(&mut tasks);
        tasks.len()
    }

    fn spawn_background(&self, task: BoxFuture) {
        let mut tasks = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        reap(&mut tasks);
        tasks.spawn(task);
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(finished) = tasks.try_join_next() {
        if let Err(e) = finished {
            error!(error = %e, "background task aborted");
        }
    }
}

fn check_task(manager: PullRequestManager, id: RequestId) -> BoxFuture {
    Box::pin(async move {
        if let Err(e) = manager.check(id).await {
            error!(request_id = %id, error = %e, "background check failed");
        }
    })
}

fn target_update_task(manager: PullRequestManager, branch: RepoAndBranch) -> BoxFuture {
    Box::pin(async move {
        let requests = match manager
            .inner
            .store
            .query(&RequestCriteria::open().with_target(branch.clone()))
            .await
        {
            Ok(requests) => requests,
            Err(e) => {
                error!(%branch, error = %e, "failed to query requests into updated branch");
                return;
            }
        };
        for request in requests {
            if let Err(e) = manager.on_target_branch_update(request.id).await {
                error!(request_id = %request.id, error = %e, "target branch update failed");
            }
        }
    })
}
