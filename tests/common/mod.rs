//! Shared test utilities

#![allow(dead_code)]

pub mod mock_vcs;
pub mod slow_store;
pub mod temp_repo;

pub use mock_vcs::{MergeCall, MockVersionControl, UpdateRefCall};
pub use slow_store::SlowStore;
pub use temp_repo::TempGitRepo;

use pr_engine::config::EngineConfig;
use pr_engine::gatekeeper::{GateVerdict, Gatekeeper};
use pr_engine::listener::PullRequestListener;
use pr_engine::types::{PullRequest, PullRequestDraft, RepoAndBranch, Repository};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Repository at a fake path, for the mock facade
pub fn repo(id: u64, name: &str) -> Repository {
    Repository::new(id, name, format!("/repos/{name}"))
}

/// Branch of `repo`
pub fn branch(repo: &Repository, name: &str) -> RepoAndBranch {
    RepoAndBranch::new(repo.clone(), name)
}

/// Draft from `source` into `target` of the same repository
pub fn draft(repo: &Repository, source: &str, target: &str) -> PullRequestDraft {
    PullRequestDraft::new(
        format!("Integrate {source}"),
        branch(repo, source),
        branch(repo, target),
    )
}

/// Engine config writing caches under `cache_dir`
pub fn test_config(cache_dir: &Path, workers: usize) -> EngineConfig {
    EngineConfig {
        preview_workers: Some(workers),
        cache_dir: Some(cache_dir.to_path_buf()),
        ..EngineConfig::default()
    }
}

/// Gatekeeper returning a verdict fixed by the test
pub struct FixedGatekeeper {
    verdict: Mutex<GateVerdict>,
}

impl FixedGatekeeper {
    pub fn new(verdict: GateVerdict) -> Arc<Self> {
        Arc::new(Self {
            verdict: Mutex::new(verdict),
        })
    }

    pub fn set(&self, verdict: GateVerdict) {
        *self.verdict.lock().unwrap() = verdict;
    }
}

impl Gatekeeper for FixedGatekeeper {
    fn check(&self, _request: &PullRequest) -> GateVerdict {
        self.verdict.lock().unwrap().clone()
    }
}

/// Listener recording event kinds, tagged with a name
pub struct RecordingListener {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    /// Listener appending `"{name}:{kind}"` to a shared log
    pub fn shared(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: Arc::clone(log),
        })
    }

    /// Listener with its own log
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (Self::shared("listener", &log), log)
    }

    fn push(&self, kind: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{kind}", self.name));
    }
}

#[async_trait::async_trait]
impl PullRequestListener for RecordingListener {
    async fn on_opened(&self, _request: &PullRequest) {
        self.push("opened");
    }

    async fn on_updated(&self, _request: &PullRequest) {
        self.push("updated");
    }

    async fn on_reopened(
        &self,
        _request: &PullRequest,
        _user: Option<&str>,
        _comment: Option<&str>,
    ) {
        self.push("reopened");
    }

    async fn on_discarded(
        &self,
        _request: &PullRequest,
        _user: Option<&str>,
        _comment: Option<&str>,
    ) {
        self.push("discarded");
    }

    async fn on_integrated(
        &self,
        _request: &PullRequest,
        user: Option<&str>,
        _comment: Option<&str>,
    ) {
        self.push(if user.is_some() { "integrated" } else { "integrated_by_system" });
    }

    async fn on_assigned(&self, _request: &PullRequest) {
        self.push("assigned");
    }

    async fn on_mentioned(&self, _request: &PullRequest, user: &str) {
        self.push(&format!("mentioned({user})"));
    }

    async fn pending_integration(&self, _request: &PullRequest) {
        self.push("pending_integration");
    }

    async fn pending_approval(&self, _request: &PullRequest) {
        self.push("pending_approval");
    }

    async fn on_integration_preview_calculated(&self, _request: &PullRequest) {
        self.push("preview_calculated");
    }
}
