//! Shared command context for CLI commands
//!
//! Extracts the setup shared by preview and integrate: loading the
//! configuration, resolving the repositories and building a manager over an
//! in-memory store.

use pr_engine::config::{EngineConfig, load_config};
use pr_engine::error::{Error, Result};
use pr_engine::manager::PullRequestManager;
use pr_engine::store::MemoryStore;
use pr_engine::types::{
    IntegrationStrategy, PullRequest, PullRequestDraft, RepoAndBranch, Repository,
};
use pr_engine::vcs::{GitCli, VersionControl};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const TARGET_REPOSITORY_ID: u64 = 1;
const SOURCE_REPOSITORY_ID: u64 = 2;

/// Assignee used when no user is known; an assigned request is never
/// integrated by the engine on its own
const FALLBACK_USER: &str = "pr-engine";

/// Request described on the command line
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Target repository path
    pub path: PathBuf,
    /// Source repository path, the target repository when `None`
    pub source_repo: Option<PathBuf>,
    /// Source branch
    pub source: String,
    /// Target branch
    pub target: String,
    /// Strategy override
    pub strategy: Option<IntegrationStrategy>,
    /// Request title
    pub title: Option<String>,
    /// Acting user
    pub user: Option<String>,
}

/// Shared context for CLI commands
pub struct CommandContext {
    /// Manager over an in-memory store
    pub manager: PullRequestManager,
    /// Git facade, also used for reporting
    pub vcs: Arc<GitCli>,
    /// Source branch
    pub source: RepoAndBranch,
    /// Target branch
    pub target: RepoAndBranch,
    /// Acting user
    pub user: Option<String>,
}

impl CommandContext {
    /// Create a new command context
    ///
    /// A missing configuration file means defaults.
    pub async fn new(config_path: Option<&Path>, options: &RequestOptions) -> Result<Self> {
        let config = match config_path {
            Some(path) => load_config(path)?,
            None => EngineConfig::default(),
        };

        let target_repo = open_repository(TARGET_REPOSITORY_ID, &options.path).await?;
        let source_repo = match &options.source_repo {
            Some(path) => {
                let repo = open_repository(SOURCE_REPOSITORY_ID, path).await?;
                if repo.path == target_repo.path {
                    target_repo.clone()
                } else {
                    repo
                }
            }
            None => target_repo.clone(),
        };

        let vcs = Arc::new(GitCli::new(&config.git));
        let facade: Arc<dyn VersionControl> = vcs.clone();
        let manager = PullRequestManager::builder(Arc::new(MemoryStore::new()), facade)
            .config(config)
            .build()?;

        Ok(Self {
            manager,
            vcs,
            source: RepoAndBranch::new(source_repo, &options.source),
            target: RepoAndBranch::new(target_repo, &options.target),
            user: options.user.clone(),
        })
    }

    /// Open the request described by `options` and wait for its preview
    pub async fn open_and_settle(&self, options: &RequestOptions) -> Result<PullRequest> {
        let title = options
            .title
            .clone()
            .unwrap_or_else(|| format!("Integrate {} into {}", self.source, self.target));

        let mut draft = PullRequestDraft::new(title, self.source.clone(), self.target.clone());
        draft.strategy = options.strategy;
        draft.submitter.clone_from(&self.user);
        draft.assignee = Some(
            self.user
                .clone()
                .unwrap_or_else(|| FALLBACK_USER.to_string()),
        );

        let request = self.manager.open(draft).await?;
        self.manager.settle().await;
        debug!(request_id = %request.id, "pull request settled");
        self.manager.load(request.id).await
    }
}

async fn open_repository(id: u64, path: &Path) -> Result<Repository> {
    let path = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| Error::Config(format!("cannot open repository {}: {e}", path.display())))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
    Ok(Repository::new(id, name, path))
}
