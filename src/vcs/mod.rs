//! Version control facade
//!
//! The engine never runs git itself; everything goes through the
//! [`VersionControl`] trait so the algorithms can be exercised against a mock.

mod git;

pub use git::GitCli;

use crate::error::Result;
use crate::types::CommitId;
use async_trait::async_trait;
use std::path::Path;

/// Expected previous value of a ref for compare-and-swap updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefExpectation {
    /// Update unconditionally
    Any,
    /// Ref must not exist yet
    Absent,
    /// Ref must currently point at this commit
    Value(CommitId),
}

impl std::fmt::Display for RefExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any value"),
            Self::Absent => write!(f, "no ref"),
            Self::Value(commit) => write!(f, "{commit}"),
        }
    }
}

/// Fast-forward behavior of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastForwardMode {
    /// Fast-forward when possible
    FastForward,
    /// Always create a merge commit
    NoFastForward,
}

/// Version control operations used by the engine.
///
/// Repository arguments are paths to primary repositories; working directory
/// arguments are ephemeral clones created with [`clone_into`]. Operations
/// that may hit conflicts return `Ok(None)` for a conflict and reserve `Err`
/// for failures.
///
/// [`clone_into`]: Self::clone_into
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Resolve a ref (or any revision) to a commit, `None` if it doesn't exist
    async fn resolve_ref(&self, repo: &Path, ref_name: &str) -> Result<Option<CommitId>>;

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`
    async fn is_ancestor(&self, repo: &Path, ancestor: &CommitId, descendant: &CommitId)
    -> Result<bool>;

    /// Commits reachable from `to` but not from `from`, newest first
    async fn log(&self, repo: &Path, from: &CommitId, to: &CommitId) -> Result<Vec<CommitId>>;

    /// Best common ancestor of two commits
    async fn merge_base(&self, repo: &Path, a: &CommitId, b: &CommitId)
    -> Result<Option<CommitId>>;

    /// Full message of a commit
    async fn commit_message(&self, repo: &Path, commit: &CommitId) -> Result<String>;

    /// Update `ref_name` to `new_value` if it currently matches `expected`.
    ///
    /// Fails with [`Error::RefConflict`] when the ref moved underneath us.
    ///
    /// [`Error::RefConflict`]: crate::error::Error::RefConflict
    async fn update_ref(
        &self,
        repo: &Path,
        ref_name: &str,
        new_value: &CommitId,
        expected: &RefExpectation,
        reason: &str,
    ) -> Result<()>;

    /// Delete a ref; deleting a missing ref is not an error
    async fn delete_ref(&self, repo: &Path, ref_name: &str) -> Result<()>;

    /// Fetch `refspec` from `from_repo` into `repo`
    async fn fetch(&self, repo: &Path, from_repo: &Path, refspec: &str) -> Result<()>;

    /// Clone `repo` into `dir`, sharing its object store, with `branch` checked out
    async fn clone_into(&self, repo: &Path, dir: &Path, branch: &str) -> Result<()>;

    /// Point the working copy's HEAD at `commit`, resetting index and tree
    async fn reset_hard(&self, workdir: &Path, commit: &CommitId) -> Result<()>;

    /// Commits reachable from `head` whose changes are not in `upstream`, oldest first
    async fn list_cherries(
        &self,
        workdir: &Path,
        upstream: &CommitId,
        head: &CommitId,
    ) -> Result<Vec<CommitId>>;

    /// Cherry-pick commits onto HEAD; returns the new HEAD or `None` on conflict
    async fn cherry_pick(&self, workdir: &Path, commits: &[CommitId]) -> Result<Option<CommitId>>;

    /// Merge `commit` into HEAD; returns the new HEAD or `None` on conflict
    async fn merge(
        &self,
        workdir: &Path,
        commit: &CommitId,
        mode: FastForwardMode,
        message: &str,
    ) -> Result<Option<CommitId>>;

    /// Squash `commit`'s changes into one commit on HEAD; `None` on conflict
    async fn squash(&self, workdir: &Path, commit: &CommitId, message: &str)
    -> Result<Option<CommitId>>;

    /// Rewrite HEAD's message, returning the rewritten commit
    async fn amend_head(&self, workdir: &Path, message: &str) -> Result<CommitId>;
}
