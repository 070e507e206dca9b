//! Mock version control facade for testing
//!
//! Keeps refs and a commit graph in memory. Working directories are plain
//! keys; nothing touches the filesystem.

use async_trait::async_trait;
use pr_engine::error::{Error, Result};
use pr_engine::types::{CommitId, Repository};
use pr_engine::vcs::{FastForwardMode, RefExpectation, VersionControl};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Call record for `update_ref`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRefCall {
    pub repo: PathBuf,
    pub ref_name: String,
    pub new_value: CommitId,
    pub expected: RefExpectation,
}

/// Call record for `merge`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub commit: CommitId,
    pub mode: FastForwardMode,
    pub message: String,
}

#[derive(Default)]
struct Graph {
    refs: HashMap<(PathBuf, String), CommitId>,
    parents: HashMap<CommitId, Vec<CommitId>>,
    messages: HashMap<CommitId, String>,
    order: HashMap<CommitId, u64>,
    workdirs: HashMap<PathBuf, CommitId>,
}

impl Graph {
    fn reachable(&self, from: &CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut stack = vec![from.clone()];
        while let Some(commit) = stack.pop() {
            if seen.insert(commit.clone()) {
                if let Some(parents) = self.parents.get(&commit) {
                    stack.extend(parents.iter().cloned());
                }
            }
        }
        seen
    }

    /// Commits reachable from `to` but not from `from`, newest first
    fn range(&self, from: &CommitId, to: &CommitId) -> Vec<CommitId> {
        let excluded = self.reachable(from);
        let mut commits: Vec<_> = self
            .reachable(to)
            .into_iter()
            .filter(|commit| !excluded.contains(commit))
            .collect();
        commits.sort_by_key(|commit| std::cmp::Reverse(self.order.get(commit).copied()));
        commits
    }

    fn workdir_head(&self, workdir: &Path) -> Result<CommitId> {
        self.workdirs
            .get(workdir)
            .cloned()
            .ok_or_else(|| git_error("status", "not a working directory"))
    }
}

fn git_error(command: &str, message: &str) -> Error {
    Error::Git {
        command: command.to_string(),
        message: message.to_string(),
    }
}

/// Simple mock version control for testing
///
/// Features:
/// - In-memory refs per repository path and a commit graph
/// - Call tracking for verification
/// - Conflicts configurable per commit
/// - Error injection for failure path testing
pub struct MockVersionControl {
    graph: Mutex<Graph>,
    next_commit: AtomicU64,
    conflicting: Mutex<HashSet<CommitId>>,
    merge_delay: Mutex<Option<Duration>>,
    // Call tracking
    merge_calls: Mutex<Vec<MergeCall>>,
    squash_calls: Mutex<Vec<CommitId>>,
    cherry_pick_calls: Mutex<Vec<Vec<CommitId>>>,
    clone_calls: Mutex<Vec<PathBuf>>,
    update_ref_calls: Mutex<Vec<UpdateRefCall>>,
    delete_ref_calls: Mutex<Vec<String>>,
    fetch_calls: Mutex<Vec<String>>,
    running_merges: AtomicUsize,
    max_running_merges: AtomicUsize,
    // Error injection
    error_on_merge: Mutex<Option<String>>,
    error_on_update_ref: Mutex<Option<String>>,
    raced_refs: Mutex<HashSet<String>>,
}

impl Default for MockVersionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVersionControl {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(Graph::default()),
            next_commit: AtomicU64::new(1),
            conflicting: Mutex::new(HashSet::new()),
            merge_delay: Mutex::new(None),
            merge_calls: Mutex::new(Vec::new()),
            squash_calls: Mutex::new(Vec::new()),
            cherry_pick_calls: Mutex::new(Vec::new()),
            clone_calls: Mutex::new(Vec::new()),
            update_ref_calls: Mutex::new(Vec::new()),
            delete_ref_calls: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
            running_merges: AtomicUsize::new(0),
            max_running_merges: AtomicUsize::new(0),
            error_on_merge: Mutex::new(None),
            error_on_update_ref: Mutex::new(None),
            raced_refs: Mutex::new(HashSet::new()),
        }
    }

    // =========================================================================
    // Graph setup
    // =========================================================================

    /// Create a commit with the given parents
    pub fn commit(&self, parents: &[&CommitId], message: &str) -> CommitId {
        let mut graph = self.graph.lock().unwrap();
        self.new_commit(
            &mut graph,
            parents.iter().map(|p| (*p).clone()).collect(),
            message,
        )
    }

    fn new_commit(&self, graph: &mut Graph, parents: Vec<CommitId>, message: &str) -> CommitId {
        let n = self.next_commit.fetch_add(1, Ordering::SeqCst);
        let id = CommitId::new(format!("c{n:07}"));
        graph.parents.insert(id.clone(), parents);
        graph.messages.insert(id.clone(), message.to_string());
        graph.order.insert(id.clone(), n);
        id
    }

    /// Point `branch` of `repo` at `commit`
    pub fn set_branch(&self, repo: &Repository, branch: &str, commit: &CommitId) {
        self.set_ref(&repo.path, &format!("refs/heads/{branch}"), commit);
    }

    /// Point any ref at `commit`
    pub fn set_ref(&self, repo: &Path, ref_name: &str, commit: &CommitId) {
        self.graph
            .lock()
            .unwrap()
            .refs
            .insert((repo.to_path_buf(), ref_name.to_string()), commit.clone());
    }

    /// Delete `branch` of `repo`
    pub fn remove_branch(&self, repo: &Repository, branch: &str) {
        self.graph
            .lock()
            .unwrap()
            .refs
            .remove(&(repo.path.clone(), format!("refs/heads/{branch}")));
    }

    /// Current value of `branch`
    pub fn branch_head(&self, repo: &Repository, branch: &str) -> Option<CommitId> {
        self.ref_value(&repo.path, &format!("refs/heads/{branch}"))
    }

    /// Current value of any ref
    pub fn ref_value(&self, repo: &Path, ref_name: &str) -> Option<CommitId> {
        self.graph
            .lock()
            .unwrap()
            .refs
            .get(&(repo.to_path_buf(), ref_name.to_string()))
            .cloned()
    }

    /// Parents of a commit
    pub fn parents_of(&self, commit: &CommitId) -> Vec<CommitId> {
        self.graph
            .lock()
            .unwrap()
            .parents
            .get(commit)
            .cloned()
            .unwrap_or_default()
    }

    /// Message of a commit
    pub fn message_of(&self, commit: &CommitId) -> String {
        self.graph
            .lock()
            .unwrap()
            .messages
            .get(commit)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every merge, squash or cherry-pick of `commit` conflict
    pub fn conflict_on(&self, commit: &CommitId) {
        self.conflicting.lock().unwrap().insert(commit.clone());
    }

    /// Make merges take a while, to observe concurrency
    pub fn set_merge_delay(&self, delay: Duration) {
        *self.merge_delay.lock().unwrap() = Some(delay);
    }

    // =========================================================================
    // Error injection
    // =========================================================================

    /// Configure `merge` to fail
    pub fn fail_merge(&self, msg: &str) {
        *self.error_on_merge.lock().unwrap() = Some(msg.to_string());
    }

    /// Stop failing merges
    pub fn clear_merge_failure(&self) {
        *self.error_on_merge.lock().unwrap() = None;
    }

    /// Configure `update_ref` to fail
    pub fn fail_update_ref(&self, msg: &str) {
        *self.error_on_update_ref.lock().unwrap() = Some(msg.to_string());
    }

    /// Make every compare-and-swap of `ref_name` lose a race
    pub fn race_on_ref(&self, ref_name: &str) {
        self.raced_refs.lock().unwrap().insert(ref_name.to_string());
    }

    // =========================================================================
    // Call tracking
    // =========================================================================

    /// Get all `merge` calls
    pub fn get_merge_calls(&self) -> Vec<MergeCall> {
        self.merge_calls.lock().unwrap().clone()
    }

    /// Get all `squash` calls
    pub fn get_squash_calls(&self) -> Vec<CommitId> {
        self.squash_calls.lock().unwrap().clone()
    }

    /// Get all `cherry_pick` calls
    pub fn get_cherry_pick_calls(&self) -> Vec<Vec<CommitId>> {
        self.cherry_pick_calls.lock().unwrap().clone()
    }

    /// Get all `clone_into` calls (the working directories)
    pub fn get_clone_calls(&self) -> Vec<PathBuf> {
        self.clone_calls.lock().unwrap().clone()
    }

    /// Get all `update_ref` calls
    pub fn get_update_ref_calls(&self) -> Vec<UpdateRefCall> {
        self.update_ref_calls.lock().unwrap().clone()
    }

    /// `update_ref` calls touching a branch
    pub fn get_branch_updates(&self) -> Vec<UpdateRefCall> {
        self.get_update_ref_calls()
            .into_iter()
            .filter(|call| call.ref_name.starts_with("refs/heads/"))
            .collect()
    }

    /// Get all `delete_ref` calls
    pub fn get_delete_ref_calls(&self) -> Vec<String> {
        self.delete_ref_calls.lock().unwrap().clone()
    }

    /// Get all `fetch` refspecs
    pub fn get_fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }

    /// Highest number of merges observed running at once
    pub fn max_concurrent_merges(&self) -> usize {
        self.max_running_merges.load(Ordering::SeqCst)
    }

    /// Number of merge, squash and cherry-pick calls
    pub fn operation_count(&self) -> usize {
        self.merge_calls.lock().unwrap().len()
            + self.squash_calls.lock().unwrap().len()
            + self.cherry_pick_calls.lock().unwrap().len()
    }

    fn conflicts_with(&self, commits: &[CommitId]) -> bool {
        let conflicting = self.conflicting.lock().unwrap();
        commits.iter().any(|commit| conflicting.contains(commit))
    }
}

#[async_trait]
impl VersionControl for MockVersionControl {
    async fn resolve_ref(&self, repo: &Path, ref_name: &str) -> Result<Option<CommitId>> {
        let graph = self.graph.lock().unwrap();
        if let Some(commit) = graph.refs.get(&(repo.to_path_buf(), ref_name.to_string())) {
            return Ok(Some(commit.clone()));
        }
        let commit = CommitId::from(ref_name);
        Ok(graph.parents.contains_key(&commit).then_some(commit))
    }

    async fn is_ancestor(
        &self,
        _repo: &Path,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool> {
        Ok(self.graph.lock().unwrap().reachable(descendant).contains(ancestor))
    }

    async fn log(&self, _repo: &Path, from: &CommitId, to: &CommitId) -> Result<Vec<CommitId>> {
        Ok(self.graph.lock().unwrap().range(from, to))
    }

    async fn merge_base(
        &self,
        _repo: &Path,
        a: &CommitId,
        b: &CommitId,
    ) -> Result<Option<CommitId>> {
        let graph = self.graph.lock().unwrap();
        let ours = graph.reachable(a);
        Ok(graph
            .reachable(b)
            .into_iter()
            .filter(|commit| ours.contains(commit))
            .max_by_key(|commit| graph.order.get(commit).copied()))
    }

    async fn commit_message(&self, _repo: &Path, commit: &CommitId) -> Result<String> {
        self.graph
            .lock()
            .unwrap()
            .messages
            .get(commit)
            .cloned()
            .ok_or_else(|| git_error("log", "unknown revision"))
    }

    async fn update_ref(
        &self,
        repo: &Path,
        ref_name: &str,
        new_value: &CommitId,
        expected: &RefExpectation,
        _reason: &str,
    ) -> Result<()> {
        self.update_ref_calls.lock().unwrap().push(UpdateRefCall {
            repo: repo.to_path_buf(),
            ref_name: ref_name.to_string(),
            new_value: new_value.clone(),
            expected: expected.clone(),
        });
        if let Some(msg) = self.error_on_update_ref.lock().unwrap().as_ref() {
            return Err(git_error("update-ref", msg));
        }

        let mut graph = self.graph.lock().unwrap();
        let key = (repo.to_path_buf(), ref_name.to_string());
        let actual = graph.refs.get(&key).cloned();
        let raced = self.raced_refs.lock().unwrap().contains(ref_name);
        let matches = !raced
            && match expected {
                RefExpectation::Any => true,
                RefExpectation::Absent => actual.is_none(),
                RefExpectation::Value(old) => actual.as_ref() == Some(old),
            };
        if !matches {
            return Err(Error::RefConflict {
                ref_name: ref_name.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        graph.refs.insert(key, new_value.clone());
        Ok(())
    }

    async fn delete_ref(&self, repo: &Path, ref_name: &str) -> Result<()> {
        self.delete_ref_calls
            .lock()
            .unwrap()
            .push(ref_name.to_string());
        self.graph
            .lock()
            .unwrap()
            .refs
            .remove(&(repo.to_path_buf(), ref_name.to_string()));
        Ok(())
    }

    async fn fetch(&self, repo: &Path, from_repo: &Path, refspec: &str) -> Result<()> {
        self.fetch_calls.lock().unwrap().push(refspec.to_string());
        let (src, dst) = refspec
            .trim_start_matches('+')
            .split_once(':')
            .ok_or_else(|| git_error("fetch", "invalid refspec"))?;

        let mut graph = self.graph.lock().unwrap();
        let commit = if src == "HEAD" {
            graph.workdir_head(from_repo)?
        } else {
            graph
                .refs
                .get(&(from_repo.to_path_buf(), src.to_string()))
                .cloned()
                .ok_or_else(|| git_error("fetch", "couldn't find remote ref"))?
        };
        graph
            .refs
            .insert((repo.to_path_buf(), dst.to_string()), commit);
        Ok(())
    }

    async fn clone_into(&self, repo: &Path, dir: &Path, branch: &str) -> Result<()> {
        self.clone_calls.lock().unwrap().push(dir.to_path_buf());
        let mut graph = self.graph.lock().unwrap();
        let head = graph
            .refs
            .get(&(repo.to_path_buf(), format!("refs/heads/{branch}")))
            .cloned()
            .ok_or_else(|| git_error("clone", "remote branch not found"))?;
        graph.workdirs.insert(dir.to_path_buf(), head);
        Ok(())
    }

    async fn reset_hard(&self, workdir: &Path, commit: &CommitId) -> Result<()> {
        let mut graph = self.graph.lock().unwrap();
        if !graph.parents.contains_key(commit) {
            return Err(git_error("reset", "unknown revision"));
        }
        graph.workdirs.insert(workdir.to_path_buf(), commit.clone());
        Ok(())
    }

    async fn list_cherries(
        &self,
        _workdir: &Path,
        upstream: &CommitId,
        head: &CommitId,
    ) -> Result<Vec<CommitId>> {
        let mut commits = self.graph.lock().unwrap().range(upstream, head);
        commits.reverse();
        Ok(commits)
    }

    async fn cherry_pick(&self, workdir: &Path, commits: &[CommitId]) -> Result<Option<CommitId>> {
        self.cherry_pick_calls
            .lock()
            .unwrap()
            .push(commits.to_vec());
        if self.conflicts_with(commits) {
            return Ok(None);
        }

        let mut graph = self.graph.lock().unwrap();
        let mut head = graph.workdir_head(workdir)?;
        for commit in commits {
            let message = graph.messages.get(commit).cloned().unwrap_or_default();
            head = self.new_commit(&mut graph, vec![head], &message);
        }
        graph.workdirs.insert(workdir.to_path_buf(), head.clone());
        Ok(Some(head))
    }

    async fn merge(
        &self,
        workdir: &Path,
        commit: &CommitId,
        mode: FastForwardMode,
        message: &str,
    ) -> Result<Option<CommitId>> {
        self.merge_calls.lock().unwrap().push(MergeCall {
            commit: commit.clone(),
            mode,
            message: message.to_string(),
        });

        let running = self.running_merges.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running_merges.fetch_max(running, Ordering::SeqCst);
        let delay = *self.merge_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.running_merges.fetch_sub(1, Ordering::SeqCst);

        if let Some(msg) = self.error_on_merge.lock().unwrap().as_ref() {
            return Err(git_error("merge", msg));
        }
        if self.conflicts_with(std::slice::from_ref(commit)) {
            return Ok(None);
        }

        let mut graph = self.graph.lock().unwrap();
        let head = graph.workdir_head(workdir)?;
        let result = if graph.reachable(&head).contains(commit) {
            head
        } else if mode == FastForwardMode::FastForward && graph.reachable(commit).contains(&head) {
            commit.clone()
        } else {
            self.new_commit(&mut graph, vec![head, commit.clone()], message)
        };
        graph.workdirs.insert(workdir.to_path_buf(), result.clone());
        Ok(Some(result))
    }

    async fn squash(
        &self,
        workdir: &Path,
        commit: &CommitId,
        message: &str,
    ) -> Result<Option<CommitId>> {
        self.squash_calls.lock().unwrap().push(commit.clone());
        if self.conflicts_with(std::slice::from_ref(commit)) {
            return Ok(None);
        }

        let mut graph = self.graph.lock().unwrap();
        let head = graph.workdir_head(workdir)?;
        let squashed = self.new_commit(&mut graph, vec![head], message);
        graph.workdirs.insert(workdir.to_path_buf(), squashed.clone());
        Ok(Some(squashed))
    }

    async fn amend_head(&self, workdir: &Path, message: &str) -> Result<CommitId> {
        let mut graph = self.graph.lock().unwrap();
        let head = graph.workdir_head(workdir)?;
        let parents = graph.parents.get(&head).cloned().unwrap_or_default();
        let amended = self.new_commit(&mut graph, parents, message);
        graph.workdirs.insert(workdir.to_path_buf(), amended.clone());
        Ok(amended)
    }
}
