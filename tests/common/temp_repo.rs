//! Temporary git repositories for end-to-end tests

use pr_engine::types::{RepoAndBranch, Repository};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// A git repository in a temporary directory with `main` holding one commit
pub struct TempGitRepo {
    dir: TempDir,
}

impl TempGitRepo {
    /// Create a repository with an initial commit on `main`
    pub fn new() -> Self {
        let repo = Self {
            dir: TempDir::new().expect("create temp dir"),
        };
        repo.git(&["init", "--quiet"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.write_and_commit("README.md", "# test\n", "Initial commit");
        repo
    }

    /// Clone `upstream` with all its branches, like a fork
    pub fn fork_of(upstream: &Self) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let repo = Self { dir };
        repo.git(&["init", "--quiet"]);
        repo.git(&[
            "fetch",
            "--quiet",
            "--update-head-ok",
            upstream.path().to_str().expect("utf-8 path"),
            "+refs/heads/*:refs/heads/*",
        ]);
        repo.git(&["checkout", "--quiet", "-f", "main"]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Engine handle of this repository
    pub fn repository(&self, id: u64) -> Repository {
        let path = fs::canonicalize(self.path()).expect("canonicalize");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        Repository::new(id, name, path)
    }

    /// Engine handle of a branch of this repository
    pub fn branch(&self, id: u64, name: &str) -> RepoAndBranch {
        RepoAndBranch::new(self.repository(id), name)
    }

    /// Run git, panicking on failure; returns trimmed stdout
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(self.path())
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .env("GIT_AUTHOR_NAME", "Test Author")
            .env("GIT_AUTHOR_EMAIL", "author@example.com")
            .env("GIT_COMMITTER_NAME", "Test Author")
            .env("GIT_COMMITTER_EMAIL", "author@example.com")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Create `name` at `from`
    pub fn create_branch(&self, name: &str, from: &str) {
        self.git(&["branch", name, from]);
    }

    /// Commit `content` to `file` on `branch`, returning the new head
    pub fn commit_on(&self, branch: &str, file: &str, content: &str, message: &str) -> String {
        self.git(&["checkout", "--quiet", "-f", branch]);
        self.write_and_commit(file, content, message)
    }

    fn write_and_commit(&self, file: &str, content: &str, message: &str) -> String {
        fs::write(self.path().join(file), content).expect("write file");
        self.git(&["add", file]);
        self.git(&["commit", "--quiet", "-m", message]);
        self.git(&["rev-parse", "HEAD"])
    }

    /// Head of `branch`
    pub fn head(&self, branch: &str) -> String {
        self.git(&["rev-parse", &format!("refs/heads/{branch}")])
    }

    /// Value of any ref, `None` if it doesn't exist
    pub fn ref_value(&self, ref_name: &str) -> Option<String> {
        let output = Command::new("git")
            .current_dir(self.path())
            .args(["rev-parse", "--verify", "--quiet", ref_name])
            .output()
            .expect("run git");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Parents of `commit`
    pub fn parents(&self, commit: &str) -> Vec<String> {
        self.git(&["rev-list", "--parents", "-n", "1", commit])
            .split_whitespace()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    /// Full message of `commit`
    pub fn message(&self, commit: &str) -> String {
        self.git(&["log", "-1", "--format=%B", commit])
    }

    /// Content of `file` at `commit`
    pub fn show(&self, commit: &str, file: &str) -> String {
        self.git(&["show", &format!("{commit}:{file}")])
    }

    /// Delete `branch`, checking out `main` first
    pub fn delete_branch(&self, branch: &str) {
        self.git(&["checkout", "--quiet", "-f", "main"]);
        self.git(&["branch", "-D", branch]);
    }
}
