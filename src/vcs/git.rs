//! Git CLI implementation of the version control facade

use crate::config::GitConfig;
use crate::error::{Error, Result};
use crate::types::CommitId;
use crate::vcs::{FastForwardMode, RefExpectation, VersionControl};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Runs the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    executable: PathBuf,
    user_name: String,
    user_email: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(&GitConfig::default())
    }
}

impl GitCli {
    /// Create a git runner from configuration
    pub fn new(config: &GitConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            user_name: config.committer_name.clone(),
            user_email: config.committer_email.clone(),
        }
    }

    /// Run git in `dir`, returning the raw output regardless of exit status
    async fn run<I, S>(&self, dir: &Path, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let command = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(command = %command, dir = %dir.display(), "running git");

        Command::new(&self.executable)
            .arg("-C")
            .arg(dir)
            .arg("-c")
            .arg(format!("user.name={}", self.user_name))
            .arg("-c")
            .arg(format!("user.email={}", self.user_email))
            .arg("-c")
            .arg("commit.gpgsign=false")
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("LC_ALL", "C")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Git {
                command,
                message: format!("failed to spawn git: {e}"),
            })
    }

    /// Run git and fail on a non-zero exit, returning trimmed stdout
    async fn run_ok<I, S>(&self, dir: &Path, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let output = self.run(dir, &args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(command_error(&args, &output))
        }
    }

    async fn head(&self, workdir: &Path) -> Result<CommitId> {
        let hex = self.run_ok(workdir, ["rev-parse", "HEAD"]).await?;
        Ok(CommitId::new(hex))
    }

    /// Whether the working copy has unmerged paths
    async fn has_conflicts(&self, workdir: &Path) -> Result<bool> {
        let unmerged = self.run_ok(workdir, ["ls-files", "--unmerged"]).await?;
        Ok(!unmerged.is_empty())
    }

    /// Map the outcome of a conflict-prone command
    async fn conflict_outcome(
        &self,
        workdir: &Path,
        args: &[&str],
        output: &Output,
    ) -> Result<Option<CommitId>> {
        if output.status.success() {
            return self.head(workdir).await.map(Some);
        }
        if self.has_conflicts(workdir).await? {
            debug!(command = args[0], "conflicts detected");
            return Ok(None);
        }
        Err(command_error(args, output))
    }
}

fn command_error<S: AsRef<OsStr>>(args: &[S], output: &Output) -> Error {
    let command = args
        .first()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .unwrap_or_default();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Error::Git {
        command,
        message: if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        },
    }
}

fn lines_to_commits(stdout: &str) -> Vec<CommitId> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(CommitId::from)
        .collect()
}

/// Parse `git cherry` output, keeping commits not yet upstream
fn parse_cherries(stdout: &str) -> Vec<CommitId> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("+ "))
        .map(|hex| CommitId::from(hex.trim()))
        .collect()
}

#[async_trait]
impl VersionControl for GitCli {
    async fn resolve_ref(&self, repo: &Path, ref_name: &str) -> Result<Option<CommitId>> {
        let revision = format!("{ref_name}^{{commit}}");
        let args = ["rev-parse", "--verify", "--quiet", revision.as_str()];
        let output = self.run(repo, args).await?;
        if output.status.success() {
            let hex = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(CommitId::new(hex)))
        } else if output.status.code() == Some(1) {
            Ok(None)
        } else {
            Err(command_error(&args, &output))
        }
    }

    async fn is_ancestor(
        &self,
        repo: &Path,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool> {
        let args = [
            "merge-base",
            "--is-ancestor",
            ancestor.as_str(),
            descendant.as_str(),
        ];
        let output = self.run(repo, args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_error(&args, &output)),
        }
    }

    async fn log(&self, repo: &Path, from: &CommitId, to: &CommitId) -> Result<Vec<CommitId>> {
        let range = format!("{from}..{to}");
        let stdout = self.run_ok(repo, ["rev-list", range.as_str()]).await?;
        Ok(lines_to_commits(&stdout))
    }

    async fn merge_base(
        &self,
        repo: &Path,
        a: &CommitId,
        b: &CommitId,
    ) -> Result<Option<CommitId>> {
        let args = ["merge-base", a.as_str(), b.as_str()];
        let output = self.run(repo, args).await?;
        if output.status.success() {
            let hex = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(CommitId::new(hex)))
        } else if output.status.code() == Some(1) {
            Ok(None)
        } else {
            Err(command_error(&args, &output))
        }
    }

    async fn commit_message(&self, repo: &Path, commit: &CommitId) -> Result<String> {
        self.run_ok(repo, ["log", "-1", "--format=%B", commit.as_str()])
            .await
    }

    async fn update_ref(
        &self,
        repo: &Path,
        ref_name: &str,
        new_value: &CommitId,
        expected: &RefExpectation,
        reason: &str,
    ) -> Result<()> {
        debug!(ref_name, new_value = %new_value, %expected, "updating ref");
        let mut args = vec!["update-ref", "-m", reason, ref_name, new_value.as_str()];
        match expected {
            RefExpectation::Any => {}
            RefExpectation::Absent => args.push(""),
            RefExpectation::Value(old) => args.push(old.as_str()),
        }

        let output = self.run(repo, &args).await?;
        if output.status.success() {
            return Ok(());
        }

        let actual = self.resolve_ref(repo, ref_name).await?;
        let conflicting = match expected {
            RefExpectation::Any => false,
            RefExpectation::Absent => actual.is_some(),
            RefExpectation::Value(old) => actual.as_ref() != Some(old),
        };
        if conflicting {
            Err(Error::RefConflict {
                ref_name: ref_name.to_string(),
                expected: expected.to_string(),
                actual,
            })
        } else {
            Err(command_error(&args[..], &output))
        }
    }

    async fn delete_ref(&self, repo: &Path, ref_name: &str) -> Result<()> {
        if self.resolve_ref(repo, ref_name).await?.is_none() {
            return Ok(());
        }
        debug!(ref_name, "deleting ref");
        self.run_ok(repo, ["update-ref", "-d", ref_name]).await?;
        Ok(())
    }

    async fn fetch(&self, repo: &Path, from_repo: &Path, refspec: &str) -> Result<()> {
        let from = tokio::fs::canonicalize(from_repo).await?;
        let from = from.to_string_lossy();
        self.run_ok(repo, ["fetch", "--quiet", "--no-tags", from.as_ref(), refspec])
            .await?;
        Ok(())
    }

    async fn clone_into(&self, repo: &Path, dir: &Path, branch: &str) -> Result<()> {
        let source = tokio::fs::canonicalize(repo).await?;
        let source = source.to_string_lossy();
        let target = dir.to_string_lossy();
        self.run_ok(
            repo,
            [
                "clone",
                "--quiet",
                "--shared",
                "--no-checkout",
                "--branch",
                branch,
                source.as_ref(),
                target.as_ref(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn reset_hard(&self, workdir: &Path, commit: &CommitId) -> Result<()> {
        self.run_ok(workdir, ["reset", "--quiet", "--hard", commit.as_str()])
            .await?;
        Ok(())
    }

    async fn list_cherries(
        &self,
        workdir: &Path,
        upstream: &CommitId,
        head: &CommitId,
    ) -> Result<Vec<CommitId>> {
        let stdout = self
            .run_ok(workdir, ["cherry", upstream.as_str(), head.as_str()])
            .await?;
        Ok(parse_cherries(&stdout))
    }

    async fn cherry_pick(&self, workdir: &Path, commits: &[CommitId]) -> Result<Option<CommitId>> {
        if commits.is_empty() {
            return self.head(workdir).await.map(Some);
        }
        let mut args = vec!["cherry-pick", "--allow-empty"];
        args.extend(commits.iter().map(CommitId::as_str));
        let output = self.run(workdir, &args).await?;
        self.conflict_outcome(workdir, &args, &output).await
    }

    async fn merge(
        &self,
        workdir: &Path,
        commit: &CommitId,
        mode: FastForwardMode,
        message: &str,
    ) -> Result<Option<CommitId>> {
        let ff = match mode {
            FastForwardMode::FastForward => "--ff",
            FastForwardMode::NoFastForward => "--no-ff",
        };
        let args = ["merge", "--no-edit", ff, "-m", message, commit.as_str()];
        let output = self.run(workdir, args).await?;
        self.conflict_outcome(workdir, &args, &output).await
    }

    async fn squash(
        &self,
        workdir: &Path,
        commit: &CommitId,
        message: &str,
    ) -> Result<Option<CommitId>> {
        let args = ["merge", "--squash", commit.as_str()];
        let output = self.run(workdir, args).await?;
        if !output.status.success() {
            return self.conflict_outcome(workdir, &args, &output).await;
        }
        self.run_ok(workdir, ["commit", "--quiet", "--allow-empty", "-m", message])
            .await?;
        self.head(workdir).await.map(Some)
    }

    async fn amend_head(&self, workdir: &Path, message: &str) -> Result<CommitId> {
        self.run_ok(
            workdir,
            ["commit", "--quiet", "--amend", "--allow-empty", "-m", message],
        )
        .await?;
        self.head(workdir).await
    }
}
