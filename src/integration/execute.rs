//! Integration execution - effectful operations
//!
//! Runs a [`PreviewPlan`] against the version control facade. Anything that
//! creates commits happens in an ephemeral clone of the target repository;
//! the primary repository only ever sees the resulting commit fetched into
//! the request's integration ref.

use crate::error::Result;
use crate::integration::plan::{CloneOperation, GraphFacts, PreviewInput, PreviewPlan};
use crate::types::CommitId;
use crate::vcs::{RefExpectation, VersionControl};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// Where a preview is executed
#[derive(Debug, Clone, Copy)]
pub struct PreviewTarget<'a> {
    /// Target repository
    pub repo: &'a Path,
    /// Target branch, checked out by the clone
    pub branch: &'a str,
    /// Integration ref receiving the result
    pub integrate_ref: &'a str,
}

/// Query the commit graph for the facts [`plan_preview`] needs
///
/// [`plan_preview`]: crate::integration::plan::plan_preview
pub async fn gather_facts(
    vcs: &dyn VersionControl,
    repo: &Path,
    input: &PreviewInput,
) -> Result<GraphFacts> {
    let target_is_ancestor = vcs
        .is_ancestor(repo, &input.target_head, &input.request_head)
        .await?;
    let commits_ahead = if GraphFacts::needs_commit_count(input.strategy, target_is_ancestor) {
        Some(
            vcs.log(repo, &input.target_head, &input.request_head)
                .await?
                .len(),
        )
    } else {
        None
    };
    Ok(GraphFacts {
        target_is_ancestor,
        commits_ahead,
    })
}

/// Execute the preview plan (EFFECTFUL)
///
/// Returns the integrated commit, or `None` when the operation ran into
/// conflicts. The integration ref is pointed at the result, or deleted on
/// conflict. The ephemeral clone is removed on every exit path.
pub async fn execute_preview(
    vcs: &dyn VersionControl,
    target: PreviewTarget<'_>,
    plan: &PreviewPlan,
) -> Result<Option<CommitId>> {
    let (checkout, operation) = match plan {
        PreviewPlan::FastForward(commit) => {
            vcs.update_ref(
                target.repo,
                target.integrate_ref,
                commit,
                &RefExpectation::Any,
                "integration preview",
            )
            .await?;
            return Ok(Some(commit.clone()));
        }
        PreviewPlan::InClone {
            checkout,
            operation,
        } => (checkout, operation),
    };

    let workdir = TempDir::new()?;
    let dir = workdir.path();
    debug!(dir = %dir.display(), %plan, "computing preview in ephemeral clone");

    vcs.clone_into(target.repo, dir, target.branch).await?;
    vcs.reset_hard(dir, checkout).await?;

    let integrated = match operation {
        CloneOperation::CherryPick { upstream, head } => {
            let cherries = vcs.list_cherries(dir, upstream, head).await?;
            debug!(count = cherries.len(), "replaying commits");
            vcs.cherry_pick(dir, &cherries).await?
        }
        CloneOperation::Squash { commit, message } => vcs.squash(dir, commit, message).await?,
        CloneOperation::Merge {
            commit,
            mode,
            message,
        } => vcs.merge(dir, commit, *mode, message).await?,
    };

    if integrated.is_some() {
        let refspec = format!("+HEAD:{}", target.integrate_ref);
        vcs.fetch(target.repo, dir, &refspec).await?;
    } else {
        vcs.delete_ref(target.repo, target.integrate_ref).await?;
    }
    Ok(integrated)
}

/// Rewrite the message of `integrated` in an ephemeral clone and fetch the
/// rewritten commit into the integration ref (EFFECTFUL)
pub async fn amend_integrated(
    vcs: &dyn VersionControl,
    target: PreviewTarget<'_>,
    integrated: &CommitId,
    message: &str,
) -> Result<CommitId> {
    let workdir = TempDir::new()?;
    let dir = workdir.path();

    vcs.clone_into(target.repo, dir, target.branch).await?;
    vcs.reset_hard(dir, integrated).await?;
    let amended = vcs.amend_head(dir, message).await?;

    let refspec = format!("+HEAD:{}", target.integrate_ref);
    vcs.fetch(target.repo, dir, &refspec).await?;
    debug!(from = %integrated.short(), to = %amended.short(), "amended integrated commit");
    Ok(amended)
}
