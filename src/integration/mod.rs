//! Integration preview calculation
//!
//! - [`plan`]: pure decision of how a strategy integrates given graph facts
//! - [`execute`]: runs a plan in an ephemeral clone of the target repository

pub mod execute;
pub mod plan;

pub use execute::{PreviewTarget, amend_integrated, execute_preview, gather_facts};
pub use plan::{
    CloneOperation, GraphFacts, IntegrationSteps, PreviewInput, PreviewPlan, plan_integration,
    plan_preview,
};

use crate::error::{Error, Result};
use crate::types::{CommitId, IntegrationPreview, PullRequest, RepoAndBranch};
use crate::vcs::VersionControl;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolve the head of `branch`, failing if the branch is gone
pub async fn branch_head(vcs: &dyn VersionControl, branch: &RepoAndBranch) -> Result<CommitId> {
    vcs.resolve_ref(&branch.repository.path, &branch.ref_name())
        .await?
        .ok_or_else(|| Error::BranchNotFound {
            repository: branch.repository.name.clone(),
            branch: branch.branch.clone(),
        })
}

/// Computes integration previews, reusing a still valid cached one
#[derive(Clone)]
pub struct IntegrationPreviewCalculator {
    vcs: Arc<dyn VersionControl>,
}

impl IntegrationPreviewCalculator {
    /// Create a calculator over the given facade
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }

    /// The request's cached preview if it still matches the current heads and
    /// strategy
    pub async fn cached(&self, request: &PullRequest) -> Result<Option<IntegrationPreview>> {
        let Some(preview) = &request.last_integration_preview else {
            return Ok(None);
        };
        let Some(request_head) = request.request_head() else {
            return Ok(None);
        };
        let target_head = branch_head(self.vcs.as_ref(), &request.target).await?;
        if preview.is_obsolete(&target_head, request_head, request.strategy) {
            Ok(None)
        } else {
            Ok(Some(preview.clone()))
        }
    }

    /// Preview integrating `request` into its target branch.
    ///
    /// A valid cached preview is returned as is. Otherwise the preview is
    /// computed from scratch and the integration ref updated; the caller is
    /// responsible for storing the result on the request.
    pub async fn compute(&self, request: &PullRequest) -> Result<IntegrationPreview> {
        let target_head = branch_head(self.vcs.as_ref(), &request.target).await?;
        let input = PreviewInput::new(request, target_head)?;

        if let Some(preview) = &request.last_integration_preview
            && !preview.is_obsolete(&input.target_head, &input.request_head, input.strategy)
        {
            debug!(request_id = %request.id, "integration preview is up to date");
            return Ok(preview.clone());
        }

        let repo = request.target.repository.path.as_path();
        let facts = gather_facts(self.vcs.as_ref(), repo, &input).await?;
        let plan = plan_preview(&input, facts);
        debug!(
            request_id = %request.id,
            strategy = %input.strategy,
            %plan,
            "planned integration preview"
        );

        let integrate_ref = request.integrate_ref();
        let integrated = execute_preview(
            self.vcs.as_ref(),
            PreviewTarget {
                repo,
                branch: &request.target.branch,
                integrate_ref: &integrate_ref,
            },
            &plan,
        )
        .await?;

        match &integrated {
            Some(commit) => info!(
                request_id = %request.id,
                integrated = %commit.short(),
                "integration preview calculated"
            ),
            None => info!(request_id = %request.id, "integration preview has conflicts"),
        }

        Ok(IntegrationPreview {
            target_head: input.target_head,
            request_head: input.request_head,
            strategy: input.strategy,
            integrated,
        })
    }
}
