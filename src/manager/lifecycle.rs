//! Lifecycle transitions of pull requests
//!
//! Public operations open a transaction, delegate to an `*_in` helper that
//! stages changes, and commit. Helpers call each other within the same
//! transaction so a ref update handled during an integration lands
//! atomically with it.

use crate::error::{Error, Result};
use crate::integration::plan::amended_message;
use crate::integration::{PreviewTarget, amend_integrated, branch_head, plan_integration};
use crate::listener::PullRequestEvent;
use crate::manager::{AUTO_INTEGRATE_COMMENT, PullRequestManager};
use crate::mention::parse_mentions;
use crate::policy::strategies_for;
use crate::store::{Deferred, RequestCriteria, Transaction};
use crate::types::{
    ActivityAction, CloseStatus, CommitId, IntegrationStrategy, PullRequest, PullRequestActivity,
    PullRequestComment, PullRequestDraft, RepoAndBranch, Repository, RequestId, RequestStatus,
    ref_to_branch,
};
use crate::vcs::RefExpectation;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

/// Comment recorded when a request is discarded because its target branch is gone
pub const TARGET_DELETED_COMMENT: &str = "Target branch is deleted.";

/// Comment recorded when a request is discarded because its source branch is gone
pub const SOURCE_DELETED_COMMENT: &str = "Source branch is deleted.";

/// Comment recorded when a request is discarded because its source repository is gone
pub const SOURCE_REPOSITORY_DELETED_COMMENT: &str = "Source repository is deleted.";

fn record(
    tx: &mut Transaction,
    request: &PullRequest,
    action: ActivityAction,
    user: Option<&str>,
    comment: Option<&str>,
    date: DateTime<Utc>,
) {
    tx.add_activity(PullRequestActivity {
        request_id: request.id,
        user: user.map(str::to_string),
        date,
        action,
    });
    if let Some(content) = comment {
        tx.add_comment(PullRequestComment {
            request_id: request.id,
            user: user.map(str::to_string),
            content: content.to_string(),
            date,
        });
    }
}

impl PullRequestManager {
    /// Open a new pull request.
    ///
    /// Takes the initial ref snapshot (base ref, head ref, one update ref per
    /// update), persists the request and notifies listeners of the opening
    /// and of every user @mentioned in the description. The first preview
    /// computation is submitted once the request is committed.
    pub async fn open(&self, draft: PullRequestDraft) -> Result<PullRequest> {
        let target_head = branch_head(self.vcs(), &draft.target).await?;
        let source_head = branch_head(self.vcs(), &draft.source).await?;

        let id = self.inner.store.next_request_id().await?;
        let strategy = match draft.strategy {
            Some(strategy) => strategy,
            None => strategies_for(&self.policies(), &draft.target.branch, &draft.source.branch)
                .into_iter()
                .next()
                .unwrap_or(IntegrationStrategy::MergeAlways),
        };
        let target_repo = draft.target.repository.path.clone();
        let cross_repository = draft.source.repository != draft.target.repository;

        let head_ref = format!("refs/pull/{id}/head");
        if cross_repository {
            let refspec = format!("+{}:{head_ref}", draft.source.ref_name());
            self.vcs()
                .fetch(&target_repo, &draft.source.repository.path, &refspec)
                .await?;
        }

        let base_commit = match draft.base_commit.clone() {
            Some(commit) => commit,
            None => self
                .vcs()
                .merge_base(&target_repo, &target_head, &source_head)
                .await?
                .ok_or_else(|| {
                    Error::illegal_state("Source and target branches have no common history.")
                })?,
        };

        let now = Utc::now();
        let mut request =
            PullRequest::from_draft(id, draft, strategy, base_commit, source_head, now);
        debug!(
            request_id = %id,
            source = %request.source,
            target = %request.target,
            %strategy,
            "opening pull request"
        );

        self.clean_cache_dir(id).await?;

        // Base ref first: update refs are validated against the ref graph
        self.vcs()
            .update_ref(
                &target_repo,
                &request.base_ref(),
                &request.base_commit,
                &RefExpectation::Any,
                "pull request base",
            )
            .await?;

        let mut date = now;
        for update in request.updates_mut() {
            date += TimeDelta::seconds(1);
            update.date = date;
        }
        for update in request.updates() {
            self.record_update_refs(&request, &update.head_commit, &update.head_ref())
                .await?;
        }

        let mut tx = self.begin().await;
        tx.save(&request);
        tx.after_commit(Deferred::Notify(PullRequestEvent::Opened(request.clone())));
        if let Some(description) = &request.description {
            for user in parse_mentions(description) {
                tx.after_commit(Deferred::Notify(PullRequestEvent::Mentioned {
                    request: request.clone(),
                    user,
                }));
            }
        }
        tx.after_commit(Deferred::SchedulePreview(id));
        self.commit(tx).await?;

        info!(request_id = %id, title = %request.title, "opened pull request");
        Ok(request)
    }

    /// Record a move of the source branch.
    ///
    /// Does nothing when the branch head equals the latest update. Otherwise a
    /// new update is recorded, the request is closed as integrated if the
    /// target already contains the new head, and a check is scheduled in the
    /// background once committed.
    pub async fn on_source_branch_update(&self, id: RequestId, notify: bool) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        self.source_update_in(&mut tx, &mut request, notify).await?;
        self.commit(tx).await
    }

    /// Record a move of the target branch: close the request if the target
    /// now contains it, otherwise recompute its preview
    pub async fn on_target_branch_update(&self, id: RequestId) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        if request.is_open() {
            self.close_if_merged_in(&mut tx, &mut request).await?;
            if request.is_open() {
                tx.after_commit(Deferred::SchedulePreview(id));
            }
        }
        self.commit(tx).await
    }

    /// Entry point for ref change notifications.
    ///
    /// Only branch refs are considered. A moved branch records new updates on
    /// the requests it is the source of right away; requests into the
    /// branch are handled in the background after commit. A deleted branch
    /// discards every open request from or into it.
    pub async fn on_ref_update(
        &self,
        repository: &Repository,
        ref_name: &str,
        new_head: Option<&CommitId>,
    ) -> Result<()> {
        let mut tx = self.begin().await;
        self.ref_update_in(&mut tx, repository, ref_name, new_head)
            .await?;
        self.commit(tx).await
    }

    /// Reopen a closed request.
    ///
    /// A deleted source branch is restored at the latest update first. The
    /// activity is dated one second in the past so it sorts before whatever
    /// the reopening triggers.
    pub async fn reopen(
        &self,
        id: RequestId,
        user: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        if request.is_open() {
            return Err(Error::illegal_state("Pull request is already open."));
        }

        self.restore_source_branch_of(&request).await?;

        let now = Utc::now();
        request.close_status = None;
        request.last_event_date = now;
        record(
            &mut tx,
            &request,
            ActivityAction::Reopen,
            user,
            comment,
            now - TimeDelta::seconds(1),
        );
        tx.save(&request);

        self.source_update_in(&mut tx, &mut request, false).await?;

        if request.is_open() {
            tx.after_commit(Deferred::Notify(PullRequestEvent::Reopened {
                request: request.clone(),
                user: user.map(str::to_string),
                comment: comment.map(str::to_string),
            }));
            tx.after_commit(Deferred::SchedulePreview(id));
        }
        self.commit(tx).await?;
        info!(request_id = %id, "reopened pull request");
        Ok(())
    }

    /// Recreate a closed request's deleted source branch at its latest update
    pub async fn restore_source_branch(&self, id: RequestId) -> Result<()> {
        let request = self.load(id).await?;
        if request.is_open() {
            return Err(Error::illegal_state(
                "Source branch can only be restored for closed pull requests.",
            ));
        }
        self.restore_source_branch_of(&request).await
    }

    /// Discard an open request
    pub async fn discard(
        &self,
        id: RequestId,
        user: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        Self::discard_in(&mut tx, &mut request, user, comment)?;
        self.commit(tx).await
    }

    /// Integrate a request approved for integration.
    ///
    /// Fails with [`Error::IllegalState`] before touching any ref when the
    /// request is not pending integration or has no conflict free preview.
    /// Refs move with compare-and-swap against the preview's heads.
    ///
    /// Strategies rewriting the source move it before the target. When the
    /// target swap then fails with [`Error::RefConflict`], the source branch
    /// stays rewritten; the next ref update records it as a new update.
    pub async fn integrate(
        &self,
        id: RequestId,
        user: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        self.integrate_in(&mut tx, &mut request, user, comment)
            .await?;
        self.commit(tx).await
    }

    /// Consolidate a request: close it if merged, then act on its status.
    ///
    /// Approved requests with a clean preview and no assignee are integrated
    /// automatically; a missing or outdated preview is scheduled for
    /// computation first. For requests waiting on approval, review invitations
    /// whose date has passed are renewed.
    pub async fn check(&self, id: RequestId) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        self.check_in(&mut tx, &mut request).await?;
        self.commit(tx).await
    }

    /// Change the assignee. Requests with an assignee are never integrated
    /// automatically.
    pub async fn on_assignee_change(&self, id: RequestId, assignee: Option<String>) -> Result<()> {
        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        request.assignee = assignee;
        tx.save(&request);
        tx.after_commit(Deferred::Notify(PullRequestEvent::Assigned(request)));
        self.commit(tx).await
    }

    /// Delete a request, its refs and its cache
    pub async fn delete(&self, id: RequestId) -> Result<()> {
        let mut tx = self.begin().await;
        let request = tx.load(id).await?;
        let repo = request.target.repository.path.as_path();

        for update in request.updates() {
            self.vcs().delete_ref(repo, &update.head_ref()).await?;
        }
        for ref_name in [
            request.base_ref(),
            request.head_ref(),
            request.integrate_ref(),
        ] {
            self.vcs().delete_ref(repo, &ref_name).await?;
        }
        match tokio::fs::remove_dir_all(self.request_cache_dir(id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        tx.delete(id);
        self.commit(tx).await?;
        info!(request_id = %id, "deleted pull request");
        Ok(())
    }

    /// Detach requests coming from a repository about to be deleted: open
    /// ones are discarded, and none of them can have its source branch
    /// restored afterwards. Requests within the repository itself go away
    /// with it.
    pub async fn before_repository_delete(&self, repository: &Repository) -> Result<()> {
        let mut tx = self.begin().await;
        let criteria = RequestCriteria::default().from_repository(repository.id);
        for mut request in tx.query(&criteria).await? {
            if request.target.repository == *repository {
                continue;
            }
            if request.is_open() {
                Self::discard_in(
                    &mut tx,
                    &mut request,
                    None,
                    Some(SOURCE_REPOSITORY_DELETED_COMMENT),
                )?;
            }
            request.source_repository_deleted = true;
            tx.save(&request);
        }
        self.commit(tx).await
    }

    // =========================================================================
    // Transaction helpers
    // =========================================================================

    pub(crate) async fn ref_update_in(
        &self,
        tx: &mut Transaction,
        repository: &Repository,
        ref_name: &str,
        new_head: Option<&CommitId>,
    ) -> Result<()> {
        let Some(branch) = ref_to_branch(ref_name) else {
            return Ok(());
        };
        let branch = RepoAndBranch::new(repository.clone(), branch);

        if let Some(head) = new_head {
            debug!(%branch, head = %head.short(), "branch updated");
            let sourced = RequestCriteria::open().with_source(branch.clone());
            for mut request in tx.query(&sourced).await? {
                self.source_update_in(tx, &mut request, true).await?;
            }
            tx.after_commit(Deferred::TargetBranchUpdated(branch));
        } else {
            debug!(%branch, "branch deleted");
            for mut request in tx.query(&RequestCriteria::open().touching(branch.clone())).await? {
                let comment = if request.target == branch {
                    TARGET_DELETED_COMMENT
                } else {
                    SOURCE_DELETED_COMMENT
                };
                Self::discard_in(tx, &mut request, None, Some(comment))?;
            }
        }
        Ok(())
    }

    pub(crate) async fn source_update_in(
        &self,
        tx: &mut Transaction,
        request: &mut PullRequest,
        notify: bool,
    ) -> Result<()> {
        let Some(source) = request.live_source() else {
            return Ok(());
        };
        let Some(source_head) = self
            .vcs()
            .resolve_ref(&source.repository.path, &source.ref_name())
            .await?
        else {
            return Ok(());
        };
        if request.request_head() == Some(&source_head) {
            return Ok(());
        }

        let update = request.add_update(source_head, Utc::now()).clone();
        self.record_update_refs(request, &update.head_commit, &update.head_ref())
            .await?;
        tx.save(request);
        debug!(
            request_id = %request.id,
            sequence = update.sequence,
            head = %update.head_commit.short(),
            "recorded pull request update"
        );
        if notify {
            tx.after_commit(Deferred::Notify(PullRequestEvent::Updated(request.clone())));
        }

        self.close_if_merged_in(tx, request).await?;
        if request.is_open() {
            tx.after_commit(Deferred::Check(request.id));
        }
        Ok(())
    }

    pub(crate) async fn close_if_merged_in(
        &self,
        tx: &mut Transaction,
        request: &mut PullRequest,
    ) -> Result<()> {
        let target_repo = request.target.repository.path.clone();
        let (Some(target_head), Some(request_head)) = (
            self.vcs()
                .resolve_ref(&target_repo, &request.target.ref_name())
                .await?,
            request.request_head(),
        ) else {
            return Ok(());
        };
        if !self
            .vcs()
            .is_ancestor(&target_repo, request_head, &target_head)
            .await?
        {
            return Ok(());
        }

        let now = Utc::now();
        record(tx, request, ActivityAction::Integrate, None, None, now);
        request.last_integration_preview = None;
        request.close_status = Some(CloseStatus::Integrated);
        request.last_event_date = now;
        tx.save(request);
        tx.after_commit(Deferred::Notify(PullRequestEvent::Integrated {
            request: request.clone(),
            user: None,
            comment: None,
        }));
        info!(request_id = %request.id, "target contains source, closed as integrated");
        Ok(())
    }

    pub(crate) fn discard_in(
        tx: &mut Transaction,
        request: &mut PullRequest,
        user: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        if !request.is_open() {
            return Err(Error::illegal_state("Pull request is already closed."));
        }
        let now = Utc::now();
        record(tx, request, ActivityAction::Discard, user, comment, now);
        request.close_status = Some(CloseStatus::Discarded);
        request.last_event_date = now;
        tx.save(request);
        tx.after_commit(Deferred::Notify(PullRequestEvent::Discarded {
            request: request.clone(),
            user: user.map(str::to_string),
            comment: comment.map(str::to_string),
        }));
        info!(request_id = %request.id, reason = comment.unwrap_or(""), "discarded pull request");
        Ok(())
    }

    pub(crate) async fn integrate_in(
        &self,
        tx: &mut Transaction,
        request: &mut PullRequest,
        user: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        if self.status(request) != RequestStatus::PendingIntegrate {
            return Err(Error::illegal_state(
                "Gate keeper disallows integration right now.",
            ));
        }
        let preview = self
            .inner
            .calculator
            .cached(request)
            .await?
            .ok_or_else(|| {
                Error::illegal_state("Integration preview has not been calculated yet.")
            })?;
        let steps = plan_integration(request.strategy, &preview, comment)?;

        let id = request.id;
        let target = request.target.clone();
        let source = request.source.clone();
        let integrate_ref = request.integrate_ref();
        let reason = format!("Pull request #{id}");

        let mut integrated = steps.integrated.clone();
        if let Some(comment) = &steps.amend_with {
            let original = self
                .vcs()
                .commit_message(&target.repository.path, &integrated)
                .await?;
            integrated = amend_integrated(
                self.vcs(),
                PreviewTarget {
                    repo: &target.repository.path,
                    branch: &target.branch,
                    integrate_ref: &integrate_ref,
                },
                &integrated,
                &amended_message(&original, comment),
            )
            .await?;
        }

        if steps.update_source {
            if request.is_cross_repository() {
                // Bring the integrated commit into the source repository
                self.vcs()
                    .fetch(
                        &source.repository.path,
                        &target.repository.path,
                        &format!("+{integrate_ref}:{integrate_ref}"),
                    )
                    .await?;
            }
            self.vcs()
                .update_ref(
                    &source.repository.path,
                    &source.ref_name(),
                    &integrated,
                    &RefExpectation::Value(preview.request_head.clone()),
                    &reason,
                )
                .await?;
            self.ref_update_in(tx, &source.repository, &source.ref_name(), Some(&integrated))
                .await?;
        }

        self.vcs()
            .update_ref(
                &target.repository.path,
                &target.ref_name(),
                &integrated,
                &RefExpectation::Value(preview.target_head.clone()),
                &reason,
            )
            .await?;
        self.ref_update_in(tx, &target.repository, &target.ref_name(), Some(&integrated))
            .await?;

        // Ref handling above may have recorded updates on this very request
        *request = tx.load(id).await?;

        let now = Utc::now();
        record(
            tx,
            request,
            ActivityAction::Integrate,
            user,
            steps.record_comment.as_deref(),
            now,
        );
        request.close_status = Some(CloseStatus::Integrated);
        request.last_event_date = now;
        tx.save(request);
        tx.after_commit(Deferred::Notify(PullRequestEvent::Integrated {
            request: request.clone(),
            user: user.map(str::to_string),
            comment: steps.record_comment.clone(),
        }));
        info!(
            request_id = %id,
            strategy = %request.strategy,
            integrated = %integrated.short(),
            "integrated pull request"
        );
        Ok(())
    }

    pub(crate) async fn check_in(
        &self,
        tx: &mut Transaction,
        request: &mut PullRequest,
    ) -> Result<()> {
        if !request.is_open() {
            return Ok(());
        }
        self.close_if_merged_in(tx, request).await?;
        if !request.is_open() {
            return Ok(());
        }

        match self.status(request) {
            RequestStatus::PendingUpdate => {
                tx.after_commit(Deferred::Notify(PullRequestEvent::PendingUpdate(
                    request.clone(),
                )));
            }
            RequestStatus::PendingIntegrate => {
                tx.after_commit(Deferred::Notify(PullRequestEvent::PendingIntegration(
                    request.clone(),
                )));
                let Some(preview) = self.inner.calculator.cached(request).await? else {
                    // Integrated automatically once the preview is computed
                    tx.after_commit(Deferred::SchedulePreview(request.id));
                    return Ok(());
                };
                if !preview.has_conflicts() && request.assignee.is_none() {
                    self.integrate_in(tx, request, None, Some(AUTO_INTEGRATE_COMMENT))
                        .await?;
                }
            }
            RequestStatus::PendingApproval => {
                tx.after_commit(Deferred::Notify(PullRequestEvent::PendingApproval(
                    request.clone(),
                )));
                let now = Utc::now();
                let mut renewed = false;
                for invitation in &mut request.review_invitations {
                    if !invitation.excluded && invitation.date <= now {
                        invitation.date = now;
                        renewed = true;
                    }
                }
                if renewed {
                    tx.save(request);
                }
            }
            RequestStatus::Integrated | RequestStatus::Discarded => {}
        }
        Ok(())
    }

    // =========================================================================
    // Ref helpers
    // =========================================================================

    /// Make `head` reachable in the target repository under the head ref and
    /// the given update ref
    async fn record_update_refs(
        &self,
        request: &PullRequest,
        head: &CommitId,
        update_ref: &str,
    ) -> Result<()> {
        let target_repo = &request.target.repository.path;
        let head_ref = request.head_ref();
        if request.is_cross_repository() {
            let refspec = format!("+{}:{head_ref}", request.source.ref_name());
            self.vcs()
                .fetch(target_repo, &request.source.repository.path, &refspec)
                .await?;
        }
        self.vcs()
            .update_ref(
                target_repo,
                &head_ref,
                head,
                &RefExpectation::Any,
                "pull request head",
            )
            .await?;
        self.vcs()
            .update_ref(
                target_repo,
                update_ref,
                head,
                &RefExpectation::Any,
                "pull request update",
            )
            .await
    }

    async fn restore_source_branch_of(&self, request: &PullRequest) -> Result<()> {
        let source = request
            .live_source()
            .ok_or_else(|| Error::illegal_state("Source repository has been deleted."))?;
        if self
            .vcs()
            .resolve_ref(&source.repository.path, &source.ref_name())
            .await?
            .is_some()
        {
            return Ok(());
        }
        let Some(latest) = request.latest_update() else {
            return Ok(());
        };

        if request.is_cross_repository() {
            let refspec = format!("{}:{}", latest.head_ref(), source.ref_name());
            self.vcs()
                .fetch(
                    &source.repository.path,
                    &request.target.repository.path,
                    &refspec,
                )
                .await?;
        } else {
            self.vcs()
                .update_ref(
                    &source.repository.path,
                    &source.ref_name(),
                    &latest.head_commit,
                    &RefExpectation::Absent,
                    "restore source branch",
                )
                .await?;
        }
        info!(request_id = %request.id, branch = %source, "restored source branch");
        Ok(())
    }

    async fn clean_cache_dir(&self, id: RequestId) -> Result<()> {
        let dir = self.request_cache_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }
}
