//! Integration previews of managed requests

use crate::error::Result;
use crate::listener::PullRequestEvent;
use crate::manager::{AUTO_INTEGRATE_COMMENT, Inner, PullRequestManager};
use crate::scheduler::PreviewJob;
use crate::store::Deferred;
use crate::types::{IntegrationPreview, RequestId, RequestStatus};
use async_trait::async_trait;
use std::sync::Weak;
use tracing::debug;

/// Scheduler job computing a request's preview through its manager
pub(crate) struct PreviewTask {
    manager: Weak<Inner>,
}

impl PreviewTask {
    pub(crate) const fn new(manager: Weak<Inner>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PreviewJob for PreviewTask {
    async fn run(&self, id: RequestId) -> Result<()> {
        let Some(inner) = self.manager.upgrade() else {
            return Ok(());
        };
        PullRequestManager { inner }.calculate_preview(id).await
    }
}

impl PullRequestManager {
    /// The request's integration preview.
    ///
    /// For an open request whose cached preview is missing or obsolete, a
    /// computation is submitted and `None` returned. Closed requests return
    /// their last preview.
    pub async fn preview_integration(&self, id: RequestId) -> Result<Option<IntegrationPreview>> {
        let request = self.load(id).await?;
        if !request.is_open() {
            return Ok(request.last_integration_preview);
        }
        let cached = self.inner.calculator.cached(&request).await?;
        if cached.is_none() {
            self.inner.scheduler.submit(id);
        }
        Ok(cached)
    }

    /// Whether the request is approved and has a conflict free, up to date
    /// preview
    pub async fn can_integrate(&self, id: RequestId) -> Result<bool> {
        let request = self.load(id).await?;
        if self.status(&request) != RequestStatus::PendingIntegrate {
            return Ok(false);
        }
        Ok(self
            .inner
            .calculator
            .cached(&request)
            .await?
            .is_some_and(|preview| !preview.has_conflicts()))
    }

    /// Compute and store the preview of an open request whose cached one is
    /// obsolete, integrating it right away when it is approved, clean and
    /// unassigned
    pub(crate) async fn calculate_preview(&self, id: RequestId) -> Result<()> {
        let Some(snapshot) = self.inner.store.load(id).await? else {
            return Ok(());
        };
        if !snapshot.is_open() || self.inner.calculator.cached(&snapshot).await?.is_some() {
            return Ok(());
        }

        let preview = self.inner.calculator.compute(&snapshot).await?;

        let mut tx = self.begin().await;
        let mut request = tx.load(id).await?;
        let unchanged = request.is_open()
            && request.strategy == preview.strategy
            && request.request_head() == Some(&preview.request_head);
        if !unchanged {
            debug!(request_id = %id, "request changed while computing preview, resubmitting");
            self.inner.scheduler.submit(id);
            return Ok(());
        }

        request.last_integration_preview = Some(preview.clone());
        tx.save(&request);

        if self.status(&request) == RequestStatus::PendingIntegrate
            && !preview.has_conflicts()
            && request.assignee.is_none()
        {
            self.integrate_in(&mut tx, &mut request, None, Some(AUTO_INTEGRATE_COMMENT))
                .await?;
        }

        tx.after_commit(Deferred::Notify(PullRequestEvent::PreviewCalculated(
            request,
        )));
        self.commit(tx).await
    }
}
