//! Lifecycle event fan-out
//!
//! Listeners are registered once, in order, and are only ever invoked after
//! the transaction producing the event has committed.

use crate::types::{PullRequest, RequestId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Something that happened to a request
#[derive(Debug, Clone)]
pub enum PullRequestEvent {
    /// Request was opened
    Opened(PullRequest),
    /// Source branch received a new update
    Updated(PullRequest),
    /// Closed request was reopened
    Reopened {
        /// Request after reopening
        request: PullRequest,
        /// Acting user
        user: Option<String>,
        /// Comment left with the action
        comment: Option<String>,
    },
    /// Request was discarded
    Discarded {
        /// Request after discarding
        request: PullRequest,
        /// Acting user
        user: Option<String>,
        /// Comment left with the action
        comment: Option<String>,
    },
    /// Request was integrated, manually, automatically or by a push
    Integrated {
        /// Request after integrating
        request: PullRequest,
        /// Acting user, `None` when the system integrated it
        user: Option<String>,
        /// Comment left with the action
        comment: Option<String>,
    },
    /// Assignee changed
    Assigned(PullRequest),
    /// A user was @mentioned in the description
    Mentioned {
        /// Request
        request: PullRequest,
        /// Mentioned user
        user: String,
    },
    /// Reviewers asked for changes
    PendingUpdate(PullRequest),
    /// Waiting for approvals
    PendingApproval(PullRequest),
    /// Approved and waiting for integration
    PendingIntegration(PullRequest),
    /// A new integration preview was stored
    PreviewCalculated(PullRequest),
}

impl PullRequestEvent {
    /// Request the event is about
    pub const fn request(&self) -> &PullRequest {
        match self {
            Self::Opened(request)
            | Self::Updated(request)
            | Self::Assigned(request)
            | Self::PendingUpdate(request)
            | Self::PendingApproval(request)
            | Self::PendingIntegration(request)
            | Self::PreviewCalculated(request)
            | Self::Reopened { request, .. }
            | Self::Discarded { request, .. }
            | Self::Integrated { request, .. }
            | Self::Mentioned { request, .. } => request,
        }
    }

    /// Id of the request the event is about
    pub const fn request_id(&self) -> RequestId {
        self.request().id
    }

    /// Short name used in logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Opened(_) => "opened",
            Self::Updated(_) => "updated",
            Self::Reopened { .. } => "reopened",
            Self::Discarded { .. } => "discarded",
            Self::Integrated { .. } => "integrated",
            Self::Assigned(_) => "assigned",
            Self::Mentioned { .. } => "mentioned",
            Self::PendingUpdate(_) => "pending_update",
            Self::PendingApproval(_) => "pending_approval",
            Self::PendingIntegration(_) => "pending_integration",
            Self::PreviewCalculated(_) => "preview_calculated",
        }
    }
}

/// Observer of request lifecycle events. Every hook defaults to a no-op.
#[allow(unused_variables)]
#[async_trait]
pub trait PullRequestListener: Send + Sync {
    /// Request opened
    async fn on_opened(&self, request: &PullRequest) {}

    /// New update recorded for the source branch
    async fn on_updated(&self, request: &PullRequest) {}

    /// Request reopened
    async fn on_reopened(&self, request: &PullRequest, user: Option<&str>, comment: Option<&str>) {
    }

    /// Request discarded
    async fn on_discarded(&self, request: &PullRequest, user: Option<&str>, comment: Option<&str>) {
    }

    /// Request integrated
    async fn on_integrated(
        &self,
        request: &PullRequest,
        user: Option<&str>,
        comment: Option<&str>,
    ) {
    }

    /// Assignee changed
    async fn on_assigned(&self, request: &PullRequest) {}

    /// User mentioned in the description
    async fn on_mentioned(&self, request: &PullRequest, user: &str) {}

    /// Reviewers asked for changes
    async fn pending_update(&self, request: &PullRequest) {}

    /// Approvals outstanding
    async fn pending_approval(&self, request: &PullRequest) {}

    /// Ready to integrate
    async fn pending_integration(&self, request: &PullRequest) {}

    /// Integration preview stored
    async fn on_integration_preview_calculated(&self, request: &PullRequest) {}
}

/// Deliver `event` to every listener, in registration order
pub async fn dispatch(listeners: &[Arc<dyn PullRequestListener>], event: &PullRequestEvent) {
    debug!(
        request_id = %event.request_id(),
        event = event.kind(),
        listeners = listeners.len(),
        "dispatching event"
    );
    for listener in listeners {
        match event {
            PullRequestEvent::Opened(request) => listener.on_opened(request).await,
            PullRequestEvent::Updated(request) => listener.on_updated(request).await,
            PullRequestEvent::Reopened {
                request,
                user,
                comment,
            } => {
                listener
                    .on_reopened(request, user.as_deref(), comment.as_deref())
                    .await;
            }
            PullRequestEvent::Discarded {
                request,
                user,
                comment,
            } => {
                listener
                    .on_discarded(request, user.as_deref(), comment.as_deref())
                    .await;
            }
            PullRequestEvent::Integrated {
                request,
                user,
                comment,
            } => {
                listener
                    .on_integrated(request, user.as_deref(), comment.as_deref())
                    .await;
            }
            PullRequestEvent::Assigned(request) => listener.on_assigned(request).await,
            PullRequestEvent::Mentioned { request, user } => {
                listener.on_mentioned(request, user).await;
            }
            PullRequestEvent::PendingUpdate(request) => listener.pending_update(request).await,
            PullRequestEvent::PendingApproval(request) => listener.pending_approval(request).await,
            PullRequestEvent::PendingIntegration(request) => {
                listener.pending_integration(request).await;
            }
            PullRequestEvent::PreviewCalculated(request) => {
                listener.on_integration_preview_calculated(request).await;
            }
        }
    }
}
