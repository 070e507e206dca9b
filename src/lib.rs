//! pr-engine - pull request integration engine
//!
//! Tracks pull requests between branches of git repositories, previews how a
//! request would integrate into its target under a chosen strategy, and
//! performs the integration when the request is approved.
//!
//! # Architecture
//!
//! - [`manager`]: lifecycle operations on top of a transactional [`store`]
//! - [`integration`]: pure integration planning and its execution in
//!   ephemeral clones
//! - [`scheduler`]: single-flight worker pool for preview computations
//! - [`vcs`]: git facade, the only place touching repositories
//! - [`listener`]: lifecycle events delivered after commit
//!
//! # Example
//!
//! ```ignore
//! use pr_engine::manager::PullRequestManager;
//! use pr_engine::store::MemoryStore;
//! use pr_engine::types::PullRequestDraft;
//! use pr_engine::vcs::GitCli;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let manager = PullRequestManager::builder(store, Arc::new(GitCli::default())).build()?;
//! let request = manager.open(PullRequestDraft::new("Add feature", source, target)).await?;
//! manager.settle().await;
//! let preview = manager.preview_integration(request.id).await?;
//! ```

pub mod config;
pub mod error;
pub mod gatekeeper;
pub mod integration;
pub mod listener;
pub mod manager;
pub mod mention;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod vcs;

pub use error::{Error, Result};
pub use manager::PullRequestManager;
