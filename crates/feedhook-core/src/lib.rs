//! # Feedhook Core
//!
//! Shared building blocks for the feedhook workspace: the error type,
//! configuration, persisted record types and the store trait that the
//! scheduler reads and writes through.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FeedhookConfig;
pub use error::{FeedhookError, Result};
pub use traits::FeedStore;
pub use types::{Feed, NewPost, Post, WebhookDestination, Workspace, WorkspaceSettings};
