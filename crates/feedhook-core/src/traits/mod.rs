//! Traits at the boundary between the scheduler and its collaborators.

pub mod store;

pub use store::FeedStore;
