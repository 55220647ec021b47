//! skillsync - reconciliation engine for agent skills.
//!
//! Resolves each configured repo revision, materializes it in the
//! content-addressed store, validates the skills it declares and aligns
//! the agent symlink trees with the result. Callers receive a
//! [`skills_core::SyncReport`]; nothing here prints.

pub mod gc;
pub mod git;
pub mod links;
pub mod locks;
pub mod orchestrator;
pub mod resolver;
pub mod store;
pub mod validate;

#[cfg(test)]
mod testutil;

pub use gc::{collect_garbage, GcReport};
pub use orchestrator::{project_root_of, SyncError, SyncOptions, SyncOrchestrator, DEFAULT_JOBS};
pub use store::{StoreEntry, StoreError, StoreManager};
