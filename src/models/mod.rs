//! Data models for the events consumer
//!
//! This module contains the ledger event wire model, the indexable
//! document, and deterministic document identity.

pub mod event;
pub mod identity;

// Re-export commonly used types
pub use event::{DocumentId, Event, IndexableDocument};
pub use identity::{derive_id, IdentityError};
