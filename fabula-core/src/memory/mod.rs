//! Conversational memory.
//!
//! - [`BoundedDialogueMemory`] holds the recent exchanges that go into
//!   every prompt, within a character budget.
//! - [`SimilaritySearchMemory`] receives what the window evicts and
//!   answers nearest-neighbour queries over it.

pub mod dialogue;
pub mod similarity;

pub use dialogue::{BoundedDialogueMemory, Exchange};
pub use similarity::{MemoryRecord, MemoryRole, QueryResult, SimilaritySearchMemory};
