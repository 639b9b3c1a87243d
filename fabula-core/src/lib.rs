//! # FABULA Core Library
//!
//! Story progression and conversational memory for an interactive
//! storyteller driven by a language model.
//!
//! - **Outline**: a Stage → Campaign → Scene tree loaded from JSON
//! - **Tracker**: a bookmark walking that tree one scene at a time,
//!   asking the model when a scene has run its course
//! - **Dialogue memory**: the recent exchanges that fit a character
//!   budget, evicting the oldest into long-term memory
//! - **Similarity memory**: embedded older text, recalled by nearest
//!   neighbour search
//! - **Session**: the turn loop tying these to a streaming model
//!
//! Model access goes through the traits in [`fabula_llm`], so everything
//! here can be driven by scripted generators in tests.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod character;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod session;
pub mod story;

pub use character::Character;
pub use config::FabulaConfig;
pub use error::{FabulaError, Result};
pub use memory::{BoundedDialogueMemory, Exchange, MemoryRole, QueryResult, SimilaritySearchMemory};
pub use session::{NarrativeSession, SessionSettings, TurnOutcome};
pub use story::{
    AdvancePolicy, Bookmark, SceneProgressionEvaluator, SceneRewriter, StoryLevel, StoryNode, StoryProgressTracker,
};
