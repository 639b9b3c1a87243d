//! Story skeleton: the outline tree, the bookmark tracker that walks it,
//! and the model-backed evaluator and rewriter it consults.

pub mod evaluator;
pub mod outline;
pub mod tracker;

pub use evaluator::{Answer, SceneProgressionEvaluator, SceneRewriter, Verdict};
pub use outline::{StoryLevel, StoryNode};
pub use tracker::{AdvancePolicy, Bookmark, StoryProgressTracker};
