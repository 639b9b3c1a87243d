//! Autonomous characters that can take the player's seat.

use std::sync::Arc;

use fabula_llm::TextGenerator;
use fabula_llm::prompt::{CHARACTER_ACTION, render_template};
use tracing::debug;

use crate::error::Result;

/// A static description plus the model that voices it.  Stateless.
#[derive(Clone)]
pub struct Character {
    description: String,
    generator: Arc<dyn TextGenerator>,
}

impl Character {
    /// Create a character.
    #[must_use]
    pub fn new(description: impl Into<String>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            description: description.into(),
            generator,
        }
    }

    /// The character's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Ask the model what this character does next, given the story so far.
    ///
    /// # Errors
    ///
    /// Propagates the generator's failure.
    pub async fn propose_action(&self, story_so_far: &str) -> Result<String> {
        let prompt = render_template(
            CHARACTER_ACTION,
            &[("description", &self.description), ("story_so_far", story_so_far)],
        );
        let action = self.generator.generate(&prompt).await?;
        let action = action.trim().to_string();
        debug!(%action, "character proposed action");
        Ok(action)
    }
}
