//! The narrative turn loop.
//!
//! One turn:
//!
//! 1. pick the input (player, or the autonomous character);
//! 2. recall older text similar to it;
//! 3. compose the prompt from the genre framing, the story context, the
//!    recalled memories and the window;
//! 4. stream the storyteller's answer, retrying empty generations;
//! 5. store the exchange, enforce the window budget;
//! 6. let the tracker decide whether the scene is over.

use std::sync::Arc;
use std::time::Duration;

use fabula_llm::prompt::{PromptParts, compose_prompt};
use fabula_llm::{Genre, LlmError, StreamingGenerator, collect_stream};
use tracing::{debug, info, warn};

use crate::character::Character;
use crate::config::FabulaConfig;
use crate::error::{FabulaError, Result};
use crate::memory::{BoundedDialogueMemory, Exchange, SimilaritySearchMemory};
use crate::story::StoryProgressTracker;

/// Turn-loop settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Narrator genre.
    pub genre: Genre,
    /// Prefix of player lines.
    pub human_prefix: String,
    /// Prefix of storyteller lines.
    pub ai_prefix: String,
    /// Input of the opening turn.
    pub opening_input: String,
    /// Input meaning "keep going".
    pub continue_keyword: String,
    /// Memories recalled per turn.
    pub recall_top_k: usize,
    /// Cap on retries after empty generations.  Unbounded when `None`.
    pub max_empty_retries: Option<u32>,
    /// Per-generation timeout.
    pub timeout_ms: Option<u64>,
}

impl SessionSettings {
    /// Take the session-relevant values out of a full configuration.
    #[must_use]
    pub fn from_config(config: &FabulaConfig) -> Self {
        Self {
            genre: config.session.genre,
            human_prefix: config.session.human_prefix.clone(),
            ai_prefix: config.session.ai_prefix.clone(),
            opening_input: config.session.opening_input.clone(),
            continue_keyword: config.session.continue_keyword.clone(),
            recall_top_k: config.memory.recall_top_k,
            max_empty_retries: config.session.max_empty_retries,
            timeout_ms: config.llm.timeout_ms,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&FabulaConfig::default())
    }
}

/// What one turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The input that drove the turn (player's or character's).
    pub input: String,
    /// The storyteller's text, without prefix.
    pub response: String,
    /// Whether the scene ended after this turn.
    pub scene_advanced: bool,
    /// Whether the story has now run out of scenes.
    pub story_complete: bool,
}

/// A running story.
pub struct NarrativeSession {
    generator: Arc<dyn StreamingGenerator>,
    tracker: StoryProgressTracker,
    dialogue: BoundedDialogueMemory,
    memory: SimilaritySearchMemory,
    character: Option<Character>,
    settings: SessionSettings,
}

impl NarrativeSession {
    /// Assemble a session from its parts.
    #[must_use]
    pub fn new(
        generator: Arc<dyn StreamingGenerator>,
        tracker: StoryProgressTracker,
        dialogue: BoundedDialogueMemory,
        memory: SimilaritySearchMemory,
    ) -> Self {
        Self {
            generator,
            tracker,
            dialogue,
            memory,
            character: None,
            settings: SessionSettings::default(),
        }
    }

    /// Builder: turn-loop settings.
    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builder: let a character act whenever no player input is given.
    #[must_use]
    pub fn with_character(mut self, character: Character) -> Self {
        self.character = Some(character);
        self
    }

    /// The story tracker.
    #[must_use]
    pub fn tracker(&self) -> &StoryProgressTracker {
        &self.tracker
    }

    /// The in-context window.
    #[must_use]
    pub fn dialogue(&self) -> &BoundedDialogueMemory {
        &self.dialogue
    }

    /// Long-term memory.
    #[must_use]
    pub fn memory(&self) -> &SimilaritySearchMemory {
        &self.memory
    }

    /// Whether a character plays when no input is given.
    #[must_use]
    pub fn has_character(&self) -> bool {
        self.character.is_some()
    }

    /// Run the synthetic opening turn.
    ///
    /// # Errors
    ///
    /// Same as [`take_turn`](Self::take_turn).
    pub async fn start<F>(&mut self, on_chunk: F) -> Result<TurnOutcome>
    where
        F: FnMut(&str),
    {
        let opening = self.settings.opening_input.clone();
        info!(input = %opening, "starting story");
        self.take_turn(Some(&opening), on_chunk).await
    }

    /// Play one turn.  `on_chunk` sees the storyteller's text as it streams.
    ///
    /// With `input` absent, the configured character proposes the action.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] once the outline is exhausted,
    /// [`FabulaError::Config`] if there is neither input nor character,
    /// or any generation or evaluation failure.
    pub async fn take_turn<F>(&mut self, input: Option<&str>, mut on_chunk: F) -> Result<TurnOutcome>
    where
        F: FnMut(&str),
    {
        if self.tracker.is_complete() {
            return Err(FabulaError::StoryComplete);
        }

        let input = match (input, &self.character) {
            (Some(text), _) => text.to_string(),
            (None, Some(character)) => character.propose_action(&self.dialogue.current_window_text()).await?,
            (None, None) => return Err(FabulaError::Config("no input and no autonomous character".into())),
        };

        let is_continue = input.trim().eq_ignore_ascii_case(self.settings.continue_keyword.trim());
        let window = self.dialogue.current_window_text();
        let (window_text, scaffold, memory_key) = if is_continue {
            let key = self
                .dialogue
                .last_human_line(&self.settings.human_prefix, &self.settings.continue_keyword)
                .unwrap_or_else(|| input.clone());
            (window.trim_end().to_string(), String::new(), key)
        } else {
            let scaffold = format!("{}{input}\n{}", self.settings.human_prefix, self.settings.ai_prefix);
            (window, scaffold, input.clone())
        };

        let memories = self.memory.recall(&memory_key, self.settings.recall_top_k).await;
        let story_context = self.tracker.describe_current_context()?;
        let prompt = compose_prompt(&PromptParts {
            genre: self.settings.genre,
            story_context: &story_context,
            memories: &memories,
            window_text: &window_text,
            scaffold: &scaffold,
        });
        debug!(chars = prompt.chars().count(), memories = memories.len(), "composed turn prompt");

        let response = self.generate(&prompt, &mut on_chunk).await?;

        let human = if is_continue {
            String::new()
        } else {
            format!("{}{input}", self.settings.human_prefix)
        };
        let ai = format!("{}{response}", self.settings.ai_prefix);
        if human.is_empty() {
            self.tracker.record_scene_text(&ai);
        } else {
            self.tracker.record_scene_text(&format!("{human}\n{ai}"));
        }
        self.dialogue.append(Exchange::new(human, ai));
        if let Err(e) = self.dialogue.enforce_budget(&mut self.memory).await {
            warn!(error = %e, "eviction failed, keeping exchanges in the window");
        }

        let recent = self.dialogue.current_window_text();
        let scene_advanced = self.tracker.evaluate_and_possibly_advance(&recent).await?;
        let story_complete = self.tracker.is_complete();
        if story_complete {
            info!("story complete");
        }

        Ok(TurnOutcome {
            input,
            response,
            scene_advanced,
            story_complete,
        })
    }

    /// Stream one generation, retrying until it produces text.
    async fn generate<F>(&self, prompt: &str, on_chunk: &mut F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let attempt = async {
                let stream = self.generator.stream(prompt).await?;
                let text = collect_stream(stream, &mut *on_chunk).await?;
                Ok::<_, LlmError>(text)
            };
            let text = match self.settings.timeout_ms {
                Some(ms) => tokio::time::timeout(Duration::from_millis(ms), attempt)
                    .await
                    .map_err(|_| LlmError::Timeout(ms))??,
                None => attempt.await?,
            };

            if !text.trim().is_empty() {
                return Ok(text);
            }
            warn!(attempt = attempts, "model produced no text, retrying");
            if self.settings.max_empty_retries.is_some_and(|max| attempts > max) {
                return Err(LlmError::RetriesExhausted {
                    attempts,
                    last_error: "empty generation".into(),
                }
                .into());
            }
        }
    }
}
