//! Model-backed judgements about the story: whether a scene is over, and
//! what actually happened in it.

use std::fmt;
use std::sync::Arc;

use fabula_llm::TextGenerator;
use fabula_llm::prompt::{SCENE_EVALUATION, SCENE_EVALUATION_OBJECTIVE, SCENE_RECAP, render_template};
use tracing::debug;

use crate::error::Result;

// ---------------------------------------------------------------------------
// SceneProgressionEvaluator
// ---------------------------------------------------------------------------

/// Asks the model whether the current scene should end.
#[derive(Clone)]
pub struct SceneProgressionEvaluator {
    generator: Arc<dyn TextGenerator>,
    objective: String,
}

impl SceneProgressionEvaluator {
    /// Create an evaluator asking the default objective question.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            objective: SCENE_EVALUATION_OBJECTIVE.to_string(),
        }
    }

    /// Builder: ask a different question.
    #[must_use]
    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = objective.into();
        self
    }

    /// Build the evaluation prompt.
    #[must_use]
    pub fn build_prompt(&self, story_so_far: &str, current_scene: &str, next_scene: &str) -> String {
        render_template(
            SCENE_EVALUATION,
            &[
                ("story_so_far", story_so_far),
                ("current_scene", current_scene),
                ("next_scene", next_scene),
                ("objective", &self.objective),
            ],
        )
    }

    /// Ask the model.  Returns its trimmed raw answer, e.g. `"YES - 90%"`.
    ///
    /// # Errors
    ///
    /// Propagates the generator's failure.
    pub async fn evaluate(&self, story_so_far: &str, current_scene: &str, next_scene: &str) -> Result<String> {
        let prompt = self.build_prompt(story_so_far, current_scene, next_scene);
        let answer = self.generator.generate(&prompt).await?;
        let answer = answer.trim().to_string();
        debug!(verdict = %Verdict::parse(&answer), raw = %answer, "scene evaluation");
        Ok(answer)
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The leading word of an evaluator answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// Move on.
    Yes,
    /// Stay.
    No,
    /// The model hedged.
    Maybe,
    /// The answer did not start with a recognised word.
    Unclear,
}

/// Structured reading of an evaluator answer like `"YES - 90%"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Leading answer word.
    pub answer: Answer,
    /// Confidence percentage, when one was given.
    pub confidence: Option<u8>,
}

impl Verdict {
    /// Parse a raw answer.  Never fails; unknown shapes become
    /// [`Answer::Unclear`] without a confidence.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start_matches(|c: char| !c.is_alphanumeric());
        let word: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        let answer = match word.as_str() {
            "yes" => Answer::Yes,
            "no" => Answer::No,
            "maybe" => Answer::Maybe,
            _ => Answer::Unclear,
        };
        Self {
            answer,
            confidence: parse_percentage(raw),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.confidence {
            Some(pct) => write!(f, "{:?} ({pct}%)", self.answer),
            None => write!(f, "{:?}", self.answer),
        }
    }
}

/// The first `NN%` in the text, clamped to 100.
fn parse_percentage(raw: &str) -> Option<u8> {
    let pct_at = raw.find('%')?;
    let digits: String = raw[..pct_at]
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let value: u32 = digits.parse().ok()?;
    u8::try_from(value.min(100)).ok()
}

// ---------------------------------------------------------------------------
// SceneRewriter
// ---------------------------------------------------------------------------

/// Rewrites a finished scene's summary as a recap of what actually happened.
#[derive(Clone)]
pub struct SceneRewriter {
    generator: Arc<dyn TextGenerator>,
}

impl SceneRewriter {
    /// Create a rewriter.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Summarize `scene_text` in the context of its campaign.
    ///
    /// # Errors
    ///
    /// Propagates the generator's failure.
    pub async fn recap(&self, campaign_summary: &str, scene_text: &str) -> Result<String> {
        let prompt = render_template(
            SCENE_RECAP,
            &[("campaign_summary", campaign_summary), ("scene_text", scene_text)],
        );
        let recap = self.generator.generate(&prompt).await?;
        Ok(recap.trim().to_string())
    }
}
