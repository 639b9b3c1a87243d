//! Prompt templates for FABULA generation calls.
//!
//! Every instruction block lives here as a constant.  Turn prompts are
//! assembled by [`compose_prompt`], a pure function of its parts, so the
//! exact text sent to the model is testable without a backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Explains the Stage / Campaign / Scene hierarchy to the model.
pub const STORY_STRUCTURE: &str = r"Your narrative is organized into three tiers: Stages, Campaigns, and Scenes.
Stages: broad narrative phases (exposition, rising action, climax, denouement) that define the overall plot progression.
Campaigns: mid-level, self-contained arcs within a stage, each driving the plot towards the next major development.
Scenes: the smallest narrative units, with concrete actions, dialogue and setting, each propelling its campaign.
Scenes build campaigns and campaigns build stages. The story skeleton below tells you where the story currently stands.";

/// Narrator instructions shared by every genre.
pub const STORYTELLER_SYSTEM: &str = r"You are the storyteller of an interactive story. Describe the outcome of each player action vividly and dramatically,
whether the character charges into battle or breaks down in tears. Always write in the third person.
Never decide what the player does next; stop once the consequences of their action are described.";

/// Asks whether the current scene has run its course.
pub const SCENE_EVALUATION: &str = r#"Answer the following question with a clear YES or NO, followed by a percentage score of how confident you are in the answer. Use exactly the format: "YES - 100%".

THE SCENE SO FAR:
{story_so_far}

WHAT THE GOAL OF THE SCENE SHOULD BE:
{current_scene}

WHAT THE NEXT SCENE WILL BE ABOUT:
{next_scene}

QUESTION:
{objective}

FINAL ANSWER:"#;

/// Default question asked by the scene evaluator.
pub const SCENE_EVALUATION_OBJECTIVE: &str = "Is it appropriate to move to the next scene now?";

/// Recaps what actually happened in a finished scene.
pub const SCENE_RECAP: &str = r"Summarize what has happened in a scene that is a smaller part of a bigger story.
Keep it short, in the past tense, and only mention events that actually took place.

The overarching narrative of this part of the story:
{campaign_summary}

Scene to be summarized:
{scene_text}

Summary:";

/// Lets an autonomous character propose its next move.
pub const CHARACTER_ACTION: &str = r#"Character description: "{description}"

THE STORY SO FAR:
{story_so_far}

You are a character in a tabletop RPG-style game. Propose your next action based on your description and the story.
Speak in the first person, keep it to one or two sentences, and only react to what has been mentioned in the story.
Whether the action succeeds is for the storyteller to decide.
Proposed action:"#;

/// Header placed before recalled long-term memories.
pub const MEMORY_HEADER: &str =
    "Relevant past story events (feel free to ignore these if you don't think they are relevant):";

/// Header placed before the in-context window.
pub const WINDOW_HEADER: &str = "The current story (you are to continue from here):";

/// Story genre, selecting the narrator's framing instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    /// No particular genre.
    #[default]
    Generic,
    /// Dread, atmosphere, the macabre.
    Horror,
    /// Magic, mythical creatures, epic journeys.
    Fantasy,
    /// Speculative technology and its consequences.
    #[serde(rename = "scifi")]
    SciFi,
    /// Isolation in space and technological nightmares.
    #[serde(rename = "scifi_horror")]
    SciFiHorror,
}

impl Genre {
    /// The fixed instruction text for this genre.
    #[must_use]
    pub fn instructions(self) -> &'static str {
        match self {
            Self::Generic => {
                "You are a novelist writing an immersive, page-turning story. Use evocative language, \
                 strong pacing and believable characters to keep the reader eager for the next page."
            }
            Self::Horror => {
                "You are a horror novelist. Build dread through atmosphere and restraint, let fear grow \
                 from small wrong details, and keep the reader on the edge of their seat."
            }
            Self::Fantasy => {
                "You are a fantasy novelist. Bring a world of magic and myth to life with rich settings, \
                 memorable characters and a sense of wonder on every page."
            }
            Self::SciFi => {
                "You are a science-fiction novelist. Ground bold ideas in plausible technology, explore how \
                 it changes people, and reveal the world through concrete, vivid detail."
            }
            Self::SciFiHorror => {
                "You are a science-fiction horror novelist. Combine the isolation and vast unknown of space \
                 with the creeping dread of technology gone wrong; every revelation should deepen the fear."
            }
        }
    }

    /// All genres.
    #[must_use]
    pub fn all() -> &'static [Genre] {
        &[
            Self::Generic,
            Self::Horror,
            Self::Fantasy,
            Self::SciFi,
            Self::SciFiHorror,
        ]
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generic => "generic",
            Self::Horror => "horror",
            Self::Fantasy => "fantasy",
            Self::SciFi => "scifi",
            Self::SciFiHorror => "scifi_horror",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Genre {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "horror" => Ok(Self::Horror),
            "fantasy" => Ok(Self::Fantasy),
            "scifi" => Ok(Self::SciFi),
            "scifi_horror" => Ok(Self::SciFiHorror),
            _ => Err(format!("unknown genre: '{s}'")),
        }
    }
}

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value in a single pass over
/// the template.  Substituted values are never scanned again, so braces
/// inside player text come through verbatim.  Unknown keys are kept.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter().find(|(k, _)| *k == key).map(|(_, value)| (*value, close))
        });
        match hit {
            Some((value, close)) => {
                result.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                result.push('{');
                rest = after;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Everything that goes into one storyteller turn prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    /// Genre framing.
    pub genre: Genre,
    /// Rendered story-skeleton context for the current position.
    pub story_context: &'a str,
    /// Long-term memories recalled for this turn.
    pub memories: &'a [String],
    /// The in-context dialogue window.
    pub window_text: &'a str,
    /// Trailing scaffold that primes the next turn (empty for "continue").
    pub scaffold: &'a str,
}

/// Assemble a turn prompt.
///
/// Order is fixed: genre, storyteller rules, structure explainer, story
/// context, recalled memories, the window, then the scaffold.
#[must_use]
pub fn compose_prompt(parts: &PromptParts<'_>) -> String {
    format!(
        "{genre}\n{storyteller}\n{structure}\n{context}\n{memory_header}\n{memories}\n{window_header}\n{window}{scaffold}",
        genre = parts.genre.instructions(),
        storyteller = STORYTELLER_SYSTEM,
        structure = STORY_STRUCTURE,
        context = parts.story_context,
        memory_header = MEMORY_HEADER,
        memories = parts.memories.join("\n"),
        window_header = WINDOW_HEADER,
        window = parts.window_text,
        scaffold = parts.scaffold,
    )
}
