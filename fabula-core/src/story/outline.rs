//! The Stage → Campaign → Scene outline tree and its JSON form.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FabulaError, Result};

/// Depth of a node in the outline.  Serialized as the integer depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoryLevel {
    /// A single playable beat.
    Scene = 1,
    /// A self-contained arc inside a stage.
    Campaign = 2,
    /// A broad narrative phase (exposition, rising action, ...).
    Stage = 3,
}

impl StoryLevel {
    /// The integer depth used in outline documents.
    #[must_use]
    pub fn depth(self) -> u8 {
        self as u8
    }

    /// Parse an integer depth.
    #[must_use]
    pub fn from_depth(depth: u8) -> Option<Self> {
        match depth {
            1 => Some(Self::Scene),
            2 => Some(Self::Campaign),
            3 => Some(Self::Stage),
            _ => None,
        }
    }
}

impl fmt::Display for StoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scene => "scene",
            Self::Campaign => "campaign",
            Self::Stage => "stage",
        })
    }
}

impl FromStr for StoryLevel {
    type Err = FabulaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scene" => Ok(Self::Scene),
            "campaign" => Ok(Self::Campaign),
            "stage" => Ok(Self::Stage),
            other => Err(FabulaError::Config(format!("unknown story level '{other}'"))),
        }
    }
}

impl Serialize for StoryLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.depth())
    }
}

impl<'de> Deserialize<'de> for StoryLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let depth = u8::deserialize(deserializer)?;
        Self::from_depth(depth)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid layerLevel {depth}, expected 1, 2 or 3")))
    }
}

/// One node of the outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryNode {
    /// Depth label.  Informational only.
    #[serde(rename = "layerLevel")]
    pub level: StoryLevel,
    /// Short summary; scenes may have theirs rewritten as they conclude.
    #[serde(rename = "shortSummary")]
    pub summary: String,
    /// Ordered children.
    #[serde(default)]
    pub children: Vec<StoryNode>,
    /// Set once the story has moved past this node.
    #[serde(default)]
    pub has_transpired: bool,
    /// Optional evaluation score annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_score: Option<f64>,
    /// Optional evaluation reasoning annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_reasoning: Option<String>,
}

impl StoryNode {
    /// Create a node with no children.
    #[must_use]
    pub fn new(level: StoryLevel, summary: impl Into<String>) -> Self {
        Self {
            level,
            summary: summary.into(),
            children: Vec::new(),
            has_transpired: false,
            eval_score: None,
            eval_reasoning: None,
        }
    }

    /// Builder: attach children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<StoryNode>) -> Self {
        self.children = children;
        self
    }

    /// Parse an outline document.
    ///
    /// # Errors
    ///
    /// Returns [`FabulaError::Serialization`] on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FabulaError::Serialization(e.to_string()))
    }

    /// Load an outline document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`FabulaError::Io`] if the file cannot be read, or
    /// [`FabulaError::Serialization`] if it is not a valid outline.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FabulaError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| FabulaError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoryNode {
        StoryNode::new(StoryLevel::Stage, "A lighthouse keeper hears knocking from below.").with_children(vec![
            StoryNode::new(StoryLevel::Stage, "Exposition").with_children(vec![
                StoryNode::new(StoryLevel::Campaign, "The storm")
                    .with_children(vec![
                        StoryNode::new(StoryLevel::Scene, "The lamp fails"),
                        StoryNode::new(StoryLevel::Scene, "Footsteps on the stairs"),
                    ]),
            ]),
        ])
    }

    #[test]
    fn json_uses_camel_case_keys_and_integer_levels() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"layerLevel\": 3"));
        assert!(json.contains("\"shortSummary\""));
        assert!(json.contains("\"hasTranspired\": false"));
        assert!(!json.contains("evalScore"));
    }

    #[test]
    fn round_trip_preserves_structure() {
        let mut outline = sample();
        outline.children[0].children[0].children[0].has_transpired = true;
        outline.children[0].eval_score = Some(0.75);

        let back = StoryNode::from_json(&outline.to_json().unwrap()).unwrap();
        assert_eq!(back, outline);
        let scenes: Vec<_> = back.children[0].children[0]
            .children
            .iter()
            .map(|s| s.summary.as_str())
            .collect();
        assert_eq!(scenes, vec!["The lamp fails", "Footsteps on the stairs"]);
    }

    #[test]
    fn missing_optional_fields_default() {
        let node = StoryNode::from_json(r#"{"layerLevel": 1, "shortSummary": "alone"}"#).unwrap();
        assert_eq!(node.level, StoryLevel::Scene);
        assert!(node.children.is_empty());
        assert!(!node.has_transpired);
        assert!(node.eval_reasoning.is_none());
    }

    #[test]
    fn bad_level_is_rejected() {
        let err = StoryNode::from_json(r#"{"layerLevel": 7, "shortSummary": "x"}"#).unwrap_err();
        assert!(matches!(err, FabulaError::Serialization(_)));
    }

    #[test]
    fn level_parses_from_config_names() {
        assert_eq!("Stage".parse::<StoryLevel>().unwrap(), StoryLevel::Stage);
        assert_eq!(" scene ".parse::<StoryLevel>().unwrap(), StoryLevel::Scene);
        assert!("chapter".parse::<StoryLevel>().is_err());
    }

    #[test]
    fn from_file_reads_outline() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), sample().to_json().unwrap()).unwrap();
        let loaded = StoryNode::from_file(file.path()).unwrap();
        assert_eq!(loaded.children.len(), 1);
    }
}
