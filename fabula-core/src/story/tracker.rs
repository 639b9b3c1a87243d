//! Bookmark state machine over the outline.
//!
//! The tracker walks the outline one scene at a time:
//!
//! ```text
//! (stage, campaign, scene)
//!   scene + 1            while scenes remain in the campaign
//!   campaign + 1, 0      when the campaign runs out
//!   stage + 1, 0, 0      when the stage runs out
//! ```
//!
//! There is no wraparound.  Past the last scene the bookmark points out of
//! range and every accessor reports [`FabulaError::StoryComplete`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::evaluator::{SceneProgressionEvaluator, SceneRewriter};
use super::outline::{StoryLevel, StoryNode};
use crate::error::{FabulaError, Result};

/// Position in the outline.  Zero-based; only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Bookmark {
    /// Stage index (always 0 when stages are not configured).
    pub stage: usize,
    /// Campaign index (always 0 when campaigns are not configured).
    pub campaign: usize,
    /// Scene index.
    pub scene: usize,
}

impl Bookmark {
    /// Construct a bookmark.
    #[must_use]
    pub fn new(stage: usize, campaign: usize, scene: usize) -> Self {
        Self { stage, campaign, scene }
    }
}

/// How a scene ends once the interaction minimum is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvancePolicy {
    /// Ask the scene evaluator and advance on a "yes".
    #[default]
    Evaluate,
    /// Advance unconditionally.
    Always,
}

/// Tracks where the story is and decides when to move on.
pub struct StoryProgressTracker {
    outline: StoryNode,
    highest_level: StoryLevel,
    bookmark: Bookmark,
    interactions: u32,
    min_interactions: u32,
    foreshadow_threshold: u32,
    policy: AdvancePolicy,
    evaluator: Option<SceneProgressionEvaluator>,
    rewriter: Option<SceneRewriter>,
    scene_text: String,
}

impl StoryProgressTracker {
    /// Create a tracker at (0, 0, 0).
    ///
    /// # Errors
    ///
    /// Returns [`FabulaError::InvalidOutline`] if any node between the root
    /// and the scenes has no children.
    pub fn new(outline: StoryNode, highest_level: StoryLevel) -> Result<Self> {
        validate_outline(&outline, highest_level)?;
        Ok(Self {
            outline,
            highest_level,
            bookmark: Bookmark::default(),
            interactions: 0,
            min_interactions: 3,
            foreshadow_threshold: 3,
            policy: AdvancePolicy::Evaluate,
            evaluator: None,
            rewriter: None,
            scene_text: String::new(),
        })
    }

    /// Builder: interactions required before a scene may end.
    #[must_use]
    pub fn with_min_interactions(mut self, min: u32) -> Self {
        self.min_interactions = min;
        self
    }

    /// Builder: interactions after which the next scene is previewed.
    #[must_use]
    pub fn with_foreshadow_threshold(mut self, threshold: u32) -> Self {
        self.foreshadow_threshold = threshold;
        self
    }

    /// Builder: advance policy.
    #[must_use]
    pub fn with_policy(mut self, policy: AdvancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder: scene evaluator (required by [`AdvancePolicy::Evaluate`]).
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: SceneProgressionEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Builder: rewrite each scene's summary as it concludes.
    #[must_use]
    pub fn with_rewriter(mut self, rewriter: SceneRewriter) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    // -- Accessors ----------------------------------------------------------

    /// The outline, including any rewritten summaries and transpired flags.
    #[must_use]
    pub fn outline(&self) -> &StoryNode {
        &self.outline
    }

    /// Current bookmark.
    #[must_use]
    pub fn bookmark(&self) -> Bookmark {
        self.bookmark
    }

    /// Interactions counted in the current scene since the last evaluation.
    #[must_use]
    pub fn interactions(&self) -> u32 {
        self.interactions
    }

    /// Whether the bookmark has moved past the last scene.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_scene().is_err()
    }

    /// The current stage, or the root when stages are not configured.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] once the bookmark is out of range.
    pub fn current_stage(&self) -> Result<&StoryNode> {
        self.node_at(self.bookmark, self.stage_depth())
    }

    /// The current campaign, or the root when campaigns are not configured.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] once the bookmark is out of range.
    pub fn current_campaign(&self) -> Result<&StoryNode> {
        self.node_at(self.bookmark, self.campaign_depth())
    }

    /// The current scene.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] once the bookmark is out of range.
    pub fn current_scene(&self) -> Result<&StoryNode> {
        self.node_at(self.bookmark, self.campaign_depth() + 1)
    }

    /// The scene one advance away, crossing campaign and stage boundaries.
    #[must_use]
    pub fn next_scene(&self) -> Option<&StoryNode> {
        let next = self.successor(self.bookmark).ok()?;
        self.node_at(next, self.campaign_depth() + 1).ok()
    }

    // -- Rendering ----------------------------------------------------------

    /// Render the story-skeleton context for the turn prompt.
    ///
    /// The next scene is only previewed once the current scene has seen at
    /// least `foreshadow_threshold` interactions.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] once the bookmark is out of range.
    pub fn describe_current_context(&self) -> Result<String> {
        let scene = self.current_scene()?;
        let mut context = format!("STORY SKELETON:\nWhole story: {}\n", self.outline.summary);
        if self.highest_level == StoryLevel::Stage {
            context.push_str(&format!("Current stage: {}\n", self.current_stage()?.summary));
        }
        if self.highest_level >= StoryLevel::Campaign {
            context.push_str(&format!("Current campaign: {}\n", self.current_campaign()?.summary));
        }
        context.push_str(&format!("Current scene: {}\n", scene.summary));
        if self.interactions >= self.foreshadow_threshold {
            if let Some(next) = self.next_scene() {
                context.push_str(&format!(
                    "Next scene (foreshadow it subtly, do not reveal it yet): {}\n",
                    next.summary
                ));
            }
        }
        Ok(context)
    }

    // -- Progression --------------------------------------------------------

    /// Accumulate text from the current scene for the rewriter.
    pub fn record_scene_text(&mut self, text: &str) {
        if !self.scene_text.is_empty() {
            self.scene_text.push('\n');
        }
        self.scene_text.push_str(text);
    }

    /// Count one interaction and possibly end the scene.
    ///
    /// Until the counter exceeds `min_interactions` this returns `false`
    /// without consulting anyone.  After that the advance policy decides
    /// and the counter resets.  If the evaluator fails the scene stays put,
    /// the counter is kept, and the next call asks again.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] if the story has already ended, or
    /// [`FabulaError::Config`] if the policy needs an evaluator and none is
    /// set.
    pub async fn evaluate_and_possibly_advance(&mut self, recent_text: &str) -> Result<bool> {
        let current = self.current_scene()?.summary.clone();
        self.interactions += 1;
        if self.interactions <= self.min_interactions {
            debug!(
                interactions = self.interactions,
                min = self.min_interactions,
                "scene below interaction minimum"
            );
            return Ok(false);
        }

        let should_advance = match self.policy {
            AdvancePolicy::Always => true,
            AdvancePolicy::Evaluate => {
                let evaluator = self
                    .evaluator
                    .as_ref()
                    .ok_or_else(|| FabulaError::Config("advance policy 'evaluate' needs a scene evaluator".into()))?;
                let next = self.next_scene().map(|n| n.summary.clone()).unwrap_or_default();
                match evaluator.evaluate(recent_text, &current, &next).await {
                    Ok(answer) => answer.to_lowercase().contains("yes"),
                    Err(e) => {
                        warn!(error = %e, "scene evaluation failed, asking again next turn");
                        return Ok(false);
                    }
                }
            }
        };
        self.interactions = 0;

        if should_advance {
            self.advance().await?;
        }
        Ok(should_advance)
    }

    /// Conclude the current scene and move the bookmark forward.
    ///
    /// With a rewriter configured and scene text recorded, the scene's
    /// summary is replaced by a recap first.  A failed recap keeps the old
    /// summary.
    ///
    /// # Errors
    ///
    /// [`FabulaError::StoryComplete`] if the story has already ended.
    pub async fn advance(&mut self) -> Result<()> {
        let from = self.bookmark;
        let next = self.successor(from)?;

        let recap = match (&self.rewriter, self.scene_text.trim().is_empty()) {
            (Some(rewriter), false) => {
                let campaign = self.current_campaign()?.summary.clone();
                Some(rewriter.recap(&campaign, &self.scene_text).await)
            }
            _ => None,
        };
        match recap {
            Some(Ok(recap)) if !recap.is_empty() => self.scene_mut(from)?.summary = recap,
            Some(Ok(_)) => warn!("scene recap was empty, keeping original summary"),
            Some(Err(e)) => warn!(error = %e, "scene recap failed, keeping original summary"),
            None => {}
        }
        self.scene_text.clear();
        self.scene_mut(from)?.has_transpired = true;

        self.bookmark = next;
        self.interactions = 0;
        info!(
            stage = next.stage,
            campaign = next.campaign,
            scene = next.scene,
            complete = self.is_complete(),
            "advanced to next scene"
        );
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    /// Path depth at which the current stage lives (0 = root).
    fn stage_depth(&self) -> usize {
        usize::from(self.highest_level == StoryLevel::Stage)
    }

    /// Path depth at which the current campaign lives.
    fn campaign_depth(&self) -> usize {
        self.stage_depth() + usize::from(self.highest_level >= StoryLevel::Campaign)
    }

    /// Child indices from the root to the bookmark's scene, or `None` if an
    /// unconfigured level's index has moved off zero.
    fn path(&self, bookmark: Bookmark) -> Option<Vec<usize>> {
        match self.highest_level {
            StoryLevel::Stage => Some(vec![bookmark.stage, bookmark.campaign, bookmark.scene]),
            StoryLevel::Campaign if bookmark.stage == 0 => Some(vec![bookmark.campaign, bookmark.scene]),
            StoryLevel::Scene if bookmark.stage == 0 && bookmark.campaign == 0 => Some(vec![bookmark.scene]),
            _ => None,
        }
    }

    fn node_at(&self, bookmark: Bookmark, depth: usize) -> Result<&StoryNode> {
        let path = self.path(bookmark).ok_or(FabulaError::StoryComplete)?;
        path.iter()
            .take(depth)
            .try_fold(&self.outline, |node, &i| node.children.get(i))
            .ok_or(FabulaError::StoryComplete)
    }

    fn scene_mut(&mut self, bookmark: Bookmark) -> Result<&mut StoryNode> {
        let path = self.path(bookmark).ok_or(FabulaError::StoryComplete)?;
        path.iter()
            .try_fold(&mut self.outline, |node, &i| node.children.get_mut(i))
            .ok_or(FabulaError::StoryComplete)
    }

    /// The bookmark after one advance from `bookmark`.
    fn successor(&self, bookmark: Bookmark) -> Result<Bookmark> {
        let scenes = self.node_at(bookmark, self.campaign_depth())?.children.len();
        let campaigns = if self.highest_level >= StoryLevel::Campaign {
            self.node_at(bookmark, self.stage_depth())?.children.len()
        } else {
            1
        };
        self.node_at(bookmark, self.campaign_depth() + 1)?;

        Ok(if bookmark.scene + 1 < scenes {
            Bookmark::new(bookmark.stage, bookmark.campaign, bookmark.scene + 1)
        } else if bookmark.campaign + 1 < campaigns {
            Bookmark::new(bookmark.stage, bookmark.campaign + 1, 0)
        } else {
            Bookmark::new(bookmark.stage + 1, 0, 0)
        })
    }
}

/// Every node from the root down to the campaigns must have a child.
fn validate_outline(root: &StoryNode, highest_level: StoryLevel) -> Result<()> {
    let invalid = |stage, campaign, reason: String| FabulaError::InvalidOutline { stage, campaign, reason };

    if root.children.is_empty() {
        return Err(invalid(None, None, format!("root has no {highest_level}s")));
    }

    match highest_level {
        StoryLevel::Stage => {
            for (s, stage) in root.children.iter().enumerate() {
                if stage.children.is_empty() {
                    return Err(invalid(Some(s), None, "stage has no campaigns".into()));
                }
                for (c, campaign) in stage.children.iter().enumerate() {
                    if campaign.children.is_empty() {
                        return Err(invalid(Some(s), Some(c), "campaign has no scenes".into()));
                    }
                }
            }
        }
        StoryLevel::Campaign => {
            for (c, campaign) in root.children.iter().enumerate() {
                if campaign.children.is_empty() {
                    return Err(invalid(None, Some(c), "campaign has no scenes".into()));
                }
            }
        }
        StoryLevel::Scene => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_llm::ScriptedGenerator;
    use std::sync::Arc;

    fn scene(s: &str) -> StoryNode {
        StoryNode::new(StoryLevel::Scene, s)
    }

    fn campaign(s: &str, scenes: &[&str]) -> StoryNode {
        StoryNode::new(StoryLevel::Campaign, s).with_children(scenes.iter().map(|x| scene(x)).collect())
    }

    fn stage(s: &str, campaigns: Vec<StoryNode>) -> StoryNode {
        StoryNode::new(StoryLevel::Stage, s).with_children(campaigns)
    }

    fn root(children: Vec<StoryNode>) -> StoryNode {
        StoryNode::new(StoryLevel::Stage, "A heist in a drowned city").with_children(children)
    }

    /// 1 stage × 2 campaigns × 1 scene.
    fn two_campaigns() -> StoryNode {
        root(vec![stage("Setup", vec![campaign("Recruit", &["Find the diver"]), campaign("Plan", &["Map the vault"])])])
    }

    #[tokio::test]
    async fn advance_carries_across_campaigns_and_stages() {
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage).unwrap();
        assert_eq!(tracker.bookmark(), Bookmark::new(0, 0, 0));
        tracker.advance().await.unwrap();
        assert_eq!(tracker.bookmark(), Bookmark::new(0, 1, 0));
        assert_eq!(tracker.current_scene().unwrap().summary, "Map the vault");
        tracker.advance().await.unwrap();
        assert_eq!(tracker.bookmark(), Bookmark::new(1, 0, 0));
        assert!(tracker.is_complete());
        assert!(matches!(tracker.current_stage(), Err(FabulaError::StoryComplete)));
        assert!(matches!(tracker.advance().await, Err(FabulaError::StoryComplete)));
    }

    #[tokio::test]
    async fn advance_marks_scene_transpired() {
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage).unwrap();
        tracker.advance().await.unwrap();
        let outline = tracker.outline();
        assert!(outline.children[0].children[0].children[0].has_transpired);
        assert!(!outline.children[0].children[1].children[0].has_transpired);
    }

    #[test]
    fn empty_campaign_is_rejected_with_location() {
        let outline = root(vec![stage("Setup", vec![campaign("Recruit", &["a"]), campaign("Plan", &[])])]);
        match StoryProgressTracker::new(outline, StoryLevel::Stage) {
            Err(FabulaError::InvalidOutline { stage, campaign, .. }) => {
                assert_eq!(stage, Some(0));
                assert_eq!(campaign, Some(1));
            }
            _ => panic!("expected InvalidOutline"),
        }
    }

    #[test]
    fn empty_root_is_rejected() {
        let err = StoryProgressTracker::new(root(vec![]), StoryLevel::Scene).err();
        assert!(matches!(err, Some(FabulaError::InvalidOutline { stage: None, campaign: None, .. })));
    }

    #[tokio::test]
    async fn campaign_level_outline_resolves_stage_to_root() {
        let outline = StoryNode::new(StoryLevel::Campaign, "root")
            .with_children(vec![campaign("First", &["a", "b"]), campaign("Second", &["c"])]);
        let mut tracker = StoryProgressTracker::new(outline, StoryLevel::Campaign).unwrap();
        assert_eq!(tracker.current_stage().unwrap().summary, "root");
        assert_eq!(tracker.next_scene().unwrap().summary, "b");
        tracker.advance().await.unwrap();
        tracker.advance().await.unwrap();
        assert_eq!(tracker.bookmark(), Bookmark::new(0, 1, 0));
        assert_eq!(tracker.current_campaign().unwrap().summary, "Second");
        assert!(tracker.next_scene().is_none());
        tracker.advance().await.unwrap();
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn scene_level_outline_walks_scenes() {
        let outline = StoryNode::new(StoryLevel::Scene, "root").with_children(vec![scene("one"), scene("two")]);
        let mut tracker = StoryProgressTracker::new(outline, StoryLevel::Scene).unwrap();
        assert_eq!(tracker.current_campaign().unwrap().summary, "root");
        tracker.advance().await.unwrap();
        assert_eq!(tracker.current_scene().unwrap().summary, "two");
        tracker.advance().await.unwrap();
        assert!(tracker.is_complete());
    }

    #[test]
    fn next_scene_crosses_campaign_boundary() {
        let tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage).unwrap();
        assert_eq!(tracker.next_scene().unwrap().summary, "Map the vault");
    }

    #[tokio::test]
    async fn evaluator_not_consulted_before_minimum() {
        let generator = Arc::new(ScriptedGenerator::new(["YES - 100%"]));
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_min_interactions(3)
            .with_evaluator(SceneProgressionEvaluator::new(generator.clone()));

        for _ in 0..3 {
            assert!(!tracker.evaluate_and_possibly_advance("...").await.unwrap());
        }
        assert_eq!(generator.calls(), 0);
        assert!(tracker.evaluate_and_possibly_advance("the diver agrees").await.unwrap());
        assert_eq!(generator.calls(), 1);
        assert_eq!(tracker.bookmark(), Bookmark::new(0, 1, 0));
        assert_eq!(tracker.interactions(), 0);
    }

    #[tokio::test]
    async fn negative_verdict_resets_counter_without_advancing() {
        let generator = Arc::new(ScriptedGenerator::new(["NO - 70%"]));
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_min_interactions(1)
            .with_evaluator(SceneProgressionEvaluator::new(generator.clone()));

        assert!(!tracker.evaluate_and_possibly_advance("a").await.unwrap());
        assert!(!tracker.evaluate_and_possibly_advance("b").await.unwrap());
        assert_eq!(tracker.interactions(), 0);
        assert_eq!(tracker.bookmark(), Bookmark::default());
        assert!(generator.prompts()[0].contains("Map the vault"));
    }

    /// Fails its first call, then agrees.
    struct FlakyJudge {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl fabula_llm::TextGenerator for FlakyJudge {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, fabula_llm::LlmError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(fabula_llm::LlmError::Unavailable("connection reset".into()))
            } else {
                Ok("YES - 90%".into())
            }
        }
    }

    #[tokio::test]
    async fn failed_evaluation_is_retried_next_turn() {
        let judge = Arc::new(FlakyJudge {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_min_interactions(2)
            .with_evaluator(SceneProgressionEvaluator::new(judge.clone()));

        assert!(!tracker.evaluate_and_possibly_advance("a").await.unwrap());
        assert!(!tracker.evaluate_and_possibly_advance("b").await.unwrap());
        assert!(!tracker.evaluate_and_possibly_advance("c").await.unwrap());
        assert_eq!(tracker.interactions(), 3);
        assert_eq!(tracker.bookmark(), Bookmark::default());

        assert!(tracker.evaluate_and_possibly_advance("d").await.unwrap());
        assert_eq!(judge.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(tracker.bookmark(), Bookmark::new(0, 1, 0));
    }

    #[tokio::test]
    async fn always_policy_advances_without_evaluator() {
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_min_interactions(0)
            .with_policy(AdvancePolicy::Always);
        assert!(tracker.evaluate_and_possibly_advance("").await.unwrap());
        assert_eq!(tracker.bookmark(), Bookmark::new(0, 1, 0));
    }

    #[tokio::test]
    async fn evaluate_policy_without_evaluator_is_config_error() {
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_min_interactions(0);
        assert!(matches!(
            tracker.evaluate_and_possibly_advance("").await,
            Err(FabulaError::Config(_))
        ));
    }

    #[tokio::test]
    async fn foreshadowing_waits_for_threshold() {
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_min_interactions(10)
            .with_foreshadow_threshold(2);

        let early = tracker.describe_current_context().unwrap();
        assert!(early.contains("Whole story: A heist in a drowned city"));
        assert!(early.contains("Current stage: Setup"));
        assert!(early.contains("Current campaign: Recruit"));
        assert!(early.contains("Current scene: Find the diver"));
        assert!(!early.contains("Map the vault"));

        tracker.evaluate_and_possibly_advance("").await.unwrap();
        tracker.evaluate_and_possibly_advance("").await.unwrap();
        let later = tracker.describe_current_context().unwrap();
        assert!(later.contains("Next scene"));
        assert!(later.contains("Map the vault"));
    }

    #[tokio::test]
    async fn rewriter_replaces_summary_before_moving() {
        let generator = Arc::new(ScriptedGenerator::new(["The diver joined after a tense bargain."]));
        let mut tracker = StoryProgressTracker::new(two_campaigns(), StoryLevel::Stage)
            .unwrap()
            .with_rewriter(SceneRewriter::new(generator.clone()));

        tracker.record_scene_text("Player: I offer double pay");
        tracker.advance().await.unwrap();

        let first = &tracker.outline().children[0].children[0].children[0];
        assert_eq!(first.summary, "The diver joined after a tense bargain.");
        assert!(first.has_transpired);
        assert!(generator.prompts()[0].contains("Recruit"));

        // Nothing recorded for the second scene: no recap requested.
        tracker.advance().await.unwrap();
        assert_eq!(generator.calls(), 1);
        assert_eq!(tracker.outline().children[0].children[1].children[0].summary, "Map the vault");
    }
}
