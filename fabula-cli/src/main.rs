//! FABULA console.
//!
//! ```bash
//! fabula --config fabula.toml --outline colony_ship.json
//! ```
//!
//! Logs go to stderr (filter from `FABULA_LOG`, else `general.log_level`),
//! so story text on stdout stays readable.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fabula_core::config::FabulaConfig;
use fabula_core::memory::{BoundedDialogueMemory, SimilaritySearchMemory};
use fabula_core::session::{NarrativeSession, SessionSettings};
use fabula_core::story::{SceneProgressionEvaluator, SceneRewriter, StoryNode, StoryProgressTracker};
use fabula_core::Character;
use fabula_llm::Genre;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Interactive storyteller driven by a language model and a story outline.
#[derive(Debug, Parser)]
#[command(name = "fabula", version, about)]
struct Args {
    /// Configuration file (TOML). Defaults are used if it does not exist.
    #[arg(short, long, env = "FABULA_CONFIG", default_value = "fabula.toml")]
    config: PathBuf,

    /// Outline document (JSON). Overrides `story.outline_path`.
    #[arg(short, long)]
    outline: Option<PathBuf>,

    /// Narrator genre. Overrides `session.genre`.
    #[arg(short, long)]
    genre: Option<Genre>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = load_config(&args)?;
    init_tracing(&config.general.log_level);
    info!(config = %args.config.display(), provider = %config.llm.provider, model = %config.llm.model, "configuration loaded");

    let session = build_session(&config)?;
    console::run(session).await
}

/// Read the config file (if any), apply flags and environment secrets, validate.
fn load_config(args: &Args) -> Result<FabulaConfig> {
    let mut config = if args.config.exists() {
        FabulaConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        FabulaConfig::default()
    };

    if let Some(outline) = &args.outline {
        config.story.outline_path = Some(outline.clone());
    }
    if let Some(genre) = args.genre {
        config.session.genre = genre;
    }
    config.apply_secrets(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Install the stderr subscriber.  `FABULA_LOG` wins over the config.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("FABULA_LOG")
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Wire the configured clients, outline and memories into a session.
fn build_session(config: &FabulaConfig) -> Result<NarrativeSession> {
    let Some(outline_path) = &config.story.outline_path else {
        bail!("no outline given: pass --outline or set story.outline_path");
    };
    let outline = StoryNode::from_file(outline_path)
        .with_context(|| format!("failed to load outline {}", outline_path.display()))?;

    let client = Arc::new(config.llm.build_client()?);
    if !client.is_available() {
        warn!("no language model configured, every turn will fail");
    }
    let embedder = Arc::new(config.embedding.build_client());

    let mut tracker = StoryProgressTracker::new(outline, config.story.highest_level()?)?
        .with_min_interactions(config.story.min_interactions)
        .with_foreshadow_threshold(config.story.foreshadow_threshold)
        .with_policy(config.story.advance_policy)
        .with_evaluator(
            SceneProgressionEvaluator::new(client.clone()).with_objective(config.story.evaluation_objective.clone()),
        );
    if config.story.rewrite_scenes {
        tracker = tracker.with_rewriter(SceneRewriter::new(client.clone()));
    }

    let memory = SimilaritySearchMemory::new(embedder).with_brute_force_threshold(config.memory.brute_force_threshold);
    let mut session = NarrativeSession::new(
        client.clone(),
        tracker,
        BoundedDialogueMemory::new(config.memory.char_budget),
        memory,
    )
    .with_settings(SessionSettings::from_config(config));

    if let Some(description) = &config.session.character {
        session = session.with_character(Character::new(description.clone(), client));
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const OUTLINE: &str = r#"{"layerLevel": 1, "shortSummary": "story", "children": [
        {"layerLevel": 1, "shortSummary": "only scene", "children": []}
    ]}"#;

    fn temp_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn flags_override_config_file() {
        let config_file = temp_file("[session]\ngenre = \"horror\"\n[story]\noutline_path = \"from-file.json\"\n");
        let args = Args::parse_from([
            "fabula",
            "--config",
            config_file.path().to_str().unwrap(),
            "--outline",
            "from-flag.json",
            "--genre",
            "fantasy",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.story.outline_path, Some(PathBuf::from("from-flag.json")));
        assert_eq!(config.session.genre, Genre::Fantasy);
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let args = Args::parse_from(["fabula", "--config", "/nonexistent/fabula.toml"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.memory.char_budget, 2000);
    }

    #[test]
    fn session_builds_from_scene_level_outline() {
        let outline = temp_file(OUTLINE);
        let mut config = FabulaConfig::from_toml("[llm]\nprovider = \"none\"\n[story]\nhighest_level = \"scene\"").unwrap();
        config.story.outline_path = Some(outline.path().to_path_buf());
        config.session.character = Some("A wandering bard".into());

        let session = build_session(&config).unwrap();
        assert_eq!(session.tracker().current_scene().unwrap().summary, "only scene");
        assert!(session.has_character());
    }

    #[test]
    fn session_requires_an_outline() {
        let config = FabulaConfig::default();
        assert!(build_session(&config).is_err());
    }
}
