//! Prompt Golden Tests: every template renders completely.
//!
//! A curated set of template → variables → expectations.  Each case is
//! rendered offline and checked for the text that must reach the model
//! and for placeholders that must not.

use fabula_llm::prompt::{self, Genre, PromptParts};

/// A golden test case for template rendering.
struct GoldenCase {
    /// Human-readable name for the test case.
    name: &'static str,
    /// Which template constant to use.
    template: &'static str,
    /// Template variables to fill in.
    vars: Vec<(&'static str, &'static str)>,
    /// Strings that MUST appear in the rendered prompt.
    prompt_must_contain: Vec<&'static str>,
    /// Strings that MUST NOT appear in the rendered prompt.
    prompt_must_not_contain: Vec<&'static str>,
}

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        // ---------------------------------------------------------------
        // 1. Scene evaluation mid-scene
        // ---------------------------------------------------------------
        GoldenCase {
            name: "evaluation_engine_room",
            template: prompt::SCENE_EVALUATION,
            vars: vec![
                ("story_so_far", "Player: I pry open the coolant panel\nStoryteller: Frost bursts out."),
                ("current_scene", "Penny restores coolant flow to the reactor"),
                ("next_scene", "The crew confronts the silent AI on the bridge"),
                ("objective", prompt::SCENE_EVALUATION_OBJECTIVE),
            ],
            prompt_must_contain: vec![
                "Frost bursts out.",
                "restores coolant flow",
                "silent AI",
                "YES - 100%",
                "FINAL ANSWER:",
            ],
            prompt_must_not_contain: vec!["{story_so_far}", "{current_scene}", "{next_scene}", "{objective}"],
        },
        // ---------------------------------------------------------------
        // 2. Scene evaluation at the last scene (no next scene)
        // ---------------------------------------------------------------
        GoldenCase {
            name: "evaluation_final_scene",
            template: prompt::SCENE_EVALUATION,
            vars: vec![
                ("story_so_far", "Storyteller: The colony lights flicker on."),
                ("current_scene", "The ship lands on Persephara"),
                ("next_scene", ""),
                ("objective", prompt::SCENE_EVALUATION_OBJECTIVE),
            ],
            prompt_must_contain: vec!["Persephara", "WHAT THE NEXT SCENE WILL BE ABOUT:"],
            prompt_must_not_contain: vec!["{next_scene}"],
        },
        // ---------------------------------------------------------------
        // 3. Scene recap
        // ---------------------------------------------------------------
        GoldenCase {
            name: "recap_after_scene",
            template: prompt::SCENE_RECAP,
            vars: vec![
                ("campaign_summary", "The awakened crew searches for the reason they were woken"),
                ("scene_text", "Player: check the cryo pods\nStoryteller: Three pods are empty."),
            ],
            prompt_must_contain: vec!["awakened crew", "Three pods are empty.", "Summary:"],
            prompt_must_not_contain: vec!["{campaign_summary}", "{scene_text}"],
        },
        // ---------------------------------------------------------------
        // 4. Autonomous character
        // ---------------------------------------------------------------
        GoldenCase {
            name: "character_engineer",
            template: prompt::CHARACTER_ACTION,
            vars: vec![
                ("description", "Penny McFixit, cheerful chief engineer"),
                ("story_so_far", "Storyteller: The corridor lights die one by one."),
            ],
            prompt_must_contain: vec!["Penny McFixit", "corridor lights", "Proposed action:", "first person"],
            prompt_must_not_contain: vec!["{description}", "{story_so_far}"],
        },
    ]
}

#[test]
fn golden_prompts_render_without_unresolved_vars() {
    for case in &golden_cases() {
        let rendered = prompt::render_template(case.template, &case.vars);

        for needle in &case.prompt_must_contain {
            assert!(
                rendered.contains(needle),
                "Golden case '{}': rendered prompt must contain '{}' but doesn't.\nRendered:\n{}",
                case.name,
                needle,
                &rendered[..rendered.len().min(500)]
            );
        }

        for needle in &case.prompt_must_not_contain {
            assert!(
                !rendered.contains(needle),
                "Golden case '{}': rendered prompt must NOT contain '{}' but does.\nRendered:\n{}",
                case.name,
                needle,
                &rendered[..rendered.len().min(500)]
            );
        }
    }
}

#[test]
fn every_genre_composes_a_turn_prompt() {
    let memories = vec!["Storyteller: H.E.L.E.N. has gone quiet.".to_string()];
    for genre in Genre::all() {
        let rendered = prompt::compose_prompt(&PromptParts {
            genre: *genre,
            story_context: "Current Scene: waking up",
            memories: &memories,
            window_text: "\nStoryteller: You wake.\n",
            scaffold: "Player: look around\nStoryteller: ",
        });
        assert!(rendered.starts_with(genre.instructions()), "genre '{genre}' must lead the prompt");
        assert!(rendered.contains(prompt::STORY_STRUCTURE));
        assert!(rendered.contains("H.E.L.E.N. has gone quiet."));
        assert!(rendered.ends_with("Storyteller: "));
    }
}

#[test]
fn narrator_prompts_establish_a_role() {
    let prompts = [
        ("storyteller", prompt::STORYTELLER_SYSTEM),
        ("character", prompt::CHARACTER_ACTION),
    ];
    for (name, template) in &prompts {
        assert!(
            template.contains("You are"),
            "Prompt '{name}' must establish identity with 'You are'"
        );
    }
}
