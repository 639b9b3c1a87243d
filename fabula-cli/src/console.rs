//! The line-oriented input loop.

use std::future::Future;
use std::io::Write;

use anyhow::Result;
use fabula_core::FabulaError;
use fabula_core::session::{NarrativeSession, TurnOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const PROMPT: &str = "Enter your query: ";

/// Print streamed text as it arrives.
fn print_chunk(chunk: &str) {
    let mut stdout = std::io::stdout();
    if let Err(e) = write!(stdout, "{chunk}").and_then(|()| stdout.flush()) {
        warn!(error = %e, "failed to write story text");
    }
}

/// What the loop should do after a turn.
enum Next {
    Continue,
    Stop,
}

fn report(result: Result<TurnOutcome, FabulaError>) -> Next {
    println!();
    match result {
        Ok(outcome) if outcome.story_complete => {
            println!("\n*** The story has reached its end. ***");
            Next::Stop
        }
        Ok(outcome) => {
            if outcome.scene_advanced {
                info!("the scene has ended");
            }
            Next::Continue
        }
        Err(FabulaError::StoryComplete) => {
            println!("\n*** The story has reached its end. ***");
            Next::Stop
        }
        Err(e) => {
            eprintln!("Turn failed: {e}");
            Next::Continue
        }
    }
}

/// Drive `work` to completion unless `interrupt` resolves first.
async fn until_interrupted<T, I>(work: impl Future<Output = T>, interrupt: I) -> Option<T>
where
    I: Future,
{
    tokio::select! {
        out = work => Some(out),
        _ = interrupt => None,
    }
}

/// Run the opening turn, then read one line per turn until EOF, Ctrl-C,
/// or the end of the story.
///
/// An empty line lets the autonomous character act, if there is one.
pub async fn run(mut session: NarrativeSession) -> Result<()> {
    let Some(opening) = until_interrupted(session.start(print_chunk), tokio::signal::ctrl_c()).await else {
        println!();
        return Ok(());
    };
    if let Next::Stop = report(opening) {
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{PROMPT}");
        std::io::stdout().flush()?;

        let Some(line) = until_interrupted(lines.next_line(), tokio::signal::ctrl_c()).await else {
            println!();
            break;
        };
        let Some(line) = line? else {
            println!();
            break;
        };

        let input = line.trim();
        let input = if input.is_empty() {
            if !session.has_character() {
                continue;
            }
            None
        } else {
            Some(input)
        };

        let Some(result) = until_interrupted(session.take_turn(input, print_chunk), tokio::signal::ctrl_c()).await
        else {
            println!();
            info!("interrupted mid-turn");
            break;
        };
        if let Next::Stop = report(result) {
            break;
        }
    }
    Ok(())
}
