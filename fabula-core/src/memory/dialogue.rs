//! Bounded dialogue memory: the sliding in-context window.
//!
//! Exchanges are kept oldest-first.  When their combined length passes
//! the character budget, the oldest exchange is moved into the
//! [`SimilaritySearchMemory`] so it can still be recalled by similarity.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::similarity::{MemoryRole, SimilaritySearchMemory};
use crate::error::Result;

/// One completed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// The player's line, already prefixed (empty for "continue" turns).
    pub human: String,
    /// The storyteller's line, already prefixed.
    pub ai: String,
}

impl Exchange {
    /// Create an exchange.
    #[must_use]
    pub fn new(human: impl Into<String>, ai: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            ai: ai.into(),
        }
    }

    /// Length in Unicode scalar values.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.human.chars().count() + self.ai.chars().count()
    }
}

/// The in-context window with a character budget.
#[derive(Debug, Clone)]
pub struct BoundedDialogueMemory {
    exchanges: VecDeque<Exchange>,
    char_budget: usize,
}

impl BoundedDialogueMemory {
    /// Create an empty window.
    #[must_use]
    pub fn new(char_budget: usize) -> Self {
        Self {
            exchanges: VecDeque::new(),
            char_budget,
        }
    }

    /// The configured budget.
    #[must_use]
    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Add an exchange at the back.  Does not enforce the budget.
    pub fn append(&mut self, exchange: Exchange) {
        self.exchanges.push_back(exchange);
    }

    /// The window as prompt text: `human\nai\n` per exchange, blank line between.
    #[must_use]
    pub fn current_window_text(&self) -> String {
        self.exchanges
            .iter()
            .map(|e| format!("{}\n{}\n", e.human, e.ai))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Characters currently retained.
    #[must_use]
    pub fn retained_chars(&self) -> usize {
        self.exchanges.iter().map(Exchange::char_len).sum()
    }

    /// Number of exchanges in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Exchanges, oldest first.
    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    /// Evict oldest exchanges into `sink` until the window fits the budget.
    ///
    /// Each evicted exchange is stored as two entries, storyteller text
    /// first.  Empty texts are not stored.  If the sink fails, the
    /// exchange stays in the window and the error is returned.
    ///
    /// # Errors
    ///
    /// Propagates the sink's failure.
    pub async fn enforce_budget(&mut self, sink: &mut SimilaritySearchMemory) -> Result<usize> {
        let mut evicted = 0;
        while self.retained_chars() > self.char_budget {
            let Some(oldest) = self.exchanges.front() else {
                break;
            };
            let entries: Vec<(MemoryRole, String)> = [(MemoryRole::Ai, &oldest.ai), (MemoryRole::Human, &oldest.human)]
                .into_iter()
                .filter(|(_, text)| !text.is_empty())
                .map(|(role, text)| (role, text.clone()))
                .collect();
            sink.insert_with_role(&entries).await?;
            self.exchanges.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                evicted,
                retained = self.retained_chars(),
                budget = self.char_budget,
                "evicted exchanges to long-term memory"
            );
        }
        Ok(evicted)
    }

    /// The most recent player line in the window, without its prefix.
    ///
    /// Scans the window text bottom-up for a line starting with
    /// `human_prefix` whose remainder is neither empty nor the continue
    /// keyword.  Falls back to the last non-empty line.  `None` only when
    /// the window has no text at all.
    #[must_use]
    pub fn last_human_line(&self, human_prefix: &str, continue_keyword: &str) -> Option<String> {
        let window = self.current_window_text();
        let lines: Vec<&str> = window.lines().collect();

        let from_player = lines.iter().rev().find_map(|line| {
            let rest = line.trim_start().strip_prefix(human_prefix.trim_start())?.trim();
            (!rest.is_empty() && !rest.eq_ignore_ascii_case(continue_keyword)).then(|| rest.to_string())
        });

        from_player.or_else(|| {
            lines
                .iter()
                .rev()
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
                .map(str::to_string)
        })
    }
}

impl Default for BoundedDialogueMemory {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_llm::{Embedder, EmbeddingError, HashingEmbedder};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Request("connection refused".into()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn sink() -> SimilaritySearchMemory {
        SimilaritySearchMemory::new(Arc::new(HashingEmbedder::new(32)))
    }

    #[test]
    fn window_text_separates_exchanges_with_blank_line() {
        let mut memory = BoundedDialogueMemory::new(100);
        memory.append(Exchange::new("Player: hi", "Storyteller: hello"));
        memory.append(Exchange::new("Player: go", "Storyteller: gone"));
        assert_eq!(
            memory.current_window_text(),
            "Player: hi\nStoryteller: hello\n\nPlayer: go\nStoryteller: gone\n"
        );
    }

    #[test]
    fn chars_are_counted_as_scalar_values() {
        let mut memory = BoundedDialogueMemory::new(100);
        memory.append(Exchange::new("ñé", "日本"));
        assert_eq!(memory.retained_chars(), 4);
    }

    #[tokio::test]
    async fn eviction_is_fifo_and_stores_ai_then_human() {
        let mut memory = BoundedDialogueMemory::new(20);
        memory.append(Exchange::new("h1-aaaa", "a1-aaaa"));
        memory.append(Exchange::new("h2-bbbb", "a2-bbbb"));
        memory.append(Exchange::new("h3-cccc", "a3-cccc"));
        let mut store = sink();

        let evicted = memory.enforce_budget(&mut store).await.unwrap();
        assert_eq!(evicted, 2);
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.exchanges().next().unwrap().human, "h3-cccc");

        let texts: Vec<_> = store.records().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a1-aaaa", "h1-aaaa", "a2-bbbb", "h2-bbbb"]);
        assert_eq!(store.records()[0].role, MemoryRole::Ai);
        assert_eq!(store.records()[1].role, MemoryRole::Human);
    }

    #[tokio::test]
    async fn oversized_single_exchange_is_evicted() {
        let mut memory = BoundedDialogueMemory::new(5);
        memory.append(Exchange::new("", "far too long for the budget"));
        let mut store = sink();
        assert_eq!(memory.enforce_budget(&mut store).await.unwrap(), 1);
        assert!(memory.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn enforcing_twice_is_idempotent() {
        let mut memory = BoundedDialogueMemory::new(10);
        memory.append(Exchange::new("aaaaa", "bbbbb"));
        memory.append(Exchange::new("ccccc", "ddddd"));
        let mut store = sink();
        assert_eq!(memory.enforce_budget(&mut store).await.unwrap(), 1);
        assert_eq!(memory.enforce_budget(&mut store).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn failed_sink_keeps_exchange() {
        let mut memory = BoundedDialogueMemory::new(1);
        memory.append(Exchange::new("Player: look", "Storyteller: fog"));
        let mut store = SimilaritySearchMemory::new(Arc::new(FailingEmbedder));
        assert!(memory.enforce_budget(&mut store).await.is_err());
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn last_human_line_skips_continue_and_empty_turns() {
        let mut memory = BoundedDialogueMemory::new(1000);
        memory.append(Exchange::new("Player: open the hatch\nslowly", "Storyteller: it creaks"));
        memory.append(Exchange::new("Player: continue", "Storyteller: more creaking"));
        memory.append(Exchange::new("", "Storyteller: silence"));
        assert_eq!(
            memory.last_human_line("Player: ", "continue").as_deref(),
            Some("open the hatch")
        );
    }

    #[test]
    fn last_human_line_falls_back_to_last_text() {
        let mut memory = BoundedDialogueMemory::new(1000);
        memory.append(Exchange::new("", "Storyteller: The ship wakes.  "));
        assert_eq!(
            memory.last_human_line("Player: ", "continue").as_deref(),
            Some("Storyteller: The ship wakes.")
        );
        assert_eq!(BoundedDialogueMemory::new(10).last_human_line("Player: ", "continue"), None);
    }
}
