//! Prompt assembly under a token budget.
//!
//! The persona context is always included. Example dialogue, greeting and
//! history turns are then added newest first, each one whole, until the
//! next entry would no longer fit.
//!
//! # Determinism
//!
//! Identical sessions and counters always produce identical prompts.

use rustedchat_core::{BackendError, Session};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Separates example dialogue from the conversation.
const START_MARKER: &str = "<START>";

/// What assembly included and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Tokens spent on the mandatory context block.
    pub context_tokens: usize,
    /// The configured `truncation_length`.
    pub budget: usize,
    /// Tokens left for the tail after the context.
    pub available: usize,
    /// Tokens spent on included tail entries.
    pub used_tokens: usize,
    pub turns_included: usize,
    pub turns_dropped: usize,
    /// How far the context alone overshoots the budget.
    pub deficit: usize,
}

impl AssemblyMetadata {
    /// Context plus included tail.
    pub fn prompt_tokens(&self) -> usize {
        self.context_tokens + self.used_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub metadata: AssemblyMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptAssembler {
    truncation_length: usize,
}

impl PromptAssembler {
    pub fn new(truncation_length: usize) -> Self {
        Self { truncation_length }
    }

    pub fn truncation_length(&self) -> usize {
        self.truncation_length
    }

    /// The context block, ending in exactly one newline.
    pub fn normalized_context(session: &Session) -> String {
        format!("{}\n", session.context.trim())
    }

    /// Example block and greeting line, in prompt order. Absent ones are empty.
    fn preamble(session: &Session) -> [String; 2] {
        let example = if session.example.is_empty() {
            String::new()
        } else {
            format!("{}\n{START_MARKER}\n", session.example)
        };
        let greeting = if session.greeting.is_empty() {
            String::new()
        } else {
            format!("\n{}: {}", session.name2, session.greeting)
        };
        [example, greeting]
    }

    /// Build the prompt for `session`, counting tokens with `count`.
    pub fn assemble<F>(&self, session: &Session, count: F) -> Result<AssembledPrompt, BackendError>
    where
        F: Fn(&str) -> Result<usize, BackendError>,
    {
        let context = Self::normalized_context(session);
        let context_tokens = count(&context)?;

        let (available, deficit) = match self.truncation_length.checked_sub(context_tokens) {
            Some(available) => (available, 0),
            None => {
                let deficit = context_tokens - self.truncation_length;
                warn!(
                    context_tokens,
                    budget = self.truncation_length,
                    deficit,
                    "Context is too long, dropping example, greeting and history"
                );
                (0, deficit)
            }
        };

        let [example, greeting] = Self::preamble(session);
        let candidates: Vec<&str> = [example.as_str(), greeting.as_str()]
            .into_iter()
            .chain(session.history.iter().map(String::as_str))
            .filter(|entry| !entry.is_empty())
            .collect();

        let mut remaining = available;
        let mut pieces = Vec::new();
        for entry in candidates.iter().rev() {
            let piece = format!("\n{entry}");
            let tokens = count(&piece)?;
            if remaining < tokens {
                break;
            }
            remaining -= tokens;
            pieces.push(piece);
        }

        let turns_included = pieces.len();
        pieces.reverse();
        let tail = pieces.concat().replace("\n\n", "\n");
        // The context already ends in a newline
        let tail = tail.strip_prefix('\n').unwrap_or(&tail);

        Ok(AssembledPrompt {
            prompt: format!("{context}{tail}"),
            metadata: AssemblyMetadata {
                context_tokens,
                budget: self.truncation_length,
                available,
                used_tokens: available - remaining,
                turns_included,
                turns_dropped: candidates.len() - turns_included,
                deficit,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustedchat_core::Character;

    fn chars(text: &str) -> Result<usize, BackendError> {
        Ok(text.chars().count())
    }

    fn session(greeting: &str, example: &str) -> Session {
        Session::from_character(
            "bot.json",
            &Character {
                name: "Bot".into(),
                context: "You are Bot.".into(),
                greeting: greeting.into(),
                example: example.into(),
                user_name: "You".into(),
            },
        )
    }

    fn long_session() -> Session {
        let mut s = session("Hello there.", "Alice: ping\nBot: pong");
        for i in 0..12 {
            s.history_add(format!("Alice: message {i}"), format!("Bot: reply {i}"));
        }
        s
    }

    #[test]
    fn simple_prompt_layout() {
        let mut s = session("", "");
        s.history_add("Alice: Hi", "Bot:");
        let out = PromptAssembler::new(1000).assemble(&s, chars).unwrap();
        assert_eq!(out.prompt, "You are Bot.\nAlice: Hi\nBot:");
        assert_eq!(out.metadata.turns_included, 2);
        assert_eq!(out.metadata.turns_dropped, 0);
        assert_eq!(out.metadata.deficit, 0);
    }

    #[test]
    fn context_normalized_to_one_trailing_newline() {
        let mut s = session("", "");
        s.context = "  You are Bot.\n\n\n".into();
        let out = PromptAssembler::new(100).assemble(&s, chars).unwrap();
        assert_eq!(out.prompt, "You are Bot.\n");
    }

    #[test]
    fn example_and_greeting_precede_history() {
        let mut s = session("Hello there.", "Alice: ping\nBot: pong");
        s.history_add("Alice: Hi", "Bot:");
        let out = PromptAssembler::new(1000).assemble(&s, chars).unwrap();
        assert!(out.prompt.starts_with("You are Bot.\nAlice: ping\nBot: pong\n<START>\n"));
        assert!(out.prompt.contains("Bot: Hello there.\nAlice: Hi\nBot:"));
        assert_eq!(out.metadata.turns_included, 4);
    }

    #[test]
    fn prompt_never_exceeds_budget() {
        let s = long_session();
        let context = chars(&PromptAssembler::normalized_context(&s)).unwrap();
        for budget in context..context + 400 {
            let out = PromptAssembler::new(budget).assemble(&s, chars).unwrap();
            assert!(
                chars(&out.prompt).unwrap() <= budget,
                "budget {budget} exceeded: {}",
                out.prompt.len()
            );
            assert!(out.metadata.prompt_tokens() <= budget);
        }
    }

    #[test]
    fn shrinking_budget_never_adds_turns() {
        let s = long_session();
        let mut previous = usize::MAX;
        for budget in (0..500).rev() {
            let out = PromptAssembler::new(budget).assemble(&s, chars).unwrap();
            assert!(out.metadata.turns_included <= previous);
            previous = out.metadata.turns_included;
        }
    }

    #[test]
    fn entries_are_included_whole() {
        let s = long_session();
        for budget in [40, 57, 90, 133, 200] {
            let out = PromptAssembler::new(budget).assemble(&s, chars).unwrap();
            let tail = out.prompt.trim_start_matches("You are Bot.\n");
            for line in tail.lines() {
                assert!(
                    line.is_empty()
                        || s.history.iter().any(|h| h == line)
                        || line == "Alice: ping"
                        || line == "Bot: pong"
                        || line == START_MARKER
                        || line == "Bot: Hello there.",
                    "partial entry {line:?} at budget {budget}"
                );
            }
        }
    }

    #[test]
    fn newest_turns_survive_truncation() {
        let s = long_session();
        let out = PromptAssembler::new(60).assemble(&s, chars).unwrap();
        assert!(out.prompt.ends_with("Bot: reply 11"));
        assert!(!out.prompt.contains("message 0"));
        assert!(out.metadata.turns_dropped > 0);
    }

    #[test]
    fn oversized_context_is_kept_and_reported() {
        let mut s = session("Hi", "");
        s.history_add("Alice: Hi", "Bot:");
        let out = PromptAssembler::new(5).assemble(&s, chars).unwrap();
        assert_eq!(out.prompt, "You are Bot.\n");
        assert_eq!(out.metadata.available, 0);
        assert_eq!(out.metadata.deficit, 13 - 5);
        assert_eq!(out.metadata.turns_included, 0);
    }

    #[test]
    fn counter_failure_propagates() {
        let s = session("", "");
        let err = PromptAssembler::new(10)
            .assemble(&s, |_| Err(BackendError::Network("down".into())))
            .unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }
}
