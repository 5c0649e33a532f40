//! History mutator: shapes the conversation log before generation.
//!
//! Every directive that appends leaves the log ending in a stub for the
//! backend to complete. Appends always come in pairs (speaker line or
//! blank, then stub) so the log never holds half a turn. CONTINUE appends
//! nothing and extends the existing last entry.

use regex::Regex;
use rustedchat_core::{BotMode, Session, TurnInput};
use std::sync::LazyLock;
use tracing::debug;

use crate::command::{Directive, ImmediateAction};
use crate::error::GenerationError;
use crate::invoker::ReplyAction;

static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n+| +").expect("valid word boundary regex"));

/// Confirmation produced by an immediate action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateReply {
    pub text: String,
    pub action: ReplyAction,
}

impl ImmediateReply {
    fn system(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ReplyAction::System,
        }
    }
}

/// Directives that start a new turn. Query mode clears the log before these.
pub(crate) fn starts_new_turn(directive: &Directive) -> bool {
    !matches!(directive, Directive::Continue | Directive::Regenerate)
}

/// The speaker a turn is attributed to; blank falls back to the user persona.
pub fn resolve_speaker(session: &Session, speaker: &str) -> String {
    if speaker.trim().is_empty() {
        session.name1.clone()
    } else {
        speaker.to_string()
    }
}

/// Apply `directive` to `session`, leaving a stub ready for completion.
pub fn apply(
    session: &mut Session,
    mode: BotMode,
    directive: &Directive,
    speaker: &str,
) -> Result<(), GenerationError> {
    if mode == BotMode::Query && starts_new_turn(directive) {
        session.reset();
    }

    let speaker = resolve_speaker(session, speaker);
    match directive {
        Directive::Normal { text } => {
            session.record_input(TurnInput::Chat { text: text.clone() }, speaker.as_str());
            let stub = format!("{}:", session.name2);
            session.history_add(format!("{speaker}: {text}"), stub);
        }
        Directive::NotebookAppend { text } => {
            session.record_input(TurnInput::Notebook { text: text.clone() }, speaker.as_str());
            session.history_add("", text.as_str());
        }
        Directive::Impersonate { speaker: named } => {
            let who = named.clone().unwrap_or(speaker);
            session.record_input(TurnInput::Impersonate, who.as_str());
            session.history_add("", format!("{who}:"));
        }
        Directive::Next => {
            session.record_input(TurnInput::Next, speaker.as_str());
            let stub = format!("{}:", session.name2);
            session.history_add("", stub);
        }
        Directive::ImageRequest { prompt } => {
            session.record_input(TurnInput::Image { prompt: prompt.clone() }, speaker.as_str());
            session.history_add("", prompt.as_str());
        }
        Directive::Continue => {
            if session.history.is_empty() {
                return Err(GenerationError::Mutation(
                    "nothing to continue: history is empty".into(),
                ));
            }
        }
        Directive::Regenerate => {
            let stub = regenerate_stub(session)?;
            session.change_last_message(stub);
        }
    }

    debug!(
        turns = session.history.len(),
        inputs = session.text_in.len(),
        "History shaped"
    );
    Ok(())
}

/// Re-derive the stub the last recorded turn started from.
pub fn regenerate_stub(session: &Session) -> Result<String, GenerationError> {
    if session.history.is_empty() {
        return Err(GenerationError::Mutation(
            "nothing to regenerate: history is empty".into(),
        ));
    }
    let (Some(input), Some(name)) = (session.text_in.last(), session.name_in.last()) else {
        return Err(GenerationError::Mutation(
            "nothing to regenerate: no recorded input".into(),
        ));
    };
    let stub = match input {
        TurnInput::Impersonate => format!("{name}:"),
        TurnInput::Chat { .. } | TurnInput::Next => format!("{}:", session.name2),
        TurnInput::Notebook { text } => text.clone(),
        TurnInput::Image { prompt } => prompt.clone(),
    };
    Ok(stub)
}

/// Apply an edit that needs no generation.
///
/// `ReplaceLast` only rewrites the log; the caller swaps the delivered
/// message when the reply action is `DeleteLast`.
pub fn apply_immediate(session: &mut Session, action: &ImmediateAction) -> ImmediateReply {
    match action {
        ImmediateAction::RenameBot(name) => {
            session.name2 = name.clone();
            ImmediateReply::system(format!("New bot name: {name}"))
        }
        ImmediateAction::RenameUser(name) => {
            session.name1 = name.clone();
            ImmediateReply::system(format!("New user name: {name}"))
        }
        ImmediateAction::AppendContext(line) => {
            session.context.push('\n');
            session.context.push_str(line);
            ImmediateReply::system(format!("Added to context: {line}"))
        }
        ImmediateAction::ReplaceLast(text) => {
            if session.history.is_empty() {
                return ImmediateReply::system("Nothing to replace.");
            }
            session.change_last_message(text.as_str());
            ImmediateReply {
                text: text.clone(),
                action: ReplyAction::DeleteLast,
            }
        }
    }
}

/// Drop the final word of `text`.
///
/// Words are separated by runs of newlines or spaces. When the text ends in
/// a separator, a single trailing character is dropped instead.
pub fn delete_last_word(text: &str) -> String {
    let last_word = WORD_BOUNDARY.split(text).last().unwrap_or_default();
    let cut = if last_word.is_empty() {
        1.min(text.len())
    } else {
        last_word.len()
    };
    text[..text.len() - cut].trim().to_string()
}
