//! Prefix command grammar.
//!
//! A raw message is matched against an ordered rule list. Two-character
//! rules (rename bot, rename user, append context) are tried before the
//! one-character rules (replace last, image, impersonate), so `++` is never
//! read as the `+` impersonation prefix. Prefixes are compared by
//! characters, not bytes: the image prefixes are multi-byte emoji.

use rustedchat_config::PrefixConfig;
use rustedchat_core::BotMode;
use tracing::debug;

/// What arrived: free text, or an edit request from a button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Text(String),
    Continue,
    Regenerate,
    Next,
    Impersonate,
}

/// Edits that complete without calling the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImmediateAction {
    RenameBot(String),
    RenameUser(String),
    AppendContext(String),
    ReplaceLast(String),
}

/// How the history must be shaped before generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Normal { text: String },
    NotebookAppend { text: String },
    Continue,
    Regenerate,
    Next,
    /// `speaker` is set when the name came with the message (`#Alice`).
    Impersonate { speaker: Option<String> },
    ImageRequest { prompt: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Immediate(ImmediateAction),
    Directive(Directive),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    RenameBot,
    RenameUser,
    AppendContext,
    ReplaceLast,
    Image,
    Impersonate,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    width: usize,
    prefixes: Vec<String>,
}

/// Split `text` after its first `width` characters.
fn split_chars(text: &str, width: usize) -> Option<(&str, &str)> {
    let end = match text.char_indices().nth(width) {
        Some((index, _)) => index,
        None if text.chars().count() == width => text.len(),
        None => return None,
    };
    Some(text.split_at(end))
}

pub struct CommandInterpreter {
    rules: Vec<Rule>,
    image_prompt_of: String,
    image_prompt_self: String,
}

impl CommandInterpreter {
    pub fn new(prefixes: &PrefixConfig) -> Self {
        let rule = |kind, width, prefixes: &Vec<String>| Rule {
            kind,
            width,
            prefixes: prefixes.clone(),
        };
        Self {
            rules: vec![
                rule(RuleKind::RenameBot, 2, &prefixes.rename_bot),
                rule(RuleKind::RenameUser, 2, &prefixes.rename_user),
                rule(RuleKind::AppendContext, 2, &prefixes.add_context),
                rule(RuleKind::ReplaceLast, 1, &prefixes.replace),
                rule(RuleKind::Image, 1, &prefixes.image),
                rule(RuleKind::Impersonate, 1, &prefixes.impersonate),
            ],
            image_prompt_of: prefixes.image_prompt_of.clone(),
            image_prompt_self: prefixes.image_prompt_self.clone(),
        }
    }

    /// First rule whose prefix starts `text`, with the remainder.
    fn match_rule<'t>(&self, text: &'t str) -> Option<(RuleKind, &'t str)> {
        self.rules.iter().find_map(|rule| {
            let (head, rest) = split_chars(text, rule.width)?;
            rule.prefixes
                .iter()
                .any(|p| p == head)
                .then_some((rule.kind, rest))
        })
    }

    /// Resolve the description prompt for an image request.
    pub fn image_prompt(&self, object: &str) -> String {
        let object = object.trim();
        if object.is_empty() {
            self.image_prompt_self.clone()
        } else {
            self.image_prompt_of.replace("OBJECT", object)
        }
    }

    pub fn classify(&self, trigger: &Trigger, mode: BotMode) -> Classification {
        let classification = match trigger {
            Trigger::Continue => Classification::Directive(Directive::Continue),
            Trigger::Regenerate => Classification::Directive(Directive::Regenerate),
            Trigger::Next => Classification::Directive(Directive::Next),
            Trigger::Impersonate => {
                Classification::Directive(Directive::Impersonate { speaker: None })
            }
            Trigger::Text(text) => self.classify_text(text, mode),
        };
        debug!(?classification, %mode, "Input classified");
        classification
    }

    fn classify_text(&self, text: &str, mode: BotMode) -> Classification {
        let matched = self.match_rule(text);

        // Immediate actions apply in every mode
        if let Some((kind, rest)) = matched {
            let immediate = match kind {
                RuleKind::RenameBot => Some(ImmediateAction::RenameBot(rest.to_string())),
                RuleKind::RenameUser => Some(ImmediateAction::RenameUser(rest.to_string())),
                RuleKind::AppendContext => Some(ImmediateAction::AppendContext(rest.to_string())),
                RuleKind::ReplaceLast => Some(ImmediateAction::ReplaceLast(rest.to_string())),
                RuleKind::Image | RuleKind::Impersonate => None,
            };
            if let Some(action) = immediate {
                return Classification::Immediate(action);
            }
        }

        if mode == BotMode::Notebook {
            return Classification::Directive(Directive::NotebookAppend {
                text: text.to_string(),
            });
        }

        let directive = match matched {
            Some((RuleKind::Image, rest)) => Directive::ImageRequest {
                prompt: self.image_prompt(rest),
            },
            Some((RuleKind::Impersonate, rest)) => {
                let rest = rest.trim();
                Directive::Impersonate {
                    speaker: (!rest.is_empty()).then(|| rest.to_string()),
                }
            }
            _ => Directive::Normal {
                text: text.to_string(),
            },
        };
        Classification::Directive(directive)
    }
}
