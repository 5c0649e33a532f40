//! User-facing message templates with session placeholders.

use rustedchat_config::MessagesConfig;
use rustedchat_core::{ChatId, Session};
use std::collections::HashMap;

/// Returned for a template name that is not configured.
pub const UNKNOWN_TEMPLATE: &str = "<UNKNOWN TEMPLATE>";

#[derive(Debug, Clone, Default)]
pub struct MessageTemplates {
    templates: HashMap<String, String>,
    open_tag: String,
    close_tag: String,
}

impl MessageTemplates {
    pub fn new(config: &MessagesConfig) -> Self {
        Self {
            templates: config.templates.clone(),
            open_tag: config.open_tag.clone(),
            close_tag: config.close_tag.clone(),
        }
    }

    /// Fill template `name` for `session`. `custom` replaces `_CUSTOM_STRING_`.
    pub fn render(&self, name: &str, chat_id: ChatId, session: &Session, custom: &str) -> String {
        let Some(template) = self.templates.get(name) else {
            return UNKNOWN_TEMPLATE.into();
        };
        template
            .replace("_CHAT_ID_", &chat_id.to_string())
            .replace("_NAME1_", &session.name1)
            .replace("_NAME2_", &session.name2)
            .replace("_CONTEXT_", &session.context)
            .replace("_GREETING_", &session.greeting)
            .replace("_CUSTOM_STRING_", custom)
            .replace("_OPEN_TAG_", &self.open_tag)
            .replace("_CLOSE_TAG_", &self.close_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::bare_session;

    #[test]
    fn renders_placeholders() {
        let mut config = MessagesConfig::default();
        config.open_tag = "<b>".into();
        config.close_tag = "</b>".into();
        let templates = MessageTemplates::new(&config);
        let mut s = bare_session();
        s.greeting = "Hi!".into();

        assert_eq!(
            templates.render("mem_reset", ChatId(1), &s, ""),
            "MEMORY RESET!\nHi!"
        );
        assert_eq!(
            templates.render("model_loaded", ChatId(1), &s, "like"),
            "LOADED MODEL: <b>like</b>"
        );
        assert_eq!(
            templates.render("hist_loaded", ChatId(1), &s, "Bot: bye"),
            "Bot LOADED!\nHi!\n\nLAST MESSAGE:\nBot: bye"
        );
    }

    #[test]
    fn unknown_template() {
        let templates = MessageTemplates::new(&MessagesConfig::default());
        assert_eq!(
            templates.render("nope", ChatId(1), &bare_session(), ""),
            UNKNOWN_TEMPLATE
        );
    }

    #[test]
    fn configured_templates_override() {
        let mut config = MessagesConfig::default();
        config
            .templates
            .insert("typing".into(), "_NAME2_ is thinking about _NAME1_ in _CHAT_ID_".into());
        let templates = MessageTemplates::new(&config);
        assert_eq!(
            templates.render("typing", ChatId(42), &bare_session(), ""),
            "Bot is thinking about You in 42"
        );
    }
}
