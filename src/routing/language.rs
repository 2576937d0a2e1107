//! Bot language and the canned texts the router falls back to

use std::fmt;

/// Language a bot talks in. Anything we do not recognise is treated as
/// Hebrew, the language most bots are built in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Hebrew,
    English,
}

impl Language {
    /// Parse a language tag (`en`, `en-US`, `English`, `he`, `עברית`, ...)
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        if tag == "en" || tag.starts_with("en-") || tag.starts_with("en_") || tag == "english" {
            Language::English
        } else {
            Language::Hebrew
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::Hebrew => "he",
            Language::English => "en",
        }
    }

    /// Name used in model prompts
    pub fn name(self) -> &'static str {
        match self {
            Language::Hebrew => "Hebrew",
            Language::English => "English",
        }
    }

    /// Reply when the flow points at a step that does not exist
    pub fn technical_error(self) -> &'static str {
        match self {
            Language::Hebrew => "מצטערים, אירעה תקלה טכנית. אנא נסו שוב מאוחר יותר.",
            Language::English => "Sorry, a technical error occurred. Please try again later.",
        }
    }

    /// Reply when nothing, not even the model, could make sense of a message
    pub fn apology(self, options: &[String]) -> String {
        if options.is_empty() {
            return match self {
                Language::Hebrew => "מצטערים, לא הבנו. אפשר לנסח שוב?".to_string(),
                Language::English => "Sorry, I didn't understand. Could you rephrase?".to_string(),
            };
        }
        let sorry = match self {
            Language::Hebrew => "מצטערים, לא הבנו.",
            Language::English => "Sorry, I didn't understand.",
        };
        format!("{sorry} {}", self.options_line(options))
    }

    /// Caption of the button that opens a WhatsApp option list
    pub fn menu_label(self) -> &'static str {
        match self {
            Language::Hebrew => "אפשרויות",
            Language::English => "Options",
        }
    }

    /// Sentence listing the options the user can pick from
    pub fn options_line(self, options: &[String]) -> String {
        let intro = match self {
            Language::Hebrew => "אפשר לבחור:",
            Language::English => "You can choose:",
        };
        format!("{intro} {}", options.join(", "))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
