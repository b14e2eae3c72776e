//! Reasoning Directives
//!
//! Users can override the reasoning-mode default for a single message by
//! ending it with a control token:
//!
//! - `/think` asks the model to reason before answering
//! - `/no_think` asks it to answer directly
//!
//! Only a token at the very end of the (trimmed) text counts. A token in the
//! middle of a sentence is ordinary text.
//!
//! # Example
//!
//! ```
//! use relay_core::directive::parse_directive;
//!
//! let parsed = parse_directive("Explain lifetimes /no_think", true);
//! assert_eq!(parsed.text, "Explain lifetimes");
//! assert!(!parsed.reasoning);
//! ```

/// Token that enables reasoning for one message
pub const ENABLE_TOKEN: &str = "/think";

/// Token that disables reasoning for one message
pub const DISABLE_TOKEN: &str = "/no_think";

/// A prompt with its directive stripped
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    /// Prompt text without the trailing token
    pub text: String,
    /// Effective reasoning mode for this message
    pub reasoning: bool,
    /// Whether the text carried an explicit token
    pub explicit: bool,
}

/// Strip a trailing reasoning directive from `text`
///
/// Returns the cleaned text and the effective reasoning mode. When no
/// directive is present the trimmed text is returned with `default_reasoning`.
#[must_use]
pub fn parse_directive(text: &str, default_reasoning: bool) -> Directive {
    let trimmed = text.trim();

    for (token, reasoning) in [(DISABLE_TOKEN, false), (ENABLE_TOKEN, true)] {
        if let Some(rest) = trimmed.strip_suffix(token) {
            return Directive {
                text: rest.trim_end().to_string(),
                reasoning,
                explicit: true,
            };
        }
    }

    Directive {
        text: trimmed.to_string(),
        reasoning: default_reasoning,
        explicit: false,
    }
}
