use crate::capability::{set_of, CapabilitySet, TOKENS};
use crate::config::StageConfigView;
use crate::context::{DocumentContext, Token};
use crate::stage::Stage;
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// SAFETY: compile-time constant pattern, known to be valid
static DEFAULT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+(?:[-']\w+)*|[^\w\s]").unwrap());

/// Tokenizer Stage - regex tokenizer with byte offsets
///
/// Options:
/// - `tokenize.pattern`: token regex (default: words with inner hyphens or
///   apostrophes, and single punctuation characters)
/// - `tokenize.lowercase`: lowercase token text (offsets are unchanged)
pub struct TokenizerStage {
    pattern: Regex,
    lowercase: bool,
}

impl TokenizerStage {
    pub fn new() -> Self {
        Self {
            pattern: default_pattern(),
            lowercase: false,
        }
    }

    pub fn from_config(view: &StageConfigView<'_>) -> anyhow::Result<Self> {
        let pattern = match view.option("pattern") {
            Some(p) => Regex::new(p).with_context(|| format!("invalid tokenize.pattern '{}'", p))?,
            None => default_pattern(),
        };
        Ok(Self {
            pattern,
            lowercase: view.option_bool("lowercase", false)?,
        })
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        self.pattern
            .find_iter(text)
            .map(|m| Token {
                text: if self.lowercase {
                    m.as_str().to_lowercase()
                } else {
                    m.as_str().to_string()
                },
                begin: m.start(),
                end: m.end(),
            })
            .collect()
    }
}

impl Default for TokenizerStage {
    fn default() -> Self {
        Self::new()
    }
}

fn default_pattern() -> Regex {
    DEFAULT_PATTERN.clone()
}

impl Stage for TokenizerStage {
    fn name(&self) -> &str {
        "tokenize"
    }

    fn requires(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    fn satisfies(&self) -> CapabilitySet {
        set_of(&[TOKENS.capability()])
    }

    fn run(&self, ctx: &mut DocumentContext) -> anyhow::Result<()> {
        let tokens = self.tokenize(ctx.text());
        debug!("TokenizerStage: {} tokens", tokens.len());
        ctx.set(TOKENS, tokens);
        Ok(())
    }
}
