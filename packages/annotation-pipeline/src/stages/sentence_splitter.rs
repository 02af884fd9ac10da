use crate::capability::{set_of, CapabilitySet, SENTENCES, TOKENS};
use crate::config::StageConfigView;
use crate::context::{DocumentContext, Sentence, Token};
use crate::stage::Stage;
use anyhow::anyhow;

/// Sentence Splitter Stage - splits the token stream on boundary tokens
///
/// `ssplit.boundaryTokens` is a whitespace-separated list (default `. ! ?`).
/// Trailing tokens without a boundary form a final sentence.
pub struct SentenceSplitterStage {
    boundaries: Vec<String>,
}

impl SentenceSplitterStage {
    pub fn new() -> Self {
        Self {
            boundaries: vec![".".into(), "!".into(), "?".into()],
        }
    }

    pub fn from_config(view: &StageConfigView<'_>) -> anyhow::Result<Self> {
        let mut stage = Self::new();
        if let Some(list) = view.option("boundaryTokens") {
            stage.boundaries = list.split_whitespace().map(str::to_string).collect();
        }
        Ok(stage)
    }

    pub fn split(&self, tokens: &[Token]) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        let mut begin = 0;
        for (idx, token) in tokens.iter().enumerate() {
            if self.boundaries.iter().any(|b| *b == token.text) {
                sentences.push(Sentence {
                    token_begin: begin,
                    token_end: idx + 1,
                });
                begin = idx + 1;
            }
        }
        if begin < tokens.len() {
            sentences.push(Sentence {
                token_begin: begin,
                token_end: tokens.len(),
            });
        }
        sentences
    }
}

impl Default for SentenceSplitterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for SentenceSplitterStage {
    fn name(&self) -> &str {
        "ssplit"
    }

    fn requires(&self) -> CapabilitySet {
        set_of(&[TOKENS.capability()])
    }

    fn satisfies(&self) -> CapabilitySet {
        set_of(&[SENTENCES.capability()])
    }

    fn run(&self, ctx: &mut DocumentContext) -> anyhow::Result<()> {
        let tokens = ctx.get(TOKENS).ok_or_else(|| anyhow!("no tokens in document"))?;
        let sentences = self.split(tokens);
        ctx.set(SENTENCES, sentences);
        Ok(())
    }
}
