use crate::capability::{set_of, CapabilitySet, POS, SENTENCES, TOKENS};
use crate::config::StageConfigView;
use crate::context::{DocumentContext, Token};
use crate::stage::Stage;
use anyhow::anyhow;
use std::collections::HashMap;

/// Part-of-speech Stage - closed-class lexicon plus suffix heuristics
///
/// Small enough to run anywhere, good enough to drive the stages that need
/// tags. `pos.defaultTag` sets the open-class fallback (default `NN`).
pub struct PosTaggerStage {
    lexicon: HashMap<&'static str, &'static str>,
    default_tag: String,
}

const CLOSED_CLASS: &[(&str, &str)] = &[
    ("a", "DT"),
    ("an", "DT"),
    ("the", "DT"),
    ("this", "DT"),
    ("that", "DT"),
    ("and", "CC"),
    ("or", "CC"),
    ("but", "CC"),
    ("of", "IN"),
    ("in", "IN"),
    ("on", "IN"),
    ("at", "IN"),
    ("with", "IN"),
    ("from", "IN"),
    ("to", "TO"),
    ("i", "PRP"),
    ("you", "PRP"),
    ("he", "PRP"),
    ("she", "PRP"),
    ("it", "PRP"),
    ("we", "PRP"),
    ("they", "PRP"),
    ("is", "VBZ"),
    ("has", "VBZ"),
    ("does", "VBZ"),
    ("are", "VBP"),
    ("was", "VBD"),
    ("were", "VBD"),
    ("had", "VBD"),
    ("did", "VBD"),
    ("went", "VBD"),
    ("be", "VB"),
    ("not", "RB"),
];

impl PosTaggerStage {
    pub fn new() -> Self {
        Self {
            lexicon: CLOSED_CLASS.iter().copied().collect(),
            default_tag: "NN".to_string(),
        }
    }

    pub fn from_config(view: &StageConfigView<'_>) -> anyhow::Result<Self> {
        let mut stage = Self::new();
        if let Some(tag) = view.option("defaultTag") {
            stage.default_tag = tag.to_string();
        }
        Ok(stage)
    }

    fn tag(&self, token: &Token, sentence_initial: bool) -> String {
        let word = token.text.as_str();
        let lower = word.to_lowercase();

        if let Some(tag) = self.lexicon.get(lower.as_str()) {
            return tag.to_string();
        }
        if word.chars().all(|c| !c.is_alphanumeric()) {
            return ".".to_string();
        }
        if word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
            return "CD".to_string();
        }
        if !sentence_initial && word.chars().next().is_some_and(char::is_uppercase) {
            return "NNP".to_string();
        }

        let tag = if lower.ends_with("ing") {
            "VBG"
        } else if lower.ends_with("ed") {
            "VBD"
        } else if lower.ends_with("ly") {
            "RB"
        } else if lower.ends_with('s') && !lower.ends_with("ss") && lower.len() > 3 {
            "NNS"
        } else {
            return self.default_tag.clone();
        };
        tag.to_string()
    }
}

impl Default for PosTaggerStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for PosTaggerStage {
    fn name(&self) -> &str {
        "pos"
    }

    fn requires(&self) -> CapabilitySet {
        set_of(&[TOKENS.capability(), SENTENCES.capability()])
    }

    fn satisfies(&self) -> CapabilitySet {
        set_of(&[POS.capability()])
    }

    fn run(&self, ctx: &mut DocumentContext) -> anyhow::Result<()> {
        let tokens = ctx.get(TOKENS).ok_or_else(|| anyhow!("no tokens in document"))?;
        let sentences = ctx
            .get(SENTENCES)
            .ok_or_else(|| anyhow!("no sentences in document"))?;

        let mut tags = vec![self.default_tag.clone(); tokens.len()];
        for sentence in sentences {
            let range = sentence.token_begin..sentence.token_end.min(tokens.len());
            for idx in range {
                tags[idx] = self.tag(&tokens[idx], idx == sentence.token_begin);
            }
        }

        ctx.set(POS, tags);
        Ok(())
    }
}
