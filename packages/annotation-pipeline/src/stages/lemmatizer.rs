use crate::capability::{set_of, CapabilitySet, LEMMA, POS, SENTENCES, TOKENS};
use crate::config::StageConfigView;
use crate::context::DocumentContext;
use crate::stage::Stage;
use anyhow::{anyhow, bail};

/// Lemmatizer Stage - irregular forms plus tag-driven suffix stripping
pub struct LemmatizerStage {
    lowercase: bool,
}

const IRREGULAR: &[(&str, &str)] = &[
    ("is", "be"),
    ("are", "be"),
    ("was", "be"),
    ("were", "be"),
    ("am", "be"),
    ("has", "have"),
    ("had", "have"),
    ("does", "do"),
    ("did", "do"),
    ("went", "go"),
    ("children", "child"),
    ("men", "man"),
    ("women", "woman"),
    ("mice", "mouse"),
];

impl LemmatizerStage {
    pub fn new() -> Self {
        Self { lowercase: true }
    }

    /// `lemma.lowercase` (default true)
    pub fn from_config(view: &StageConfigView<'_>) -> anyhow::Result<Self> {
        Ok(Self {
            lowercase: view.option_bool("lowercase", true)?,
        })
    }

    pub fn lemma(&self, word: &str, tag: &str) -> String {
        let lower = word.to_lowercase();
        if let Some((_, lemma)) = IRREGULAR.iter().find(|(form, _)| *form == lower) {
            return lemma.to_string();
        }

        let base = if self.lowercase { lower.as_str() } else { word };
        if tag == "NNS" {
            if let Some(stem) = base.strip_suffix("ies").filter(|s| s.len() > 1) {
                return format!("{}y", stem);
            }
        }
        let stripped = match tag {
            "NNS" => strip_plural(base),
            "VBG" => base.strip_suffix("ing").filter(|s| s.len() > 1),
            "VBD" | "VBN" => base.strip_suffix("ed").filter(|s| s.len() > 1),
            "VBZ" => base.strip_suffix('s'),
            _ => None,
        };
        stripped.unwrap_or(base).to_string()
    }
}

fn strip_plural(word: &str) -> Option<&str> {
    word.strip_suffix("es")
        .filter(|stem| stem.ends_with("sh") || stem.ends_with("ch") || stem.ends_with('x'))
        .or_else(|| word.strip_suffix('s'))
}

impl Default for LemmatizerStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for LemmatizerStage {
    fn name(&self) -> &str {
        "lemma"
    }

    fn requires(&self) -> CapabilitySet {
        set_of(&[
            TOKENS.capability(),
            SENTENCES.capability(),
            POS.capability(),
        ])
    }

    fn satisfies(&self) -> CapabilitySet {
        set_of(&[LEMMA.capability()])
    }

    fn run(&self, ctx: &mut DocumentContext) -> anyhow::Result<()> {
        let tokens = ctx.get(TOKENS).ok_or_else(|| anyhow!("no tokens in document"))?;
        let tags = ctx.get(POS).ok_or_else(|| anyhow!("no part-of-speech tags in document"))?;
        if tags.len() != tokens.len() {
            bail!("{} tags for {} tokens", tags.len(), tokens.len());
        }

        let lemmas: Vec<String> = tokens
            .iter()
            .zip(tags)
            .map(|(token, tag)| self.lemma(&token.text, tag))
            .collect();
        ctx.set(LEMMA, lemmas);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irregular_forms() {
        let stage = LemmatizerStage::new();
        assert_eq!(stage.lemma("Was", "VBD"), "be");
        assert_eq!(stage.lemma("children", "NNS"), "child");
    }

    #[test]
    fn test_suffix_stripping_by_tag() {
        let stage = LemmatizerStage::new();
        assert_eq!(stage.lemma("Cats", "NNS"), "cat");
        assert_eq!(stage.lemma("boxes", "NNS"), "box");
        assert_eq!(stage.lemma("studies", "NNS"), "study");
        assert_eq!(stage.lemma("walking", "VBG"), "walk");
        assert_eq!(stage.lemma("jumped", "VBD"), "jump");
        assert_eq!(stage.lemma("glass", "NN"), "glass");
    }

    #[test]
    fn test_mismatched_tag_count_fails() {
        let mut ctx = DocumentContext::new("one two");
        ctx.set(
            TOKENS,
            vec![crate::context::Token {
                text: "one".into(),
                begin: 0,
                end: 3,
            }],
        );
        ctx.set(POS, vec!["CD".to_string(), "CD".to_string()]);
        let err = LemmatizerStage::new().run(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("2 tags for 1 tokens"));
    }
}
