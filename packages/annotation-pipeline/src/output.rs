use crate::capability::{LEMMA, POS, SENTENCES, TOKENS};
use crate::context::DocumentContext;
use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

/// Serializes an annotated document to a stream
pub trait OutputSink: Send + Sync {
    fn write(&self, document: &DocumentContext, out: &mut dyn Write) -> anyhow::Result<()>;
}

impl<F> OutputSink for F
where
    F: Fn(&DocumentContext, &mut dyn Write) -> anyhow::Result<()> + Send + Sync,
{
    fn write(&self, document: &DocumentContext, out: &mut dyn Write) -> anyhow::Result<()> {
        self(document, out)
    }
}

/// Human-readable dump: one line per present capability, then the error
pub struct TextSink;

impl OutputSink for TextSink {
    fn write(&self, document: &DocumentContext, out: &mut dyn Write) -> anyhow::Result<()> {
        writeln!(out, "Document {}: {}", document.id(), document.text())?;

        for capability in document.capabilities() {
            let line = if capability == TOKENS.capability() {
                document
                    .get(TOKENS)
                    .map(|tokens| join(tokens.iter().map(|t| t.text.as_str())))
            } else if capability == SENTENCES.capability() {
                document
                    .get(SENTENCES)
                    .map(|sentences| format!("{} sentence(s)", sentences.len()))
            } else if capability == POS.capability() {
                document.get(POS).map(|tags| join(tags.iter().map(String::as_str)))
            } else if capability == LEMMA.capability() {
                document
                    .get(LEMMA)
                    .map(|lemmas| join(lemmas.iter().map(String::as_str)))
            } else {
                None
            };
            writeln!(
                out,
                "  {}: {}",
                capability,
                line.unwrap_or_else(|| "present".to_string())
            )?;
        }

        if let Some(e) = document.last_error() {
            writeln!(out, "  error: {}", e)?;
        }
        Ok(())
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(" ")
}

#[derive(Serialize)]
struct DocumentSummary<'a> {
    id: Uuid,
    text: &'a str,
    capabilities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentences: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lemma: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// One JSON object per document, newline-terminated
pub struct JsonSink {
    pub pretty: bool,
}

impl OutputSink for JsonSink {
    fn write(&self, document: &DocumentContext, out: &mut dyn Write) -> anyhow::Result<()> {
        let summary = DocumentSummary {
            id: document.id(),
            text: document.text(),
            capabilities: document.capabilities().iter().map(|c| c.name()).collect(),
            tokens: document
                .get(TOKENS)
                .map(|tokens| tokens.iter().map(|t| t.text.as_str()).collect()),
            sentences: document.get(SENTENCES).map(Vec::len),
            pos: document.get(POS).map(Vec::as_slice),
            lemma: document.get(LEMMA).map(Vec::as_slice),
            error: document.last_error().map(|e| e.to_string()),
        };

        if self.pretty {
            serde_json::to_writer_pretty(&mut *out, &summary)?;
        } else {
            serde_json::to_writer(&mut *out, &summary)?;
        }
        writeln!(out)?;
        Ok(())
    }
}

/// Format name → sink
#[derive(Clone, Default)]
pub struct OutputRegistry {
    sinks: HashMap<String, Arc<dyn OutputSink>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `text`, `json` and `json-pretty`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("text", TextSink)
            .register("json", JsonSink { pretty: false })
            .register("json-pretty", JsonSink { pretty: true });
        registry
    }

    pub fn register<S: OutputSink + 'static>(&mut self, format: &str, sink: S) -> &mut Self {
        self.sinks.insert(format.to_string(), Arc::new(sink));
        self
    }

    pub fn get(&self, format: &str) -> Result<Arc<dyn OutputSink>> {
        self.sinks
            .get(format)
            .cloned()
            .ok_or_else(|| PipelineError::OutputFormat(format!("unknown output format '{}'", format)))
    }

    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<_> = self.sinks.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }

    /// Write `document` with the sink named `format`
    pub fn write(&self, format: &str, document: &DocumentContext, out: &mut dyn Write) -> Result<()> {
        let sink = self.get(format)?;
        sink.write(document, out).map_err(|e| {
            PipelineError::OutputFormat(format!("'{}' sink failed: {:#}", format, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NER;
    use crate::context::Token;
    use std::io;

    fn annotated() -> DocumentContext {
        let mut doc = DocumentContext::new("Hi there");
        doc.set(
            TOKENS,
            vec![
                Token {
                    text: "Hi".into(),
                    begin: 0,
                    end: 2,
                },
                Token {
                    text: "there".into(),
                    begin: 3,
                    end: 8,
                },
            ],
        );
        doc.set(POS, vec!["UH".to_string(), "RB".to_string()]);
        doc.mark(NER);
        doc
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_text_sink_lists_capabilities() {
        let registry = OutputRegistry::with_builtins();
        let mut out = Vec::new();
        registry.write("text", &annotated(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  ner: present"));
        assert!(text.contains("  pos: UH RB"));
        assert!(text.contains("  tokens: Hi there"));
    }

    #[test]
    fn test_json_sink_summary() {
        let mut doc = annotated();
        doc.record_error(PipelineError::Interrupted {
            stage: "lemma".into(),
        });

        let mut out = Vec::new();
        OutputRegistry::with_builtins()
            .write("json", &doc, &mut out)
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["text"], "Hi there");
        assert_eq!(value["tokens"], serde_json::json!(["Hi", "there"]));
        assert_eq!(value["capabilities"], serde_json::json!(["ner", "pos", "tokens"]));
        assert!(value.get("lemma").is_none());
        assert!(value["error"].as_str().unwrap().contains("lemma"));
    }

    #[test]
    fn test_unknown_format() {
        let err = OutputRegistry::with_builtins()
            .write("xml", &annotated(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::OutputFormat(ref m) if m.contains("xml")));
    }

    #[test]
    fn test_sink_failure_is_reported() {
        let err = OutputRegistry::with_builtins()
            .write("text", &annotated(), &mut BrokenPipe)
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_json_sink_failure_is_an_output_error() {
        let err = OutputRegistry::with_builtins()
            .write("json", &annotated(), &mut BrokenPipe)
            .unwrap_err();
        assert!(matches!(err, PipelineError::OutputFormat(ref m) if m.contains("'json' sink failed")));
        assert_eq!(err.phase(), crate::error::ErrorPhase::Output);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_closure_sink() {
        let mut registry = OutputRegistry::new();
        registry.register("count", |doc: &DocumentContext, out: &mut dyn Write| -> anyhow::Result<()> {
            writeln!(out, "{}", doc.capabilities().len())?;
            Ok(())
        });

        let mut out = Vec::new();
        registry.write("count", &annotated(), &mut out).unwrap();
        assert_eq!(out, b"3\n");
        assert_eq!(registry.formats(), vec!["count"]);
    }
}
