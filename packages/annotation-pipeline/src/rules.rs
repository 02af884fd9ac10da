//! Dependency rule table
//!
//! Per-stage default prerequisites plus the rules that cannot be written as
//! plain prerequisite edges:
//! - ordering constraints (`before` runs ahead of `after` when both are present)
//! - redundancies (a subsuming stage makes another one unnecessary)
//! - structural fallbacks (use a cheaper prerequisite and record a config
//!   value when the preferred one is not part of the pipeline)
//!
//! The table is read-only once built and is shared behind an `Arc`.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingConstraint {
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redundancy {
    /// Stage whose output covers `redundant`
    pub subsumer: String,
    pub redundant: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralFallback {
    pub stage: String,
    pub preferred: String,
    pub fallback: String,
    /// Config value recorded when the fallback is taken
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyRules {
    prerequisites: HashMap<String, Vec<String>>,
    ordering: Vec<OrderingConstraint>,
    redundancies: Vec<Redundancy>,
    fallbacks: Vec<StructuralFallback>,
}

impl DependencyRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard annotation stages
    pub fn standard() -> Self {
        Self::new()
            .with_stage("tokenize", &[])
            .with_stage("cleanxml", &["tokenize"])
            .with_stage("ssplit", &["tokenize"])
            .with_stage("pos", &["tokenize", "ssplit"])
            .with_stage("lemma", &["tokenize", "ssplit", "pos"])
            .with_stage("ner", &["tokenize", "ssplit", "pos", "lemma"])
            .with_stage("regexner", &["tokenize", "ssplit"])
            .with_stage("entitymentions", &["tokenize", "ssplit", "pos", "lemma", "ner"])
            .with_stage("truecase", &["tokenize", "ssplit", "pos", "lemma"])
            .with_stage("parse", &["tokenize", "ssplit"])
            .with_stage("depparse", &["tokenize", "ssplit", "pos"])
            .with_stage("sentiment", &["tokenize", "ssplit", "pos", "parse"])
            .with_stage("natlog", &["tokenize", "ssplit", "pos", "lemma", "depparse"])
            .with_stage(
                "openie",
                &["tokenize", "ssplit", "pos", "lemma", "depparse", "natlog"],
            )
            .with_stage("quote", &["tokenize", "ssplit"])
            .with_stage("coref", &["tokenize", "ssplit", "pos", "lemma", "ner"])
            .with_stage("kbp", &["tokenize", "ssplit", "pos", "lemma", "ner", "coref"])
            .with_ordering("cleanxml", "ssplit")
            .with_ordering("ner", "regexner")
            .with_ordering("ner", "entitymentions")
            .with_ordering("regexner", "entitymentions")
            .with_redundancy("parse", "depparse")
            .with_fallback("coref", "parse", "depparse", "coref.md.type", "dep")
    }

    pub fn with_stage(mut self, name: &str, prerequisites: &[&str]) -> Self {
        self.prerequisites.insert(
            name.to_string(),
            prerequisites.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_ordering(mut self, before: &str, after: &str) -> Self {
        self.ordering.push(OrderingConstraint {
            before: before.to_string(),
            after: after.to_string(),
        });
        self
    }

    pub fn with_redundancy(mut self, subsumer: &str, redundant: &str) -> Self {
        self.redundancies.push(Redundancy {
            subsumer: subsumer.to_string(),
            redundant: redundant.to_string(),
        });
        self
    }

    pub fn with_fallback(
        mut self,
        stage: &str,
        preferred: &str,
        fallback: &str,
        key: &str,
        value: &str,
    ) -> Self {
        self.fallbacks.push(StructuralFallback {
            stage: stage.to_string(),
            preferred: preferred.to_string(),
            fallback: fallback.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prerequisites.contains_key(name)
    }

    /// Declared prerequisites; empty for stages not in the table
    pub fn prerequisites(&self, name: &str) -> &[String] {
        self.prerequisites
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn ordering_constraints(&self) -> &[OrderingConstraint] {
        &self.ordering
    }

    pub fn redundancies(&self) -> &[Redundancy] {
        &self.redundancies
    }

    pub fn fallbacks(&self) -> &[StructuralFallback] {
        &self.fallbacks
    }

    /// Known stage names, sorted
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.prerequisites.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
