//! Pipeline configuration
//!
//! The flat property map (`stages=tokenize,ssplit`, `threads=4`,
//! `pos.model=...`) is parsed once into [`PipelineConfig`]. Keys the core
//! understands become typed fields; every other key lands in
//! `properties`, where it is opaque to the core except for stage signatures.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const STAGES_KEY: &str = "stages";
pub const ANNOTATORS_KEY: &str = "annotators";
pub const CUSTOM_STAGE_PREFIX: &str = "customStageClass.";
pub const THREADS_KEY: &str = "threads";
pub const ENFORCE_REQUIREMENTS_KEY: &str = "enforceRequirements";
pub const OUTPUT_FORMAT_KEY: &str = "outputFormat";
pub const QUEUE_CAPACITY_KEY: &str = "queueCapacity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineConfig {
    /// Requested stage names, order is a tie-break hint
    #[serde(alias = "annotators", deserialize_with = "deserialize_stage_list")]
    pub stages: Vec<String>,

    /// Stage name → plugin reference
    pub custom_stages: BTreeMap<String, String>,

    /// Worker count, 1 means inline execution
    #[serde(deserialize_with = "deserialize_threads")]
    pub threads: usize,

    pub enforce_requirements: bool,

    pub output_format: String,

    /// Pending-document backlog for the worker pool
    pub queue_capacity: Option<usize>,

    /// Per-stage options (`<stage>.<option>`) and any other keys
    pub properties: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            custom_stages: BTreeMap::new(),
            threads: 1,
            enforce_requirements: true,
            output_format: "text".to_string(),
            queue_capacity: None,
            properties: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse a flat property map
    pub fn from_properties<I, K, V>(props: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        config.apply_properties(props)?;
        Ok(config)
    }

    /// Layer a flat property map over this configuration. Only the keys
    /// present in `props` change; later pairs win over earlier ones, except
    /// that `stages` wins over `annotators`.
    pub fn apply_properties<I, K, V>(&mut self, props: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut stages_seen = false;

        for (key, value) in props {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();

            match key {
                STAGES_KEY => {
                    self.stages = split_stage_list(value);
                    stages_seen = true;
                }
                // `stages` wins when both are present
                ANNOTATORS_KEY => {
                    if !stages_seen {
                        self.stages = split_stage_list(value);
                    }
                }
                THREADS_KEY => self.threads = parse_threads(value),
                ENFORCE_REQUIREMENTS_KEY => self.enforce_requirements = parse_bool(key, value)?,
                OUTPUT_FORMAT_KEY => self.output_format = value.to_string(),
                QUEUE_CAPACITY_KEY => {
                    let capacity = value.parse::<usize>().map_err(|_| {
                        PipelineError::config(format!("{} must be a positive integer, got '{}'", key, value))
                    })?;
                    self.queue_capacity = Some(capacity.max(1));
                }
                _ => {
                    if let Some(name) = key.strip_prefix(CUSTOM_STAGE_PREFIX) {
                        self.custom_stages.insert(name.to_string(), value.to_string());
                    } else {
                        self.properties.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        Ok(())
    }

    /// Load from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_stages<S: AsRef<str>>(mut self, stages: &[S]) -> Self {
        self.stages = stages.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_enforce_requirements(mut self, enforce: bool) -> Self {
        self.enforce_requirements = enforce;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_custom_stage(mut self, name: impl Into<String>, reference: impl Into<String>) -> Self {
        self.custom_stages.insert(name.into(), reference.into());
        self
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Effective backlog: explicit capacity, else twice the worker count
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.threads.max(1) * 2).max(1)
    }

    /// Properties whose key equals a prefix or starts with `<prefix>.`,
    /// in key order
    pub fn properties_under<'a>(&'a self, prefixes: &'a [String]) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.properties.iter().filter_map(move |(k, v)| {
            let relevant = prefixes.iter().any(|p| {
                k == p || (k.starts_with(p.as_str()) && k[p.len()..].starts_with('.'))
            });
            relevant.then_some((k.as_str(), v.as_str()))
        })
    }

    pub fn view<'a>(&'a self, stage: &'a str) -> StageConfigView<'a> {
        StageConfigView {
            stage,
            config: self,
        }
    }
}

/// Read-only projection of the configuration handed to stage factories
#[derive(Debug, Clone, Copy)]
pub struct StageConfigView<'a> {
    stage: &'a str,
    config: &'a PipelineConfig,
}

impl<'a> StageConfigView<'a> {
    pub fn stage(&self) -> &'a str {
        self.stage
    }

    /// Stage option, i.e. the `<stage>.<option>` property
    pub fn option(&self, option: &str) -> Option<&'a str> {
        self.config
            .properties
            .get(&format!("{}.{}", self.stage, option))
            .map(String::as_str)
    }

    pub fn option_or(&self, option: &str, default: &'a str) -> &'a str {
        self.option(option).unwrap_or(default)
    }

    pub fn option_bool(&self, option: &str, default: bool) -> Result<bool> {
        match self.option(option) {
            Some(v) => parse_bool(&format!("{}.{}", self.stage, option), v),
            None => Ok(default),
        }
    }

    pub fn option_usize(&self, option: &str, default: usize) -> Result<usize> {
        match self.option(option) {
            Some(v) => v.trim().parse().map_err(|_| {
                PipelineError::config(format!(
                    "{}.{} must be an integer, got '{}'",
                    self.stage, option, v
                ))
            }),
            None => Ok(default),
        }
    }

    /// Any property, by full key
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.config.property(key)
    }
}

fn split_stage_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Worker count; malformed or zero values degrade to one worker
pub fn parse_threads(value: &str) -> usize {
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => n,
        _ => {
            warn!("Ignoring invalid {} value '{}', using 1", THREADS_KEY, value);
            1
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(PipelineError::config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StageListRepr {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_stage_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match StageListRepr::deserialize(d)? {
        StageListRepr::List(list) => list.into_iter().flat_map(|s| split_stage_list(&s)).collect(),
        StageListRepr::Joined(joined) => split_stage_list(&joined),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThreadsRepr {
    Number(i64),
    Text(String),
    Other(serde_yaml::Value),
}

fn deserialize_threads<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<usize, D::Error> {
    Ok(match ThreadsRepr::deserialize(d)? {
        ThreadsRepr::Number(n) if n >= 1 => n as usize,
        ThreadsRepr::Number(n) => parse_threads(&n.to_string()),
        ThreadsRepr::Text(s) => parse_threads(&s),
        ThreadsRepr::Other(value) => {
            let shown = serde_yaml::to_string(&value).unwrap_or_default();
            parse_threads(shown.trim_end())
        }
    })
}
