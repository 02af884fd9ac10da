use crate::config::{PipelineConfig, CUSTOM_STAGE_PREFIX};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Cache key for a constructed stage: name + digest of the config keys that
/// affect its construction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageSignature {
    pub name: String,
    pub config_hash: String,
}

impl StageSignature {
    pub fn new(name: impl Into<String>, config_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_hash: config_hash.into(),
        }
    }

    /// Digest every property under `prefixes` (key order), plus the plugin
    /// reference when the stage is a custom one
    pub fn compute(name: &str, prefixes: &[String], config: &PipelineConfig) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in config.properties_under(prefixes) {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        if let Some(reference) = config.custom_stages.get(name) {
            hasher.update(CUSTOM_STAGE_PREFIX.as_bytes());
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(reference.as_bytes());
            hasher.update(b"\n");
        }

        Self::new(name, &format!("{:x}", hasher.finalize())[..32])
    }
}

impl fmt::Display for StageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, &self.config_hash[..self.config_hash.len().min(8)])
    }
}
