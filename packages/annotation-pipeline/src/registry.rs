use crate::cache::{SharedStage, StageCache};
use crate::config::{PipelineConfig, StageConfigView};
use crate::error::{PipelineError, Result};
use crate::signature::StageSignature;
use crate::stages::{LemmatizerStage, PosTaggerStage, SentenceSplitterStage, TokenizerStage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a stage from its configuration view
pub type StageFactory =
    Arc<dyn Fn(&StageConfigView<'_>) -> anyhow::Result<SharedStage> + Send + Sync>;

#[derive(Clone)]
struct StageSpec {
    factory: StageFactory,
    /// Config key prefixes digested into the stage signature
    signature_prefixes: Vec<String>,
}

/// Stage name → factory, plus the plugin table behind
/// `customStageClass.<name>=<reference>`
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, StageSpec>,
    plugins: HashMap<String, StageSpec>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference stages
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_with_keys("tokenize", &["tokenize", "language"], |view| {
                Ok(Arc::new(TokenizerStage::from_config(view)?) as SharedStage)
            })
            .register("ssplit", |view| {
                Ok(Arc::new(SentenceSplitterStage::from_config(view)?) as SharedStage)
            })
            .register("pos", |view| {
                Ok(Arc::new(PosTaggerStage::from_config(view)?) as SharedStage)
            })
            .register("lemma", |view| {
                Ok(Arc::new(LemmatizerStage::from_config(view)?) as SharedStage)
            });
        registry
    }

    /// Register a stage keyed on its own `<name>.*` options
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(&StageConfigView<'_>) -> anyhow::Result<SharedStage> + Send + Sync + 'static,
    {
        self.register_with_keys(name, &[name], factory)
    }

    /// Register a stage whose signature also covers other key prefixes
    pub fn register_with_keys<F>(&mut self, name: &str, prefixes: &[&str], factory: F) -> &mut Self
    where
        F: Fn(&StageConfigView<'_>) -> anyhow::Result<SharedStage> + Send + Sync + 'static,
    {
        self.stages.insert(name.to_string(), StageSpec::new(prefixes, factory));
        self
    }

    /// Register an implementation that `customStageClass.<name>` can refer to
    pub fn register_plugin<F>(&mut self, reference: &str, factory: F) -> &mut Self
    where
        F: Fn(&StageConfigView<'_>) -> anyhow::Result<SharedStage> + Send + Sync + 'static,
    {
        self.plugins
            .insert(reference.to_string(), StageSpec::new(&[], factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    fn spec_for(&self, name: &str, config: &PipelineConfig) -> Result<&StageSpec> {
        if let Some(reference) = config.custom_stages.get(name) {
            return self.plugins.get(reference).ok_or_else(|| {
                PipelineError::construction(
                    name,
                    format!("unresolvable stage reference '{}'", reference),
                )
            });
        }
        self.stages
            .get(name)
            .ok_or_else(|| PipelineError::construction(name, "no factory registered"))
    }

    /// Signature of `name` under `config`; plugin stages always include
    /// their own `<name>.*` options
    pub fn signature(&self, name: &str, config: &PipelineConfig) -> Result<StageSignature> {
        let spec = self.spec_for(name, config)?;
        let mut prefixes = spec.signature_prefixes.clone();
        if !prefixes.iter().any(|p| p == name) {
            prefixes.insert(0, name.to_string());
        }
        Ok(StageSignature::compute(name, &prefixes, config))
    }

    /// Resolve `name` to a stage instance through the cache
    pub fn instantiate(
        &self,
        name: &str,
        config: &PipelineConfig,
        cache: &StageCache,
    ) -> Result<SharedStage> {
        let spec = self.spec_for(name, config)?;
        let signature = self.signature(name, config)?;
        debug!("Resolving stage '{}' as {}", name, signature);

        cache.get(&signature, || {
            (spec.factory)(&config.view(name))
                .map_err(|e| PipelineError::construction(name, format!("{:#}", e)))
        })
    }
}

impl StageSpec {
    fn new<F>(prefixes: &[&str], factory: F) -> Self
    where
        F: Fn(&StageConfigView<'_>) -> anyhow::Result<SharedStage> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            signature_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilitySet, TOKENS};
    use crate::context::DocumentContext;
    use crate::stage::Stage;

    struct EchoStage {
        label: String,
    }

    impl Stage for EchoStage {
        fn name(&self) -> &str {
            &self.label
        }

        fn requires(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        fn satisfies(&self) -> CapabilitySet {
            CapabilitySet::new()
        }

        fn run(&self, _ctx: &mut DocumentContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn echo_registry() -> StageRegistry {
        let mut registry = StageRegistry::with_builtins();
        registry.register_plugin("echo", |view| {
            Ok(Arc::new(EchoStage {
                label: view.option_or("label", "echo").to_string(),
            }) as SharedStage)
        });
        registry
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StageRegistry::with_builtins();
        for name in ["tokenize", "ssplit", "pos", "lemma"] {
            assert!(registry.contains(name), "{}", name);
        }
        assert!(!registry.contains("parse"));
    }

    #[test]
    fn test_instantiate_builtin_through_cache() {
        let registry = StageRegistry::with_builtins();
        let cache = StageCache::new();
        let config = PipelineConfig::default();

        let a = registry.instantiate("tokenize", &config, &cache).unwrap();
        let b = registry.instantiate("tokenize", &config, &cache).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.satisfies().contains(&TOKENS.capability()));
    }

    #[test]
    fn test_tokenizer_signature_covers_language() {
        let registry = StageRegistry::with_builtins();
        let en = PipelineConfig::default().with_property("language", "en");
        let de = PipelineConfig::default().with_property("language", "de");

        assert_ne!(
            registry.signature("tokenize", &en).unwrap(),
            registry.signature("tokenize", &de).unwrap()
        );
        assert_eq!(
            registry.signature("pos", &en).unwrap(),
            registry.signature("pos", &de).unwrap()
        );
    }

    #[test]
    fn test_missing_factory_is_construction_error() {
        let registry = StageRegistry::with_builtins();
        let err = registry
            .instantiate("parse", &PipelineConfig::default(), &StageCache::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageConstruction { ref stage, .. } if stage == "parse"));
    }

    #[test]
    fn test_custom_stage_via_plugin_reference() {
        let registry = echo_registry();
        let cache = StageCache::new();
        let config = PipelineConfig::default()
            .with_custom_stage("shout", "echo")
            .with_property("shout.label", "loud");

        let stage = registry.instantiate("shout", &config, &cache).unwrap();
        assert_eq!(stage.name(), "loud");

        let changed = config.clone().with_property("shout.label", "quiet");
        let other = registry.instantiate("shout", &changed, &cache).unwrap();
        assert!(!Arc::ptr_eq(&stage, &other));
    }

    #[test]
    fn test_unresolvable_reference_names_reference() {
        let registry = echo_registry();
        let config = PipelineConfig::default().with_custom_stage("shout", "com.example.Missing");

        let err = registry
            .instantiate("shout", &config, &StageCache::new())
            .unwrap_err();
        assert!(err.to_string().contains("com.example.Missing"));
        assert!(matches!(err, PipelineError::StageConstruction { .. }));
    }

    #[test]
    fn test_factory_error_becomes_construction_error() {
        let mut registry = StageRegistry::new();
        registry.register("broken", |_| Err(anyhow::anyhow!("model file not found")));

        let err = registry
            .instantiate("broken", &PipelineConfig::default(), &StageCache::new())
            .unwrap_err();
        assert!(err.to_string().contains("model file not found"));
    }
}
