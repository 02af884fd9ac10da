use crate::cache::StageCache;
use crate::config::PipelineConfig;
use crate::context::DocumentContext;
use crate::engine::{Annotation, AnnotationEngine, EngineStats};
use crate::error::Result;
use crate::output::OutputRegistry;
use crate::pipeline::Pipeline;
use crate::registry::StageRegistry;
use crate::resolver::{DependencyResolver, Resolution};
use std::io::Write;
use tracing::info;

/// Resolve + build + engine behind one constructor
///
/// ```no_run
/// use annotation_pipeline::{AnnotationPipeline, DocumentContext, PipelineConfig, StageCache, StageRegistry};
///
/// let config = PipelineConfig::default().with_stages(&["lemma"]);
/// let cache = StageCache::new();
/// let pipeline = AnnotationPipeline::new(config, &StageRegistry::with_builtins(), &cache)?;
/// let annotation = pipeline.annotate(DocumentContext::new("Cats were sleeping."))?;
/// assert!(annotation.is_success());
/// # Ok::<(), annotation_pipeline::PipelineError>(())
/// ```
pub struct AnnotationPipeline {
    config: PipelineConfig,
    resolution: Resolution,
    engine: AnnotationEngine,
    outputs: OutputRegistry,
}

impl AnnotationPipeline {
    /// Uses the standard dependency rules
    pub fn new(config: PipelineConfig, registry: &StageRegistry, cache: &StageCache) -> Result<Self> {
        Self::with_resolver(config, &DependencyResolver::standard(), registry, cache)
    }

    pub fn with_resolver(
        config: PipelineConfig,
        resolver: &DependencyResolver,
        registry: &StageRegistry,
        cache: &StageCache,
    ) -> Result<Self> {
        let resolution = resolver.resolve(&config.stages, &config)?;
        let config = resolution.apply_to(&config);

        let pipeline = Pipeline::build(
            &config.stages,
            &config,
            registry,
            cache,
            config.enforce_requirements,
        )?;
        let engine = AnnotationEngine::new(pipeline, &config)?;

        info!(
            "Annotation pipeline ready: {} ({} worker(s))",
            resolution.joined(),
            engine.workers()
        );

        Ok(Self {
            config,
            resolution,
            engine,
            outputs: OutputRegistry::with_builtins(),
        })
    }

    /// Replace the output sink table
    pub fn with_outputs(mut self, outputs: OutputRegistry) -> Self {
        self.outputs = outputs;
        self
    }

    /// Effective configuration: resolved stage list plus fallback values
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn stage_names(&self) -> &[String] {
        self.engine.pipeline().stage_names()
    }

    pub fn engine(&self) -> &AnnotationEngine {
        &self.engine
    }

    pub fn annotate(&self, document: DocumentContext) -> Result<Annotation> {
        self.engine.annotate(document)
    }

    pub fn annotate_with<F>(&self, document: DocumentContext, callback: F)
    where
        F: FnOnce(Annotation) + Send + 'static,
    {
        self.engine.annotate_with(document, callback)
    }

    pub async fn annotate_async(&self, document: DocumentContext) -> Result<Annotation> {
        self.engine.annotate_async(document).await
    }

    /// Write with the configured `outputFormat`
    pub fn write_output(&self, document: &DocumentContext, out: &mut dyn Write) -> Result<()> {
        self.outputs.write(&self.config.output_format, document, out)
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn shutdown(&self) {
        self.engine.shutdown()
    }
}
