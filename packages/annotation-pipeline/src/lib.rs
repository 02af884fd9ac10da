/*
 * Annotation Pipeline - text annotation orchestration
 *
 * Turns a requested list of annotation stages into a verified, ordered
 * pipeline and runs documents through it.
 *
 * Architecture:
 * - Dependency resolution (prerequisites, orderings, fallbacks, redundancies)
 * - Process-wide stage cache keyed by stage signature
 * - Static requirement check at pipeline build time
 * - Execution engine (inline or worker pool, callback per document)
 * - Pluggable stages and output sinks
 */

// Public modules
pub mod annotator;
pub mod cache;
pub mod capability;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod rules;
pub mod signature;
pub mod stage;
pub mod stages;

// Re-exports
pub use annotator::AnnotationPipeline;
pub use cache::{CacheStats, SharedStage, StageCache};
pub use capability::{Capability, CapabilityKey, CapabilitySet};
pub use config::{PipelineConfig, StageConfigView};
pub use context::{DocumentContext, Sentence, Token};
pub use engine::{Annotation, AnnotationEngine, Callback, DocumentState, EngineStats};
pub use error::{ErrorPhase, PipelineError, Result};
pub use output::{JsonSink, OutputRegistry, OutputSink, TextSink};
pub use pipeline::Pipeline;
pub use registry::{StageFactory, StageRegistry};
pub use resolver::{DependencyResolver, Resolution};
pub use rules::{DependencyRules, OrderingConstraint, Redundancy, StructuralFallback};
pub use signature::StageSignature;
pub use stage::Stage;
pub use stages::{LemmatizerStage, PosTaggerStage, SentenceSplitterStage, TokenizerStage};
