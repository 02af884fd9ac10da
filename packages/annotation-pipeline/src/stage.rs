use crate::capability::CapabilitySet;
use crate::context::DocumentContext;

/// A named pipeline unit (pluggable stages)
///
/// Stages are built once, cached by signature and shared across pipelines
/// and worker threads, so `run` takes `&self`. Per-document state lives in
/// the [`DocumentContext`].
pub trait Stage: Send + Sync {
    /// Stage name as used in the `stages` list
    fn name(&self) -> &str;

    /// Capabilities that must already be present before `run`
    fn requires(&self) -> CapabilitySet;

    /// Capabilities guaranteed to be present after a successful `run`
    fn satisfies(&self) -> CapabilitySet;

    /// Annotate the document
    fn run(&self, ctx: &mut DocumentContext) -> anyhow::Result<()>;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("requires", &self.requires())
            .field("satisfies", &self.satisfies())
            .finish()
    }
}
