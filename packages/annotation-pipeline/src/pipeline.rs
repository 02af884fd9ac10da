use crate::cache::{SharedStage, StageCache};
use crate::capability::CapabilitySet;
use crate::config::PipelineConfig;
use crate::context::DocumentContext;
use crate::error::{PipelineError, Result};
use crate::registry::StageRegistry;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, info};

/// An ordered, verified list of stage instances
///
/// Built once per configuration; the requirement check runs here and never
/// per document. Stages are shared, so a `Pipeline` is cheap to clone and
/// can be run from several threads at once.
#[derive(Clone)]
pub struct Pipeline {
    stage_names: Vec<String>,
    stages: Vec<SharedStage>,
    provided: CapabilitySet,
}

impl Pipeline {
    /// Instantiate `names` through the registry and cache, then verify the
    /// requirement chain when `enforce_requirements` is set
    pub fn build<S: AsRef<str>>(
        names: &[S],
        config: &PipelineConfig,
        registry: &StageRegistry,
        cache: &StageCache,
        enforce_requirements: bool,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut stage_names = Vec::with_capacity(names.len());
        let mut stages = Vec::with_capacity(names.len());

        for name in names.iter().map(AsRef::as_ref) {
            if !seen.insert(name) {
                continue;
            }
            stages.push(registry.instantiate(name, config, cache)?);
            stage_names.push(name.to_string());
        }

        Self::assemble(stage_names, stages, enforce_requirements)
    }

    /// Pipeline over caller-supplied stage instances
    ///
    /// The injection seam for substituting a stage (tests, pre-built
    /// models). `names[i]` is the pipeline name of `stages[i]`.
    pub fn from_stages<S: AsRef<str>>(
        names: &[S],
        stages: Vec<SharedStage>,
        enforce_requirements: bool,
    ) -> Result<Self> {
        if names.len() != stages.len() {
            return Err(PipelineError::config(format!(
                "{} stage names for {} stage instances",
                names.len(),
                stages.len()
            )));
        }
        let stage_names = names.iter().map(|n| n.as_ref().to_string()).collect();
        Self::assemble(stage_names, stages, enforce_requirements)
    }

    fn assemble(
        stage_names: Vec<String>,
        stages: Vec<SharedStage>,
        enforce_requirements: bool,
    ) -> Result<Self> {
        let provided = if enforce_requirements {
            verify_requirements(&stage_names, &stages)?
        } else {
            stages.iter().flat_map(|s| s.satisfies()).collect()
        };

        info!(
            "Pipeline ready: [{}] (requirements {})",
            stage_names.join(", "),
            if enforce_requirements { "verified" } else { "not enforced" }
        );

        Ok(Self {
            stage_names,
            stages,
            provided,
        })
    }

    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    pub fn stages(&self) -> &[SharedStage] {
        &self.stages
    }

    /// Every capability some stage in the pipeline satisfies
    pub fn provided(&self) -> &CapabilitySet {
        &self.provided
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order against `ctx`
    ///
    /// Stops at the first failing stage. `interrupted` is polled before each
    /// stage; a raised flag ends the run with [`PipelineError::Interrupted`].
    /// A panicking stage is reported as [`PipelineError::StageExecution`].
    pub fn run(&self, ctx: &mut DocumentContext, interrupted: &dyn Fn() -> bool) -> Result<()> {
        for (name, stage) in self.stage_names.iter().zip(&self.stages) {
            if interrupted() {
                return Err(PipelineError::Interrupted {
                    stage: name.clone(),
                });
            }

            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.run(ctx)));
            match outcome {
                Ok(Ok(())) => {
                    debug!(
                        "Stage '{}' finished on {} in {}ms",
                        name,
                        ctx.id(),
                        started.elapsed().as_millis()
                    );
                }
                Ok(Err(e)) => return Err(PipelineError::execution(name.clone(), e)),
                Err(payload) => {
                    return Err(PipelineError::execution(
                        name.clone(),
                        anyhow::anyhow!("stage panicked: {}", panic_message(payload.as_ref())),
                    ))
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names)
            .field("provided", &self.provided)
            .finish()
    }
}

/// Walk the stages in order with a running set of guaranteed capabilities.
/// Returns the final set, or the first stage with an unmet requirement.
fn verify_requirements(names: &[String], stages: &[SharedStage]) -> Result<CapabilitySet> {
    let mut guaranteed = CapabilitySet::new();
    for (name, stage) in names.iter().zip(stages) {
        if let Some(missing) = stage.requires().difference(&guaranteed).next() {
            return Err(PipelineError::UnsatisfiedRequirement {
                stage: name.clone(),
                capability: missing.to_string(),
            });
        }
        guaranteed.extend(stage.satisfies());
    }
    Ok(guaranteed)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
