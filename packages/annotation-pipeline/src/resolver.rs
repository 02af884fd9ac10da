//! Dependency resolution: requested stage list → ordered execution list
//!
//! 1. validate requested names (rule table or `customStageClass.<name>`)
//! 2. expand prerequisites recursively, failing on cycles
//! 3. apply structural fallbacks and redundancies
//! 4. depth-first post-order emission, walking requested names in request
//!    order so the request breaks ties between independent stages
//!
//! The output is deterministic for identical inputs.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::rules::DependencyRules;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolver output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Dependency-complete execution order, no duplicates
    pub stages: Vec<String>,
    /// Config values recorded by structural fallbacks
    pub overrides: BTreeMap<String, String>,
    /// Stages dropped as redundant
    pub dropped: Vec<String>,
}

impl Resolution {
    /// Comma-joined stage list, e.g. `tokenize,ssplit,pos`
    pub fn joined(&self) -> String {
        self.stages.join(",")
    }

    /// Config with the resolved stage list and fallback values applied
    pub fn apply_to(&self, config: &PipelineConfig) -> PipelineConfig {
        let mut resolved = config.clone();
        resolved.stages = self.stages.clone();
        for (key, value) in &self.overrides {
            resolved.properties.insert(key.clone(), value.clone());
        }
        resolved
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

pub struct DependencyResolver {
    rules: Arc<DependencyRules>,
}

impl DependencyResolver {
    pub fn new(rules: Arc<DependencyRules>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        Self::new(Arc::new(DependencyRules::standard()))
    }

    pub fn rules(&self) -> &DependencyRules {
        &self.rules
    }

    pub fn resolve<S: AsRef<str>>(&self, requested: &[S], config: &PipelineConfig) -> Result<Resolution> {
        let requested: Vec<&str> = requested.iter().map(|s| s.as_ref()).collect();
        let is_known = |name: &str| self.rules.contains(name) || config.custom_stages.contains_key(name);

        for name in &requested {
            if !is_known(name) {
                return Err(PipelineError::UnknownStage(name.to_string()));
            }
        }

        // Step 2: closure over declared prerequisites
        let mut extra_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut present: HashSet<String> = HashSet::new();
        let mut marks: HashMap<String, Mark> = HashMap::new();
        for name in &requested {
            self.expand(name, &extra_edges, &is_known, &mut marks, &mut Vec::new(), &mut present)?;
        }

        // Step 3a: structural fallbacks, to a fixpoint since a fallback can
        // pull in stages that have fallbacks of their own
        let mut overrides = BTreeMap::new();
        let mut applied: HashSet<usize> = HashSet::new();
        loop {
            let mut changed = false;
            for (idx, rule) in self.rules.fallbacks().iter().enumerate() {
                if applied.contains(&idx) || !present.contains(&rule.stage) {
                    continue;
                }
                applied.insert(idx);
                changed = true;

                let target = if present.contains(&rule.preferred) {
                    rule.preferred.clone()
                } else {
                    if config.property(&rule.key).is_none() {
                        info!(
                            "Stage '{}' has no '{}' available, using '{}' ({}={})",
                            rule.stage, rule.preferred, rule.fallback, rule.key, rule.value
                        );
                        overrides.insert(rule.key.clone(), rule.value.clone());
                    }
                    rule.fallback.clone()
                };

                if !is_known(&target) {
                    return Err(PipelineError::UnknownStage(target));
                }
                extra_edges.entry(rule.stage.clone()).or_default().push(target.clone());
                marks.clear();
                self.expand(&rule.stage, &extra_edges, &is_known, &mut marks, &mut Vec::new(), &mut present)?;
            }
            if !changed {
                break;
            }
        }

        // Step 3b: redundancies, redirecting edges to the subsuming stage
        let mut replacements: HashMap<&str, &str> = HashMap::new();
        let mut dropped = Vec::new();
        for rule in self.rules.redundancies() {
            if present.contains(&rule.subsumer) && present.contains(&rule.redundant) {
                info!("Dropping '{}': covered by '{}'", rule.redundant, rule.subsumer);
                replacements.insert(rule.redundant.as_str(), rule.subsumer.as_str());
                dropped.push(rule.redundant.clone());
            }
        }
        let canonical = |name: &str| -> String {
            let mut current = name;
            // replacement chains are short, bound them anyway
            for _ in 0..=replacements.len() {
                match replacements.get(current) {
                    Some(next) => current = *next,
                    None => break,
                }
            }
            current.to_string()
        };

        // Execution graph: declared prerequisites and fallback edges (a
        // dropped stage hands its prerequisites to its subsumer), then
        // ordering constraints between stages that are both present
        let mut nodes: Vec<&String> = present.iter().collect();
        nodes.sort();
        nodes.sort_by_key(|name| canonical(name) != **name);

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for name in nodes {
            let node = canonical(name);
            let declared = self.rules.prerequisites(name).iter();
            let injected = extra_edges.get(name.as_str()).into_iter().flatten();
            let prereqs = edges.entry(node.clone()).or_default();
            for prereq in declared.chain(injected) {
                let prereq = canonical(prereq);
                if prereq != node && !prereqs.contains(&prereq) {
                    prereqs.push(prereq);
                }
            }
        }
        for constraint in self.rules.ordering_constraints() {
            let before = canonical(&constraint.before);
            let after = canonical(&constraint.after);
            if before == after || !edges.contains_key(&before) {
                continue;
            }
            if let Some(prereqs) = edges.get_mut(&after) {
                if !prereqs.contains(&before) {
                    prereqs.push(before);
                }
            }
        }

        // Step 4/5: post-order emission in request order
        let mut stages = Vec::with_capacity(edges.len());
        let mut marks: HashMap<String, Mark> = HashMap::new();
        for name in &requested {
            let node = canonical(name);
            emit(&node, &edges, &mut marks, &mut Vec::new(), &mut stages)?;
        }
        // Fallback targets are reachable from their stage, this only matters
        // for nodes no requested stage reaches
        let mut rest: Vec<&String> = edges.keys().collect();
        rest.sort();
        for node in rest {
            emit(node, &edges, &mut marks, &mut Vec::new(), &mut stages)?;
        }

        let mut seen = HashSet::new();
        stages.retain(|s| seen.insert(s.clone()));

        info!("Resolved stages: {}", stages.join(","));
        Ok(Resolution {
            stages,
            overrides,
            dropped,
        })
    }

    fn expand(
        &self,
        name: &str,
        extra_edges: &HashMap<String, Vec<String>>,
        is_known: &dyn Fn(&str) -> bool,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
        present: &mut HashSet<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(cycle_error(path, name)),
            None => {}
        }
        if !is_known(name) {
            return Err(PipelineError::UnknownStage(name.to_string()));
        }

        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());

        let injected = extra_edges.get(name).into_iter().flatten();
        for prereq in self.rules.prerequisites(name).iter().chain(injected) {
            self.expand(prereq, extra_edges, is_known, marks, path, present)?;
        }

        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        if present.insert(name.to_string()) {
            debug!("Stage '{}' added to pipeline", name);
        }
        Ok(())
    }
}

fn emit(
    node: &str,
    edges: &HashMap<String, Vec<String>>,
    marks: &mut HashMap<String, Mark>,
    path: &mut Vec<String>,
    out: &mut Vec<String>,
) -> Result<()> {
    match marks.get(node) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => return Err(cycle_error(path, node)),
        None => {}
    }

    marks.insert(node.to_string(), Mark::Visiting);
    path.push(node.to_string());
    if let Some(prereqs) = edges.get(node) {
        for prereq in prereqs {
            emit(prereq, edges, marks, path, out)?;
        }
    }
    path.pop();
    marks.insert(node.to_string(), Mark::Done);
    out.push(node.to_string());
    Ok(())
}

/// `a -> b -> a` from the DFS path and the node seen twice
fn cycle_error(path: &[String], repeated: &str) -> PipelineError {
    let start = path.iter().position(|n| n == repeated).unwrap_or(0);
    let mut cycle: Vec<String> = path[start..].to_vec();
    cycle.push(repeated.to_string());
    PipelineError::CircularDependency { cycle }
}
