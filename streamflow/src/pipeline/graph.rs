//! A pipeline's stage graph.

use std::collections::{HashMap, HashSet};

use super::PipelineStage;
use crate::core::StageType;
use crate::errors::{
    ContractErrorInfo, PipelineValidationError, Result, StreamflowError,
};

/// Stages of one pipeline in declaration order.
///
/// The graph is cheap to clone; the executor walks an immutable copy while
/// `add_stage` builds the next version.
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    stages: Vec<PipelineStage>,
    index: HashMap<String, usize>,
}

impl StageGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage, chaining it after every stage still in auto mode.
    ///
    /// A stage in auto mode with no downstream links, and not a sink, gains a
    /// link to the new stage.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the id is already used.
    pub fn add(&mut self, stage: PipelineStage) -> std::result::Result<(), PipelineValidationError> {
        if self.index.contains_key(&stage.id) {
            return Err(PipelineValidationError::new(format!(
                "Stage id '{}' is already used in this pipeline",
                stage.id
            ))
            .with_stages(vec![stage.id.clone()])
            .with_error_info(
                ContractErrorInfo::new("STAGE-DUPLICATE", "Duplicate stage id")
                    .with_fix_hint("Give every stage in a pipeline a unique id"),
            ));
        }

        for existing in &mut self.stages {
            if existing.auto_chain
                && existing.next_stage_ids.is_empty()
                && existing.stage_type != StageType::Sink
            {
                existing.next_stage_ids.push(stage.id.clone());
            }
        }

        self.index.insert(stage.id.clone(), self.stages.len());
        self.stages.push(stage);
        Ok(())
    }

    /// Looks up a stage.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PipelineStage> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// All stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Entry stages: those typed `source`, or the first stage if none is.
    #[must_use]
    pub fn sources(&self) -> Vec<&PipelineStage> {
        let marked: Vec<&PipelineStage> = self
            .stages
            .iter()
            .filter(|s| s.stage_type == StageType::Source)
            .collect();
        if marked.is_empty() {
            self.stages.first().into_iter().collect()
        } else {
            marked
        }
    }

    /// Checks that the graph can be executed.
    ///
    /// # Errors
    ///
    /// - `Validation` if the graph is empty
    /// - `StageNotFound` if a downstream or error-handler id is unknown
    /// - `CycleDetected` if following links can revisit a stage
    pub fn validate(&self, pipeline_id: &str) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{pipeline_id}' has no stages"
            ))
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-EMPTY", "Pipeline has no stages")
                    .with_fix_hint("Add at least one stage before starting"),
            )
            .into());
        }

        for stage in &self.stages {
            for target in edges(stage) {
                if !self.index.contains_key(target) {
                    return Err(StreamflowError::stage_not_found(pipeline_id, target));
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(crate::errors::CycleDetectedError::new(cycle).into());
        }
        Ok(())
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for stage in &self.stages {
            if !visited.contains(&stage.id) {
                if let Some(cycle) = self.dfs_cycle(&stage.id, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(stage) = self.get(node) {
            for next in edges(stage) {
                if !visited.contains(next) {
                    if let Some(cycle) = self.dfs_cycle(next, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(next) {
                    let start = path.iter().position(|n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

/// Downstream and error-handler links leaving `stage`.
fn edges(stage: &PipelineStage) -> impl Iterator<Item = &String> {
    stage
        .next_stage_ids
        .iter()
        .chain(stage.config.error_stage_id.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StageConfig, StageDefinition};
    use crate::processors::PassthroughProcessor;
    use std::sync::Arc;

    fn stage(def: StageDefinition) -> PipelineStage {
        let id = def.id.clone().unwrap_or_else(|| def.name.clone());
        PipelineStage::new(id, def, "passthrough".to_string(), Arc::new(PassthroughProcessor))
    }

    fn def(id: &str) -> StageDefinition {
        StageDefinition::new(id, "passthrough").with_id(id)
    }

    #[test]
    fn test_auto_chaining_builds_linear_graph() {
        let mut graph = StageGraph::new();
        graph.add(stage(def("a"))).unwrap();
        graph.add(stage(def("b"))).unwrap();
        graph.add(stage(def("c"))).unwrap();

        assert_eq!(graph.get("a").unwrap().next_stage_ids, vec!["b"]);
        assert_eq!(graph.get("b").unwrap().next_stage_ids, vec!["c"]);
        assert!(graph.get("c").unwrap().next_stage_ids.is_empty());
        assert!(graph.validate("p1").is_ok());
    }

    #[test]
    fn test_explicit_links_are_not_extended() {
        let mut graph = StageGraph::new();
        graph.add(stage(def("a").leaf())).unwrap();
        graph.add(stage(def("sink").with_type(StageType::Sink))).unwrap();
        graph.add(stage(def("c"))).unwrap();

        assert!(graph.get("a").unwrap().next_stage_ids.is_empty());
        assert!(graph.get("sink").unwrap().next_stage_ids.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut graph = StageGraph::new();
        graph.add(stage(def("a"))).unwrap();
        let err = graph.add(stage(def("a"))).unwrap_err();
        assert_eq!(err.stages, vec!["a"]);
    }

    #[test]
    fn test_sources_default_to_first_stage() {
        let mut graph = StageGraph::new();
        graph.add(stage(def("a"))).unwrap();
        graph.add(stage(def("b"))).unwrap();
        assert_eq!(graph.sources()[0].id, "a");

        graph.add(stage(def("c").with_type(StageType::Source))).unwrap();
        let ids: Vec<&str> = graph.sources().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn test_unknown_link_rejected() {
        let mut graph = StageGraph::new();
        graph.add(stage(def("a").with_next(["ghost"]))).unwrap();
        let err = graph.validate("p1").unwrap_err();
        assert!(matches!(err, StreamflowError::StageNotFound { stage_id, .. } if stage_id == "ghost"));
    }

    #[test]
    fn test_unknown_error_stage_rejected() {
        let mut graph = StageGraph::new();
        graph
            .add(stage(def("a").with_config(StageConfig::new().with_error_stage("dlq"))))
            .unwrap();
        assert!(graph.validate("p1").is_err());
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = StageGraph::new();
        graph.add(stage(def("a").with_next(["b"]))).unwrap();
        graph.add(stage(def("b").with_next(["a"]))).unwrap();

        let err = graph.validate("p1").unwrap_err();
        let StreamflowError::CycleDetected(cycle) = err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(cycle.cycle_path, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_empty_graph_rejected() {
        let graph = StageGraph::new();
        assert!(matches!(graph.validate("p1"), Err(StreamflowError::Validation(_))));
    }
}
