//! # Stage Graph
//!
//! Stages declare the stages they depend on; the graph validates the
//! declarations and fixes the evaluation order once, up front. Today the
//! graph is a chain that fans out into the three sub-components at the end,
//! but nothing in the sequencer assumes a chain.
//!
//! Order is Kahn's algorithm with declaration order breaking ties, so a
//! chain declared in order evaluates in exactly that order.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::error::ReconcileError;
use crate::models::ConditionType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageGraphError {
    #[error("stage {0} declared twice")]
    DuplicateStage(ConditionType),
    #[error("stage {stage} depends on undeclared stage {dependency}")]
    UnknownDependency {
        stage: ConditionType,
        dependency: ConditionType,
    },
    #[error("dependency cycle among stages: {}", format_stages(.0))]
    Cycle(Vec<ConditionType>),
}

fn format_stages(stages: &[ConditionType]) -> String {
    stages
        .iter()
        .map(ConditionType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<StageGraphError> for ReconcileError {
    fn from(error: StageGraphError) -> Self {
        ReconcileError::Configuration(error.to_string())
    }
}

/// Validated dependency graph of stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    order: Vec<ConditionType>,
    dependencies: HashMap<ConditionType, Vec<ConditionType>>,
}

impl StageGraph {
    /// Build from `(stage, depends_on)` declarations
    pub fn new(
        declarations: impl IntoIterator<Item = (ConditionType, Vec<ConditionType>)>,
    ) -> Result<Self, StageGraphError> {
        let mut declared: Vec<ConditionType> = Vec::new();
        let mut dependencies: HashMap<ConditionType, Vec<ConditionType>> = HashMap::new();
        for (stage, depends_on) in declarations {
            if dependencies.insert(stage, depends_on).is_some() {
                return Err(StageGraphError::DuplicateStage(stage));
            }
            declared.push(stage);
        }

        for stage in &declared {
            for dependency in &dependencies[stage] {
                if !dependencies.contains_key(dependency) {
                    return Err(StageGraphError::UnknownDependency {
                        stage: *stage,
                        dependency: *dependency,
                    });
                }
            }
        }

        let mut in_degree: HashMap<ConditionType, usize> = declared
            .iter()
            .map(|stage| (*stage, dependencies[stage].len()))
            .collect();
        let mut placed: HashSet<ConditionType> = HashSet::new();
        let mut order = Vec::with_capacity(declared.len());

        while order.len() < declared.len() {
            let Some(next) = declared
                .iter()
                .copied()
                .find(|stage| !placed.contains(stage) && in_degree[stage] == 0)
            else {
                let remaining = declared
                    .iter()
                    .copied()
                    .filter(|stage| !placed.contains(stage))
                    .collect();
                return Err(StageGraphError::Cycle(remaining));
            };

            placed.insert(next);
            order.push(next);
            for stage in &declared {
                let dependents = dependencies[stage].iter().filter(|d| **d == next).count();
                if let Some(degree) = in_degree.get_mut(stage) {
                    *degree -= dependents;
                }
            }
        }

        Ok(Self {
            order,
            dependencies,
        })
    }

    /// Stages in evaluation order
    pub fn order(&self) -> &[ConditionType] {
        &self.order
    }

    pub fn dependencies(&self, stage: ConditionType) -> &[ConditionType] {
        self.dependencies
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, stage: ConditionType) -> bool {
        self.dependencies.contains_key(&stage)
    }

    /// Every stage that transitively depends on `stage`, in evaluation order
    pub fn descendants(&self, stage: ConditionType) -> Vec<ConditionType> {
        let mut reached: HashSet<ConditionType> = HashSet::from([stage]);
        let mut descendants = Vec::new();
        for candidate in &self.order {
            if self
                .dependencies(*candidate)
                .iter()
                .any(|dependency| reached.contains(dependency))
            {
                reached.insert(*candidate);
                descendants.push(*candidate);
            }
        }
        descendants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConditionType::*;

    fn chain() -> StageGraph {
        StageGraph::new([
            (InputReady, vec![]),
            (TransportUrlReady, vec![InputReady]),
            (ServiceConfigReady, vec![TransportUrlReady]),
            (DbReady, vec![ServiceConfigReady]),
            (DbSyncReady, vec![DbReady]),
            (StackDomainReady, vec![DbSyncReady]),
            (ApiReady, vec![StackDomainReady]),
            (CfnApiReady, vec![StackDomainReady]),
            (EngineReady, vec![StackDomainReady]),
        ])
        .unwrap()
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let graph = chain();
        assert_eq!(graph.order(), &ConditionType::STAGES);
    }

    #[test]
    fn test_order_respects_dependencies_when_declared_backwards() {
        let graph = StageGraph::new([
            (EngineReady, vec![DbReady]),
            (DbReady, vec![InputReady]),
            (InputReady, vec![]),
        ])
        .unwrap();
        assert_eq!(graph.order(), &[InputReady, DbReady, EngineReady]);
    }

    #[test]
    fn test_descendants() {
        let graph = chain();
        assert_eq!(
            graph.descendants(StackDomainReady),
            vec![ApiReady, CfnApiReady, EngineReady]
        );
        assert!(graph.descendants(EngineReady).is_empty());
        assert_eq!(graph.descendants(InputReady).len(), 8);
        assert_eq!(graph.dependencies(CfnApiReady), &[StackDomainReady]);
    }

    #[test]
    fn test_rejects_cycles() {
        let err = StageGraph::new([
            (InputReady, vec![]),
            (DbReady, vec![DbSyncReady]),
            (DbSyncReady, vec![DbReady]),
        ])
        .unwrap_err();
        assert_eq!(err, StageGraphError::Cycle(vec![DbReady, DbSyncReady]));
    }

    #[test]
    fn test_rejects_unknown_and_duplicate_stages() {
        let err = StageGraph::new([(DbReady, vec![InputReady])]).unwrap_err();
        assert!(matches!(err, StageGraphError::UnknownDependency { .. }));

        let err = StageGraph::new([(InputReady, vec![]), (InputReady, vec![])]).unwrap_err();
        assert_eq!(err, StageGraphError::DuplicateStage(InputReady));
    }
}
