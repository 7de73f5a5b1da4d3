//! The Plan Driver (§4.5): walks a plan's stages in declared order, invoking
//! the Stage Assembler for each, and returns the final node plus the full
//! stage index.
//!
//! Grounded on `ContainerNetwork::run`'s sequential per-container loop,
//! generalized from "run containers in declared order" to "assemble stages
//! in declared order, registering unreachable branches too."

use std::collections::BTreeMap;

use tracing::instrument;

use crate::assembler::{self, LayerMode};
use crate::context_store::ContextStore;
use crate::error::{ErrorKind, Result};
use crate::graph::{GraphArena, Node};
use crate::model::Plan;
use crate::solver::Solver;

/// Translation output (§4.5): the last-assembled node, and the full map of
/// stage id → assembled node (including unreferenced branch stages).
pub struct Translation {
    pub final_node: Node,
    pub stages: BTreeMap<String, Node>,
}

/// Translates `plan` into a [`Translation`]. Fails `kind=EmptyPlan` if the
/// plan has no stages; fails `kind=InvalidPlan` on a duplicate stage id or a
/// `Stage{id}` source referencing an id not yet assembled.
#[instrument(skip_all, fields(stages = plan.stages.len()))]
pub async fn translate(
    arena: &mut GraphArena,
    plan: &Plan,
    context_store: &ContextStore,
    solver: &dyn Solver,
    layer_mode: LayerMode,
) -> Result<Translation> {
    if plan.stages.is_empty() {
        return ErrorKind::EmptyPlan.raise();
    }

    let mut stages: BTreeMap<String, Node> = BTreeMap::new();
    let mut final_node = None;

    for stage in &plan.stages {
        if stages.contains_key(&stage.id) {
            return ErrorKind::InvalidPlan(format!("duplicate stage id {:?}", stage.id)).raise();
        }
        let node = assembler::assemble(
            arena,
            stage,
            &stages,
            context_store,
            solver,
            &plan.platform,
            layer_mode,
        )
        .await?;
        final_node = Some(node.clone());
        stages.insert(stage.id.clone(), node);
    }

    Ok(Translation {
        final_node: final_node.expect("plan.stages is non-empty, loop ran at least once"),
        stages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Input, Platform};
    use crate::solver::FakeSolver;

    fn platform() -> Platform {
        Platform::new("linux", "amd64")
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let mut arena = GraphArena::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let solver = FakeSolver::default();
        let plan = Plan {
            platform: platform(),
            stages: vec![],
            contexts: Default::default(),
            export: None,
        };
        let result = translate(&mut arena, &plan, &store, &solver, LayerMode::Full).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn final_node_matches_last_stage() {
        use crate::model::Stage;
        let mut arena = GraphArena::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let solver = FakeSolver::default();
        let plan = Plan {
            platform: platform(),
            stages: vec![
                Stage {
                    id: "a".to_string(),
                    source: Input::scratch(),
                    dir: None,
                    env: vec!["X=1".to_string()],
                    operations: vec![],
                },
                Stage {
                    id: "b".to_string(),
                    source: Input::stage("a"),
                    dir: None,
                    env: vec!["X=2".to_string()],
                    operations: vec![],
                },
            ],
            contexts: Default::default(),
            export: None,
        };
        let translation = translate(&mut arena, &plan, &store, &solver, LayerMode::Full)
            .await
            .unwrap();
        assert_eq!(
            translation.final_node.env.get("X").map(String::as_str),
            Some("2")
        );
        assert_eq!(translation.stages.len(), 2);
    }

    #[tokio::test]
    async fn unreferenced_branch_does_not_affect_final_node() {
        use crate::model::Stage;
        let mut arena = GraphArena::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let solver = FakeSolver::default();
        let plan = Plan {
            platform: platform(),
            stages: vec![
                Stage {
                    id: "base".to_string(),
                    source: Input::scratch(),
                    dir: None,
                    env: vec!["STAGE=base".to_string()],
                    operations: vec![],
                },
                Stage {
                    id: "branch".to_string(),
                    source: Input::stage("base"),
                    dir: None,
                    env: vec!["STAGE=branch".to_string()],
                    operations: vec![],
                },
                Stage {
                    id: "stage".to_string(),
                    source: Input::stage("base"),
                    dir: None,
                    env: vec![],
                    operations: vec![],
                },
            ],
            contexts: Default::default(),
            export: None,
        };
        let translation = translate(&mut arena, &plan, &store, &solver, LayerMode::Full)
            .await
            .unwrap();
        assert_eq!(
            translation.final_node.env.get("STAGE").map(String::as_str),
            Some("base")
        );
    }

    #[tokio::test]
    async fn duplicate_stage_id_is_rejected() {
        use crate::model::Stage;
        let mut arena = GraphArena::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let solver = FakeSolver::default();
        let stage = Stage {
            id: "dup".to_string(),
            source: Input::scratch(),
            dir: None,
            env: vec![],
            operations: vec![],
        };
        let plan = Plan {
            platform: platform(),
            stages: vec![stage.clone(), stage],
            contexts: Default::default(),
            export: None,
        };
        let result = translate(&mut arena, &plan, &store, &solver, LayerMode::Full).await;
        assert!(result.is_err());
    }
}
