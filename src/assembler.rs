//! The Stage Assembler (§4.4): resolves a stage's base, applies stage-level
//! config, runs its operations, then finalizes — including the critical
//! "copy config to final node" step metadata would otherwise lose across a
//! filesystem-diff optimization (§9).
//!
//! Grounded on the overall accumulate-then-finalize shape of
//! `SuperDockerfile::build_image` (accumulate instructions/tarball entries,
//! then finalize into one build request), generalized into the
//! assemble/finalize split the spec describes.

use std::collections::BTreeMap;

use tracing::debug;

use crate::context_store::ContextStore;
use crate::error::{Result, StageErrExt};
use crate::graph::{GraphArena, GraphOp, Node};
use crate::model::{Platform, Stage};
use crate::resolver;
use crate::solver::Solver;
use crate::translator;

/// Whether stage finalization emits a minimal differential layer or inlines
/// the stage's full operation chain (§4.4 step 4, §9 "Diff vs. full mode").
/// The produced image configuration is identical either way; only the
/// shape of the emitted graph differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerMode {
    Diff,
    Full,
}

/// Assembles `stage` against already-registered `stages`, returning its
/// final [`Node`] to be registered by the caller (the Plan Driver) under
/// `stage.id`.
pub async fn assemble(
    arena: &mut GraphArena,
    stage: &Stage,
    stages: &BTreeMap<String, Node>,
    context_store: &ContextStore,
    solver: &dyn Solver,
    plan_platform: &Platform,
    layer_mode: LayerMode,
) -> Result<Node> {
    // 1. resolve base
    let mut base = resolver::resolve(
        arena,
        &stage.source,
        stages,
        context_store,
        solver,
        plan_platform,
    )
    .await
    .stage_err(&stage.id)?;

    // 2. apply stage config to base
    if let Some(dir) = &stage.dir {
        base.workdir = Some(dir.clone());
    }
    for (k, v) in stage.parsed_env() {
        base.env.insert(k.to_string(), v.to_string());
    }

    // 3. apply operations, producing `modified`
    let base_fs = base.fs;
    let mut modified = base.clone();
    for op in &stage.operations {
        translator::apply(
            arena,
            &mut modified,
            op,
            stages,
            context_store,
            solver,
            plan_platform,
        )
        .await
        .stage_err(&stage.id)?;
    }

    // 4. produce the stage's final filesystem
    let final_fs = match layer_mode {
        LayerMode::Diff if modified.fs != base_fs => arena.push(GraphOp::Layer {
            base: base_fs,
            since: modified.fs,
        }),
        _ => modified.fs,
    };

    // 5. copy essential config from `modified` to the final node: workdir,
    // env, platform. Non-obvious and load-bearing (§9): step 4's filesystem
    // manipulation discards metadata if we don't.
    let mut finalized = Node {
        fs: final_fs,
        env: modified.env.clone(),
        workdir: modified.workdir.clone(),
        platform: modified.platform.clone(),
        user: modified.user.clone(),
    };

    // 6. re-apply stage env so it wins over anything operations changed
    for (k, v) in stage.parsed_env() {
        finalized.env.insert(k.to_string(), v.to_string());
    }

    // 7. default platform to the plan's platform
    if finalized.platform.is_none() {
        finalized.platform = Some(plan_platform.clone());
    }

    debug!(
        stage = %stage.id,
        workdir = ?finalized.workdir,
        env_count = finalized.env.len(),
        "assembled stage"
    );

    Ok(finalized)
}
