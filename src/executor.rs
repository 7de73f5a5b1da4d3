//! The Build Executor (§4.7): the single public entry point that ties the
//! Context Store, Plan Driver, Image Config Synthesizer, and Solver
//! together, plus cancellation (§5).
//!
//! The cancellation token is shaped like the teacher's `CtrlCTask`
//! (`Arc<Mutex<bool>>` + `tokio::task::AbortHandle` wrapping
//! `tokio::signal::ctrl_c()`); the "create everything, then release
//! unconditionally on any failure path" discipline is grounded on
//! `ContainerNetwork::run`'s own create-then-start-then-unconditional-
//! terminate pattern.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument, warn};

use crate::assembler::LayerMode;
use crate::context_store::{ContextStore, DEFAULT_CONTEXT_NAME};
use crate::driver;
use crate::error::{ErrorKind, Result, StackableErr};
use crate::image_config::{self, Image};
use crate::model::{BuildConfig, ContextDescriptor, ContextFs, Plan};
use crate::solver::{BuildOptions, Solver};

/// Metadata key the synthesized image config is attached under on the
/// solver's result (§4.7 step 6, §6.1).
pub const IMAGE_CONFIG_METADATA_KEY: &str = "containerimage.config";

/// A cooperative cancellation flag, checked at stage boundaries and before
/// the solve request. Mirrors the teacher's `CtrlCTask` shape but is driven
/// manually rather than always wired to `ctrl_c`, so callers can cancel a
/// build for reasons other than a signal.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<Mutex<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.0.lock().unwrap() = true;
    }

    pub fn is_canceled(&self) -> bool {
        *self.0.lock().unwrap()
    }

    fn check(&self) -> Result<()> {
        if self.is_canceled() {
            ErrorKind::Canceled.raise()
        } else {
            Ok(())
        }
    }

    /// Spawns a task that cancels this token when `ctrl_c` fires, matching
    /// `CtrlCTask::spawn`. The returned handle aborts that task on drop.
    pub fn spawn_on_ctrl_c(&self) -> CtrlCGuard {
        let token = self.clone();
        let handle = tokio::task::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => token.cancel(),
                Err(e) => {
                    warn!("cogpack CancelToken ctrl_c listener errored, doing nothing: {e:?}")
                }
            }
        });
        CtrlCGuard {
            abort: handle.abort_handle(),
        }
    }
}

/// Keeps the ctrl_c listener task alive; aborts it on drop.
pub struct CtrlCGuard {
    abort: tokio::task::AbortHandle,
}

impl Drop for CtrlCGuard {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Result of a successful build (§4.7 step 8).
#[derive(Debug)]
pub struct BuildOutput {
    pub image_ref: String,
    pub image_config: Image,
}

/// Runs `plan` against `solver`, producing a tagged image and its
/// synthesized OCI config (§4.7). Contexts are released on every exit path,
/// success or failure.
#[instrument(skip_all, fields(tag = %build_config.tag))]
pub async fn build(
    plan: &Plan,
    build_config: &BuildConfig,
    solver: &dyn Solver,
    cancel: &CancelToken,
) -> Result<BuildOutput> {
    let mut context_store = ContextStore::new(std::env::temp_dir())
        .await
        .stack_err_locationless("build: initializing context store")?;

    let descriptors = contexts_with_default(plan, build_config);
    let load_result = context_store.load(&descriptors).await;

    let result = match load_result {
        Ok(()) => run(plan, build_config, solver, cancel, &context_store).await,
        Err(e) => Err(e),
    };

    context_store.release().await;
    result
}

/// Always registers `context` -> `build_config.context_dir` (§4.1) on top of
/// whatever the plan itself declared, without letting a plan-declared
/// `context` entry silently shadow it.
fn contexts_with_default(
    plan: &Plan,
    build_config: &BuildConfig,
) -> BTreeMap<String, ContextDescriptor> {
    let mut descriptors = plan.contexts.clone();
    descriptors
        .entry(DEFAULT_CONTEXT_NAME.to_string())
        .or_insert_with(|| ContextDescriptor {
            description: None,
            fs: ContextFs::Directory {
                path: build_config.context_dir.clone(),
            },
        });
    descriptors
}

async fn run(
    plan: &Plan,
    build_config: &BuildConfig,
    solver: &dyn Solver,
    cancel: &CancelToken,
    context_store: &ContextStore,
) -> Result<BuildOutput> {
    cancel.check()?;

    let platform = build_config
        .platform
        .clone()
        .unwrap_or_else(|| plan.platform.clone());
    let mut plan = plan.clone();
    plan.platform = platform;

    let mut arena = crate::graph::GraphArena::new();
    let translation =
        driver::translate(&mut arena, &plan, context_store, solver, LayerMode::Diff)
            .await
            .stack_err_locationless("build: translating plan")?;

    cancel.check()?;

    let image_config = image_config::synthesize(&translation.final_node, plan.export.as_ref());

    let options = BuildOptions {
        tag: build_config.tag.clone(),
        platform: plan.platform.clone(),
    };

    cancel.check()?;

    let response = solver
        .build(&arena, translation.final_node.fs, &options, context_store)
        .await
        .stack_err_with_locationless(|| format!("solving build tagged {:?}", build_config.tag))?;

    debug!(image_id = %response.image_id, "build completed");

    Ok(BuildOutput {
        image_ref: response.image_id,
        image_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Input, Platform, Stage};
    use crate::solver::{FakeSolver, ImageMetadata};

    fn base_build_config(dir: &std::path::Path) -> BuildConfig {
        BuildConfig {
            context_dir: dir.to_path_buf(),
            tag: "demo:latest".to_string(),
            platform: None,
        }
    }

    #[tokio::test]
    async fn build_releases_contexts_on_success() {
        let dir = std::env::temp_dir().join(format!("cogpack-exec-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let mut solver = FakeSolver::default();
        solver.stub_image("alpine", ImageMetadata::default());
        let plan = Plan {
            platform: Platform::new("linux", "amd64"),
            stages: vec![Stage {
                id: "only".to_string(),
                source: Input::image("alpine"),
                dir: None,
                env: vec![],
                operations: vec![],
            }],
            contexts: Default::default(),
            export: None,
        };
        let build_config = base_build_config(&dir);
        let cancel = CancelToken::new();

        let output = build(&plan, &build_config, &solver, &cancel).await.unwrap();
        assert_eq!(output.image_ref, "fake-image:demo:latest");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn canceled_token_aborts_before_solving() {
        let dir = std::env::temp_dir().join(format!("cogpack-exec-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let solver = FakeSolver::default();
        let plan = Plan {
            platform: Platform::new("linux", "amd64"),
            stages: vec![Stage {
                id: "only".to_string(),
                source: Input::scratch(),
                dir: None,
                env: vec![],
                operations: vec![],
            }],
            contexts: Default::default(),
            export: None,
        };
        let build_config = base_build_config(&dir);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = build(&plan, &build_config, &solver, &cancel).await;
        assert!(result.is_err());
        assert!(solver.solved.lock().unwrap().is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn build_config_platform_overrides_plan_platform() {
        let dir = std::env::temp_dir().join(format!("cogpack-exec-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let mut solver = FakeSolver::default();
        solver.stub_image("alpine", ImageMetadata::default());
        let plan = Plan {
            platform: Platform::new("linux", "amd64"),
            stages: vec![Stage {
                id: "only".to_string(),
                source: Input::image("alpine"),
                dir: None,
                env: vec![],
                operations: vec![],
            }],
            contexts: Default::default(),
            export: None,
        };
        let mut build_config = base_build_config(&dir);
        build_config.platform = Some(Platform::new("windows", "riscv64"));
        let cancel = CancelToken::new();

        let output = build(&plan, &build_config, &solver, &cancel).await.unwrap();
        assert_eq!(output.image_config.os, "windows");
        assert_eq!(output.image_config.architecture, "riscv64");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
