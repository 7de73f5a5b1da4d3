//! The Input Resolver (§4.2): turns a [`crate::model::Input`] into a
//! [`Node`], the base every Operation Translator step builds on.
//!
//! Grounded on `SuperDockerfile`'s `Dockerfile::{NameTag, Path, Contents}`
//! base-resolution match arms, generalized from three variants to the five
//! `Input` variants the model supports.

use std::collections::BTreeMap;

use tracing::debug;

use crate::context_store::ContextStore;
use crate::error::{ErrorKind, Result, StackableErr};
use crate::graph::{GraphArena, GraphOp, Node};
use crate::model::{Input, InputVariant, Platform};
use crate::solver::{ImageMetadata, Solver};

/// Fixed file name an `Input::Url` fetch is placed under inside its
/// single-entry filesystem node. See `DESIGN.md`'s Open Question decision:
/// both `Copy` and `Mount` see a url input as a one-entry directory, never a
/// bare file, since the graph's mount primitive only knows filesystem nodes.
pub const URL_FILE_NAME: &str = "resource";

/// Resolves `input` against already-assembled `stages`, the `context_store`,
/// and `solver` (for image pulls), producing a fresh [`Node`].
pub async fn resolve(
    arena: &mut GraphArena,
    input: &Input,
    stages: &BTreeMap<String, Node>,
    context_store: &ContextStore,
    solver: &dyn Solver,
    platform: &Platform,
) -> Result<Node> {
    match input.variant()? {
        InputVariant::Stage(id) => stages
            .get(id)
            .cloned()
            .ok_or_else(|| stacked_errors::Error::from_err(ErrorKind::UnknownStage(id.to_string()))),
        InputVariant::Image(reference) => resolve_image(arena, reference, solver, platform).await,
        InputVariant::Local(name) => {
            let path = context_store.resolve(name)?;
            debug!(context = %name, path = %path.display(), "resolved local input");
            let fs = arena.push(GraphOp::Source {
                description: format!("local:{name}"),
            });
            Ok(Node {
                fs,
                ..Node::root()
            })
        }
        InputVariant::Url(url) => {
            debug!(%url, "resolving url input");
            let fs = arena.push(GraphOp::Source {
                description: format!("url:{url} -> /{URL_FILE_NAME}"),
            });
            Ok(Node {
                fs,
                ..Node::root()
            })
        }
        InputVariant::Scratch => {
            let fs = arena.push(GraphOp::Source {
                description: "scratch".to_string(),
            });
            Ok(Node {
                fs,
                ..Node::root()
            })
        }
    }
}

/// Resolves an `image` input. Per §4.2's invariant, the image's own config
/// (env, workdir, user) is always applied to the new node; this is not
/// optional, unlike for every other variant which starts from a blank
/// config.
async fn resolve_image(
    arena: &mut GraphArena,
    reference: &str,
    solver: &dyn Solver,
    platform: &Platform,
) -> Result<Node> {
    let metadata: ImageMetadata = solver
        .resolve_image_config(reference, platform)
        .await
        .stack_err_with_locationless(|| format!("resolving image metadata for {reference:?}"))?;

    let fs = arena.push(GraphOp::Source {
        description: format!("image:{reference}"),
    });

    let mut node = Node {
        fs,
        ..Node::root()
    };
    node.apply_env(&metadata.env);
    node.workdir = metadata.workdir;
    node.user = metadata.user;
    node.platform = Some(platform.clone());
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::FakeSolver;

    #[tokio::test]
    async fn scratch_resolves_to_fresh_root_node() {
        let mut arena = GraphArena::new();
        let stages = BTreeMap::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let solver = FakeSolver::default();
        let platform = Platform::new("linux", "amd64");
        let node = resolve(&mut arena, &Input::scratch(), &stages, &store, &solver, &platform)
            .await
            .unwrap();
        assert!(node.env.is_empty());
        assert!(node.workdir.is_none());
    }

    #[tokio::test]
    async fn image_input_applies_base_env_and_workdir() {
        let mut arena = GraphArena::new();
        let stages = BTreeMap::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let mut solver = FakeSolver::default();
        solver.stub_image("alpine", ImageMetadata {
            env: [("PATH".to_string(), "/usr/bin".to_string())]
                .into_iter()
                .collect(),
            workdir: Some("/app".to_string()),
            user: Some("root".to_string()),
        });
        let platform = Platform::new("linux", "amd64");
        let node = resolve(
            &mut arena,
            &Input::image("alpine"),
            &stages,
            &store,
            &solver,
            &platform,
        )
        .await
        .unwrap();
        assert_eq!(node.env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(node.workdir.as_deref(), Some("/app"));
    }

    #[tokio::test]
    async fn unknown_stage_is_an_error() {
        let mut arena = GraphArena::new();
        let stages = BTreeMap::new();
        let store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let solver = FakeSolver::default();
        let platform = Platform::new("linux", "amd64");
        let result = resolve(
            &mut arena,
            &Input::stage("missing"),
            &stages,
            &store,
            &solver,
            &platform,
        )
        .await;
        assert!(result.is_err());
    }
}
