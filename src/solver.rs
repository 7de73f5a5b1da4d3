//! The solver interface (§6.1) and the `bollard`-backed implementation.
//!
//! `Solver` is the black-box boundary the spec draws between "translate a
//! plan into a graph" and "actually build it." `BollardSolver` is grounded
//! directly on `SuperDockerfile::into_bollard_args` /
//! `build_with_bollard_defaults` / `build_image`: the same
//! temp-dockerfile-plus-tarball pipeline, generalized from "one Dockerfile
//! string" to "marshal an arbitrary reachable subgraph into a multi-stage
//! Dockerfile + tar context."

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use futures::TryStreamExt;
use indexmap::IndexMap;
use owo_colors::{AnsiColors, OwoColorize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context_store::ContextStore;
use crate::error::{ErrorKind, Result, StackableErr};
use crate::graph::{GraphArena, GraphOp, NodeRef};
use crate::model::Platform;

/// What the solver knows about a pulled image's own configuration, folded
/// onto a fresh [`crate::graph::Node`] by the resolver (§4.2).
#[derive(Debug, Clone, Default)]
pub struct ImageMetadata {
    pub env: IndexMap<String, String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
}

/// A reachable subgraph, ready to hand to a solver backend. Produced by
/// `GraphArena::reachable` plus the node metadata needed to marshal it
/// (§6.1 "Definition").
#[derive(Debug, Clone)]
pub struct Definition {
    pub ops: Vec<NodeRef>,
    pub target: NodeRef,
}

/// One build request submitted to a solver (§6.1).
#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub definition: Definition,
    pub tag: String,
    pub platform: Platform,
}

/// Progress/log events streamed back while a solve runs (§6.1, §5).
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// The vertex (build step/layer) this event belongs to, when the
    /// backend reports one; used to keep a stable color per vertex.
    pub vertex: Option<String>,
    pub message: String,
}

/// Outcome of a completed solve (§6.1).
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub image_id: String,
}

/// Options accepted by `Solver::build`, layering on top of `SolveRequest`
/// with caller-level invocation details (§6.4 `BuildConfig`).
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub tag: String,
    pub platform: Platform,
}

#[derive(Debug, Clone)]
pub struct BuildResponse {
    pub image_id: String,
}

/// The solver boundary (§6.1). A caller drives a build by resolving image
/// metadata during translation, then marshaling and solving the finished
/// graph. Implementations may stream [`StatusEvent`]s via a channel of
/// their own choosing; this trait only describes the request/response
/// shape.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Resolves an image reference's own config (§4.2's mandatory
    /// image-config application).
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ImageMetadata>;

    /// Marshals a reachable subgraph into whatever wire format the backend
    /// understands. Returns an opaque blob `solve` can consume. `context_store`
    /// is consulted to read the real bytes backing `Copy` sources.
    async fn marshal_graph(
        &self,
        arena: &GraphArena,
        definition: &Definition,
        context_store: &ContextStore,
    ) -> Result<Vec<u8>>;

    /// Submits a marshaled graph for solving, streaming progress through
    /// `progress` as it becomes available (§4.7 step 7, §5).
    async fn solve(
        &self,
        request: &SolveRequest,
        marshaled: Vec<u8>,
        progress: mpsc::UnboundedSender<StatusEvent>,
    ) -> Result<SolveResult>;

    /// Convenience wrapper combining marshal + solve for one target node.
    /// Runs the solve and the progress consumer concurrently (§5
    /// "two cooperating tasks"); the consumer finishes once `solve` drops
    /// its end of the channel.
    async fn build(
        &self,
        arena: &GraphArena,
        target: NodeRef,
        options: &BuildOptions,
        context_store: &ContextStore,
    ) -> Result<BuildResponse> {
        let definition = Definition {
            ops: arena.reachable(&[target]),
            target,
        };
        let marshaled = self.marshal_graph(arena, &definition, context_store).await?;
        let request = SolveRequest {
            definition,
            tag: options.tag.clone(),
            platform: options.platform.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume_progress(rx));

        let solved = self.solve(&request, marshaled, tx).await;

        if let Err(e) = consumer.await {
            warn!("progress consumer task panicked: {e:?}");
        }

        let result = solved?;
        Ok(BuildResponse {
            image_id: result.image_id,
        })
    }
}

/// Renders each status event at `info` level, colorized per vertex with a
/// cycling palette so concurrent build steps stay visually distinct in a
/// terminal, matching the teacher's `owo-colors` color-cycling idiom rather
/// than a bespoke progress bar.
async fn consume_progress(mut rx: mpsc::UnboundedReceiver<StatusEvent>) {
    const PALETTE: [AnsiColors; 6] = [
        AnsiColors::Cyan,
        AnsiColors::Magenta,
        AnsiColors::Yellow,
        AnsiColors::Green,
        AnsiColors::Blue,
        AnsiColors::Red,
    ];
    let mut assigned: HashMap<String, usize> = HashMap::new();
    let mut next = 0usize;
    while let Some(event) = rx.recv().await {
        let key = event.vertex.clone().unwrap_or_default();
        let idx = *assigned.entry(key).or_insert_with(|| {
            let i = next % PALETTE.len();
            next += 1;
            i
        });
        info!("{}", event.message.color(PALETTE[idx]));
    }
}

/// Marshals the reachable subgraph into a synthesized Dockerfile plus a tar
/// context, mirroring `SuperDockerfile`'s accumulate-then-finalize approach
/// one-for-one: every `GraphOp` becomes an instruction line, and every byte
/// payload (`Mkfile::data`, mounted/copied files) becomes a tar entry.
pub struct BollardSolver {
    docker: Docker,
}

impl BollardSolver {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect_with_defaults() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ErrorKind::Solve(format!("connecting to docker daemon: {e}")))
            .or_else(|kind| kind.raise())?;
        Ok(Self { docker })
    }

    fn render_dockerfile(&self, arena: &GraphArena, definition: &Definition) -> String {
        let mut lines = Vec::new();
        for (i, &node) in definition.ops.iter().enumerate() {
            let stage_name = format!("s{i}");
            match arena.get(node) {
                None => lines.push(format!("FROM scratch AS {stage_name}")),
                Some(GraphOp::Source { description }) => {
                    if let Some(image) = description.strip_prefix("image:") {
                        lines.push(format!("FROM {image} AS {stage_name}"));
                    } else {
                        lines.push(format!("FROM scratch AS {stage_name}"));
                    }
                }
                Some(GraphOp::Exec { command, workdir, .. }) => {
                    if let Some(dir) = workdir {
                        lines.push(format!("WORKDIR {dir}"));
                    }
                    lines.push(format!("RUN {command}"));
                }
                Some(GraphOp::Copy { src, dest, .. }) => {
                    for (j, _) in src.iter().enumerate() {
                        lines.push(format!("COPY copy_{i}_{j} {dest}"));
                    }
                }
                Some(GraphOp::Mkfile { dest, mode, .. }) => {
                    lines.push(format!("COPY mkfile_{i} {dest}"));
                    lines.push(format!("RUN chmod {mode:o} {dest}"));
                }
                Some(GraphOp::Alias { .. }) => {}
                Some(GraphOp::Layer { .. }) => {
                    lines.push("RUN true".to_string());
                }
            }
        }
        lines.join("\n")
    }
}

/// Walks `node` back to its originating [`GraphOp::Source`] and, if that
/// source is a `local:` context (§4.2's `InputVariant::Local`), returns the
/// context's name so its real files can be read out of the `ContextStore`.
fn local_context_name(arena: &GraphArena, node: NodeRef) -> Option<&str> {
    let chain = arena.ancestry(node);
    let root = *chain.first()?;
    match arena.get(root) {
        Some(GraphOp::Source { description }) => description.strip_prefix("local:"),
        _ => None,
    }
}

/// Appends one entry to a tar builder with the mode/cksum conventions the
/// rest of this module uses for the synthesized `Dockerfile` entry.
fn append_tar_entry(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| ErrorKind::Solve(format!("building tar context: {e}")))
        .or_else(|kind| kind.raise())
}

#[async_trait]
impl Solver for BollardSolver {
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ImageMetadata> {
        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| ErrorKind::ImageMetadataResolve(format!("{reference}: {e}")))
            .or_else(|kind| kind.raise())?;

        if let (Some(os), Some(arch)) = (inspect.os.as_deref(), inspect.architecture.as_deref()) {
            if !os.eq_ignore_ascii_case(&platform.os) || !arch.eq_ignore_ascii_case(&platform.arch) {
                return ErrorKind::ImageMetadataResolve(format!(
                    "{reference}: not found for platform {}/{} (image is {os}/{arch})",
                    platform.os, platform.arch
                ))
                .raise();
            }
        }

        let config = inspect.config.unwrap_or_default();
        let mut env = IndexMap::new();
        for entry in config.env.unwrap_or_default() {
            if let Some((k, v)) = entry.split_once('=') {
                env.insert(k.to_string(), v.to_string());
            }
        }
        Ok(ImageMetadata {
            env,
            workdir: config.working_dir.filter(|s| !s.is_empty()),
            user: config.user.filter(|s| !s.is_empty()),
        })
    }

    async fn marshal_graph(
        &self,
        arena: &GraphArena,
        definition: &Definition,
        context_store: &ContextStore,
    ) -> Result<Vec<u8>> {
        let dockerfile = self.render_dockerfile(arena, definition);
        debug!(dockerfile = %dockerfile, "marshaled synthesized dockerfile");

        let mut tar_builder = tar::Builder::new(Vec::new());
        append_tar_entry(&mut tar_builder, "Dockerfile", dockerfile.as_bytes())?;

        for (i, &node) in definition.ops.iter().enumerate() {
            match arena.get(node) {
                Some(GraphOp::Mkfile { data, .. }) => {
                    append_tar_entry(&mut tar_builder, &format!("mkfile_{i}"), data)?;
                }
                Some(GraphOp::Copy { from, src, .. }) => {
                    let context_name = local_context_name(arena, *from).ok_or_else(|| {
                        stacked_errors::Error::from_err(ErrorKind::Solve(format!(
                            "copy op {i} source is not backed by a local context; cannot marshal its files"
                        )))
                    })?;
                    let dir = context_store.resolve(context_name)?;
                    for (j, path) in src.iter().enumerate() {
                        let bytes = tokio::fs::read(dir.join(path))
                            .await
                            .stack_err_with_locationless(|| {
                                format!(
                                    "reading copy source {path:?} from context {context_name:?}"
                                )
                            })?;
                        append_tar_entry(&mut tar_builder, &format!("copy_{i}_{j}"), &bytes)?;
                    }
                }
                _ => {}
            }
        }

        tar_builder
            .into_inner()
            .map_err(|e| stacked_errors::Error::from_err(ErrorKind::Solve(format!("{e}"))))
    }

    async fn solve(
        &self,
        request: &SolveRequest,
        marshaled: Vec<u8>,
        progress: mpsc::UnboundedSender<StatusEvent>,
    ) -> Result<SolveResult> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: request.tag.clone(),
            rm: true,
            platform: format!("{}/{}", request.platform.os, request.platform.arch),
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(marshaled.into()));
        let mut image_id = None;
        while let Some(message) = stream
            .try_next()
            .await
            .map_err(|e| ErrorKind::Solve(format!("{e:?}")))
            .or_else(|kind| kind.raise())?
        {
            if let Some(id) = message.aux.as_ref().and_then(|aux| aux.id.clone()) {
                image_id = Some(id);
            }
            if let Some(text) = message.stream.clone().or_else(|| message.status.clone()) {
                let _ = progress.send(StatusEvent {
                    vertex: message.id.clone(),
                    message: text,
                });
            }
        }

        image_id
            .stack_err_locationless("BollardSolver::solve: image built without id")
            .map(|image_id| SolveResult { image_id })
    }
}

/// In-memory `Solver` used by tests, avoiding a live Docker daemon
/// dependency. Records requests so assertions can inspect what was solved.
#[cfg(any(test, feature = "test-util"))]
#[derive(Default)]
pub struct FakeSolver {
    images: std::sync::Mutex<HashMap<String, Vec<(Option<Platform>, ImageMetadata)>>>,
    pub solved: std::sync::Mutex<Vec<SolveRequest>>,
}

#[cfg(any(test, feature = "test-util"))]
impl FakeSolver {
    /// Stubs `reference` for any requested platform.
    pub fn stub_image(&mut self, reference: impl Into<String>, metadata: ImageMetadata) {
        self.images
            .lock()
            .unwrap()
            .entry(reference.into())
            .or_default()
            .push((None, metadata));
    }

    /// Stubs `reference` only for `platform`; a resolution against any other
    /// platform misses, surfacing as `ImageMetadataResolve`.
    pub fn stub_image_for_platform(
        &mut self,
        reference: impl Into<String>,
        platform: Platform,
        metadata: ImageMetadata,
    ) {
        self.images
            .lock()
            .unwrap()
            .entry(reference.into())
            .or_default()
            .push((Some(platform), metadata));
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Solver for FakeSolver {
    async fn resolve_image_config(
        &self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ImageMetadata> {
        let images = self.images.lock().unwrap();
        let stubs = images.get(reference).ok_or_else(|| {
            stacked_errors::Error::from_err(ErrorKind::ImageMetadataResolve(format!(
                "no stub for {reference}"
            )))
        })?;
        stubs
            .iter()
            .find(|(p, _)| p.as_ref() == Some(platform))
            .or_else(|| stubs.iter().find(|(p, _)| p.is_none()))
            .map(|(_, m)| m.clone())
            .ok_or_else(|| {
                stacked_errors::Error::from_err(ErrorKind::ImageMetadataResolve(format!(
                    "{reference}: not found for platform {}/{}",
                    platform.os, platform.arch
                )))
            })
    }

    async fn marshal_graph(
        &self,
        _arena: &GraphArena,
        definition: &Definition,
        _context_store: &ContextStore,
    ) -> Result<Vec<u8>> {
        postcard::to_allocvec(&definition.ops)
            .map_err(|e| stacked_errors::Error::from_err(ErrorKind::Solve(format!("{e}"))))
    }

    async fn solve(
        &self,
        request: &SolveRequest,
        _marshaled: Vec<u8>,
        progress: mpsc::UnboundedSender<StatusEvent>,
    ) -> Result<SolveResult> {
        let _ = progress.send(StatusEvent {
            vertex: None,
            message: format!("solving {}", request.tag),
        });
        self.solved.lock().unwrap().push(request.clone());
        Ok(SolveResult {
            image_id: format!("fake-image:{}", request.tag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_solver_records_solve_requests() {
        let mut solver = FakeSolver::default();
        solver.stub_image(
            "alpine",
            ImageMetadata {
                env: IndexMap::new(),
                workdir: None,
                user: None,
            },
        );
        let platform = Platform::new("linux", "amd64");
        let arena = GraphArena::new();
        let options = BuildOptions {
            tag: "demo:latest".to_string(),
            platform: platform.clone(),
        };
        let context_store = ContextStore::new(std::env::temp_dir()).await.unwrap();
        let response = solver
            .build(&arena, NodeRef::ROOT, &options, &context_store)
            .await
            .unwrap();
        assert_eq!(response.image_id, "fake-image:demo:latest");
        assert_eq!(solver.solved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fake_solver_platform_mismatch_is_not_found() {
        let mut solver = FakeSolver::default();
        solver.stub_image_for_platform(
            "registry/example",
            Platform::new("linux", "amd64"),
            ImageMetadata::default(),
        );
        let requested = Platform::new("windows", "riscv64");
        let err = solver
            .resolve_image_config("registry/example", &requested)
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("not found"));
    }
}
