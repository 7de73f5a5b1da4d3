//! The Operation Translator (§4.3): turns each [`Op`] into graph ops applied
//! to a [`Node`], mutating its filesystem reference and/or its env/workdir.
//!
//! `Exec` command lexing is grounded on `containers-podlet`'s use of
//! `shlex::split` for parsing compose/CLI command strings. Copy pattern
//! filtering delegates to [`crate::pattern`]. Mounts and copy sources are
//! resolved through the same [`crate::resolver::resolve`] used for stage
//! bases, restricted to read-only use.

use std::collections::BTreeMap;

use tracing::debug;

use crate::context_store::ContextStore;
use crate::error::{ErrorKind, Result, StackableErr};
use crate::graph::{GraphArena, GraphOp, Node};
use crate::model::{FilePattern, Op, Platform};
use crate::pattern::CompiledPattern;
use crate::resolver;
use crate::solver::Solver;

/// Applies `op` to `node`, threading the graph arena, already-assembled
/// stages (for `Copy`/`Exec` mount sources that reference another stage),
/// the context store, and the solver (for image-backed mount/copy sources).
pub async fn apply(
    arena: &mut GraphArena,
    node: &mut Node,
    op: &Op,
    stages: &BTreeMap<String, Node>,
    context_store: &ContextStore,
    solver: &dyn Solver,
    platform: &Platform,
) -> Result<()> {
    match op {
        Op::Exec { command, mounts } => {
            let parts = shlex::split(command).ok_or_else(|| {
                stacked_errors::Error::from_err(ErrorKind::InvalidPlan(format!(
                    "exec command is not validly shell-lexable: {command:?}"
                )))
            })?;
            if parts.is_empty() {
                return ErrorKind::InvalidPlan("exec command is empty".to_string()).raise();
            }

            let mut mount_refs = Vec::with_capacity(mounts.len());
            for mount in mounts {
                let mount_node = resolver::resolve(
                    arena,
                    &mount.source,
                    stages,
                    context_store,
                    solver,
                    platform,
                )
                .await
                .stack_err_with_locationless(|| {
                    format!("resolving mount source for target {:?}", mount.target)
                })?;
                mount_refs.push((mount_node.fs, mount.target.clone()));
            }

            debug!(command = %command, mounts = mount_refs.len(), workdir = ?node.workdir, "translating exec op");
            node.fs = arena.push(GraphOp::Exec {
                parent: node.fs,
                command: command.clone(),
                mounts: mount_refs,
                workdir: node.workdir.clone(),
            });
        }
        Op::Copy {
            from,
            src,
            dest,
            patterns,
            create_dest_path,
        } => {
            let from_node = resolver::resolve(arena, from, stages, context_store, solver, platform)
                .await
                .stack_err_with_locationless(|| format!("resolving copy source for {dest:?}"))?;

            let filtered = filter_copy_sources(src, patterns)?;
            debug!(dest = %dest, matched = filtered.len(), "translating copy op");

            node.fs = arena.push(GraphOp::Copy {
                parent: node.fs,
                from: from_node.fs,
                src: filtered,
                dest: dest.clone(),
                create_dest_path: *create_dest_path,
            });
        }
        Op::Mkfile { dest, data, mode } => {
            debug!(dest = %dest, bytes = data.len(), mode = format_args!("{mode:o}"), "translating mkfile op");
            node.fs = arena.push(GraphOp::Mkfile {
                parent: node.fs,
                dest: dest.clone(),
                data: data.clone(),
                mode: *mode,
            });
        }
        Op::SetEnv { vars } => {
            debug!(count = vars.len(), "translating set_env op");
            node.apply_env(vars);
        }
        Op::Unknown => {
            return ErrorKind::UnsupportedOp(
                "op tag did not match any known operation".to_string(),
            )
            .raise();
        }
    }
    Ok(())
}

/// Filters `src` paths against `patterns` (§4.3, §8 scenario 5). Matching
/// uses `followSymlinks=true, allowWildcard=true, allowEmptyWildcard=true,
/// copyDirContentsOnly=true` semantics implicitly: every source string is
/// treated as a glob candidate in its own right, filtered by include/exclude,
/// not expanded against a real filesystem (the solver performs the actual
/// filesystem walk at build time).
fn filter_copy_sources(src: &[String], patterns: &FilePattern) -> Result<Vec<String>> {
    let compiled = CompiledPattern::compile(patterns)?;
    Ok(compiled
        .filter(src.iter().map(String::as_str))
        .into_iter()
        .map(str::to_string)
        .collect())
}
