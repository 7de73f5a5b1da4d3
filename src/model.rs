//! The wire-level data model (§3, §6.2): `Plan` and everything it's built
//! from. Every struct here is `serde(deny_unknown_fields)` so that future
//! fields fail loudly instead of being silently ignored (§6.2).

use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

/// Target platform for a plan or an individual image resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

/// Root entity submitted by the caller (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub platform: Platform,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextDescriptor>,
    #[serde(default)]
    pub export: Option<ExportConfig>,
}

/// One declarative build step (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub id: String,
    pub source: Input,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub operations: Vec<Op>,
}

impl Stage {
    /// Parses `env` entries of the form `KEY=VALUE`, silently dropping any
    /// entry without an `=` (§3 invariant).
    pub fn parsed_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| entry.split_once('='))
    }
}

/// A `Source` descriptor. Modeled as a flat struct of `Option` fields rather
/// than an externally-tagged enum: the spec's own validation language ("an
/// input with zero variants selected, or more than one, is invalid") only
/// makes sense against a wire shape where more than one field could be set
/// at once. See `DESIGN.md` for the Open Question this resolves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Input {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default, rename = "image")]
    pub image: Option<String>,
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub scratch: Option<Scratch>,
}

/// Marker for the `Scratch{}` variant: present-but-empty selects it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scratch {}

/// The resolved, exactly-one-selected variant of an [`Input`].
#[derive(Debug, Clone)]
pub enum InputVariant<'a> {
    Stage(&'a str),
    Image(&'a str),
    Local(&'a str),
    Url(&'a str),
    Scratch,
}

impl Input {
    pub fn stage(id: impl Into<String>) -> Self {
        Self {
            stage: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            image: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self {
            local: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn scratch() -> Self {
        Self {
            scratch: Some(Scratch {}),
            ..Default::default()
        }
    }

    /// Validates that exactly one variant is selected and returns it
    /// (§3, §4.2, `kind=InvalidInput`).
    pub fn variant(&self) -> Result<InputVariant<'_>> {
        let mut selected: Vec<InputVariant<'_>> = Vec::with_capacity(1);
        if let Some(id) = self.stage.as_deref() {
            selected.push(InputVariant::Stage(id));
        }
        if let Some(reference) = self.image.as_deref() {
            selected.push(InputVariant::Image(reference));
        }
        if let Some(name) = self.local.as_deref() {
            selected.push(InputVariant::Local(name));
        }
        if let Some(url) = self.url.as_deref() {
            selected.push(InputVariant::Url(url));
        }
        if self.scratch.is_some() {
            selected.push(InputVariant::Scratch);
        }
        match selected.len() {
            1 => Ok(selected.into_iter().next().unwrap()),
            0 => ErrorKind::InvalidInput("no source variant selected".to_string()).raise(),
            n => ErrorKind::InvalidInput(format!("{n} source variants selected, expected 1")).raise(),
        }
    }
}

/// A declarative filesystem/env operation within a stage (§3, §4.3).
///
/// Unrecognized `op` tags deserialize into [`Op::Unknown`] rather than
/// failing to parse, so that the wire format stays forward compatible; the
/// Operation Translator is what rejects them, as `UnsupportedOp` (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Exec {
        command: String,
        #[serde(default)]
        mounts: Vec<Mount>,
    },
    Copy {
        from: Input,
        src: Vec<String>,
        dest: String,
        #[serde(default)]
        patterns: FilePattern,
        #[serde(default)]
        create_dest_path: bool,
    },
    Mkfile {
        dest: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        mode: u32,
    },
    SetEnv {
        vars: IndexMap<String, String>,
    },
    #[serde(other)]
    Unknown,
}

/// A mount attached to an `Exec` op (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mount {
    pub source: Input,
    pub target: String,
}

/// Include/exclude glob filtering applied to a `Copy`'s source paths (§3,
/// §4.3). Empty `include` means "all paths pass the include stage."
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePattern {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A named filesystem the caller makes available to the build (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextDescriptor {
    #[serde(default)]
    pub description: Option<String>,
    pub fs: ContextFs,
}

/// The two concrete filesystem backings a [`ContextDescriptor`] can have.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ContextFs {
    /// A caller-supplied on-disk directory, wrapped without copying (§4.1).
    Directory { path: PathBuf },
    /// An in-memory filesystem: relative path -> literal bytes. Materialized
    /// to an ephemeral on-disk directory on Build entry (§4.1).
    Memory {
        #[serde(default)]
        files: BTreeMap<String, Vec<u8>>,
    },
}

/// Caller-supplied overrides applied to the final image configuration
/// (§3, §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub exposed_ports: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// §6.4. Accepted by the Build Executor; not necessarily the same shape as
/// `Plan`, since it configures the *invocation* rather than describing the
/// build itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub context_dir: PathBuf,
    pub tag: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// `Mkfile::data` round-trips through JSON as base64 so the `Plan` wire
/// format stays valid UTF-8 JSON even for binary file contents.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_variant_requires_exactly_one() {
        assert!(Input::default().variant().is_err());
        assert!(Input::scratch().variant().is_ok());
        let mut both = Input::image("alpine");
        both.local = Some("ctx".to_string());
        assert!(both.variant().is_err());
    }

    #[test]
    fn stage_env_drops_entries_without_equals() {
        let stage = Stage {
            id: "s".to_string(),
            source: Input::scratch(),
            dir: None,
            env: vec!["FOO=bar".to_string(), "MALFORMED".to_string(), "A=B=C".to_string()],
            operations: vec![],
        };
        let parsed: Vec<_> = stage.parsed_env().collect();
        assert_eq!(parsed, vec![("FOO", "bar"), ("A", "B=C")]);
    }

    #[test]
    fn op_unknown_tag_parses_as_unknown_variant() {
        let json = serde_json::json!({"op": "frobnicate", "whatever": 1});
        let op: Op = serde_json::from_value(json).unwrap();
        assert!(matches!(op, Op::Unknown));
    }

    #[test]
    fn plan_rejects_unknown_fields() {
        let json = serde_json::json!({
            "platform": {"os": "linux", "arch": "amd64"},
            "stages": [],
            "bogus_field": true,
        });
        assert!(serde_json::from_value::<Plan>(json).is_err());
    }
}
