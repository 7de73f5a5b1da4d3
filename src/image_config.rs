//! The Image Config Synthesizer (§4.6) and the OCI `Image`/`ImageConfig`
//! types it produces (§6.3).
//!
//! Grounded on `pyroth-sbx`'s `bux-oci::ImageConfig` for the typed-OCI-
//! config-struct shape (`cmd`, `entrypoint`, `env`, `working_dir`, `user`,
//! `exposed_ports`, `labels` fields with the same Docker-config idiom),
//! even though that repo is not this crate's teacher.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::Node;
use crate::model::{ExportConfig, Platform};

/// OCI image config block (a subset of the full spec, limited to the
/// fields §6.3 names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfigBlock {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(rename = "WorkingDir")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<Vec<String>>,
}

/// Top-level OCI v1 Image, limited to the fields the core populates (§6.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub architecture: String,
    pub os: String,
    pub config: ImageConfigBlock,
    pub author: String,
}

/// Reads env/workdir/platform off `final_node` and layers `export`
/// overrides on top, last-writer-wins (§4.6).
pub fn synthesize(final_node: &Node, export: Option<&ExportConfig>) -> Image {
    let platform = final_node
        .platform
        .clone()
        .unwrap_or_else(|| Platform::new("linux", "amd64"));

    let env: Vec<String> = final_node
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let mut working_dir = final_node
        .workdir
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/".to_string());

    let mut config = ImageConfigBlock {
        env,
        working_dir: working_dir.clone(),
        ..Default::default()
    };

    if let Some(export) = export {
        config.entrypoint = export.entrypoint.clone();
        config.cmd = export.cmd.clone();
        config.user = export.user.clone();
        config.labels = export.labels.clone();
        config.exposed_ports = export.exposed_ports.clone();
        if let Some(dir) = &export.working_dir {
            if !dir.is_empty() {
                working_dir = dir.clone();
                config.working_dir = working_dir;
            }
        }
    }

    Image {
        architecture: platform.arch,
        os: platform.os,
        config,
        author: "cogpack".to_string(),
    }
}
