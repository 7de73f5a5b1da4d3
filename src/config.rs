//! Ambient configuration loading (§10.3): a `Plan` from JSON, a
//! `BuildConfig` from TOML, both strict (unknown fields rejected at parse
//! time, same as the teacher's `FileOptions::read_to_string` + `serde_json`
//! idiom), plus environment-variable overrides for the handful of fields an
//! operator commonly wants to override without editing the file.
//!
//! Grounded on twoliter's `buildsys` TOML config convention for
//! `BuildConfig`, and on the teacher's `FileOptions::read_to_string` for the
//! read-then-parse shape. This module only loads and validates; parsing
//! actual CLI flags is the named-out-of-scope CLI layer.

use std::path::{Path, PathBuf};

use stacked_errors::StackableErr;

use crate::error::Result;
use crate::model::{BuildConfig, Plan};

/// Env var overriding `BuildConfig::context_dir` after the file is loaded.
pub const CONTEXT_DIR_ENV: &str = "COGPACK_CONTEXT_DIR";
/// Env var overriding `BuildConfig::tag` after the file is loaded.
pub const TAG_ENV: &str = "COGPACK_TAG";

/// Reads and strictly parses a `Plan` from a JSON file (§6.2).
pub async fn load_plan(path: impl AsRef<Path>) -> Result<Plan> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .stack_err_with_locationless(|| format!("reading plan file {path:?}"))?;
    serde_json::from_str(&contents)
        .stack_err_with_locationless(|| format!("parsing plan file {path:?} as JSON"))
}

/// Reads and strictly parses a `BuildConfig` from a TOML file, then applies
/// [`CONTEXT_DIR_ENV`]/[`TAG_ENV`] overrides if set.
pub async fn load_build_config(path: impl AsRef<Path>) -> Result<BuildConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .stack_err_with_locationless(|| format!("reading build config file {path:?}"))?;
    let mut config: BuildConfig = toml::from_str(&contents)
        .stack_err_with_locationless(|| format!("parsing build config file {path:?} as TOML"))?;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut BuildConfig) {
    if let Ok(dir) = std::env::var(CONTEXT_DIR_ENV) {
        config.context_dir = PathBuf::from(dir);
    }
    if let Ok(tag) = std::env::var(TAG_ENV) {
        config.tag = tag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;

    #[tokio::test]
    async fn load_plan_rejects_unknown_fields() {
        let dir = std::env::temp_dir().join(format!("cogpack-cfgtest-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("plan.json");
        tokio::fs::write(
            &path,
            r#"{"platform":{"os":"linux","arch":"amd64"},"stages":[],"bogus":true}"#,
        )
        .await
        .unwrap();
        assert!(load_plan(&path).await.is_err());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn load_build_config_applies_env_overrides() {
        let dir = std::env::temp_dir().join(format!("cogpack-cfgtest-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("build.toml");
        tokio::fs::write(&path, "context_dir = \"/orig\"\ntag = \"orig:latest\"\n")
            .await
            .unwrap();

        std::env::set_var(TAG_ENV, "overridden:latest");
        let config = load_build_config(&path).await.unwrap();
        std::env::remove_var(TAG_ENV);

        assert_eq!(config.tag, "overridden:latest");
        assert_eq!(config.context_dir, PathBuf::from("/orig"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn platform_round_trips_through_toml() {
        let platform = Platform::new("linux", "arm64");
        let s = toml::to_string(&platform).unwrap();
        let back: Platform = toml::from_str(&s).unwrap();
        assert_eq!(platform, back);
    }
}
