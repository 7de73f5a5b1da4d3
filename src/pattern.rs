//! Include/exclude glob filtering for `Copy` ops (§4.3, §8 scenario 5).
//!
//! A path is included iff it matches at least one `include` glob (or
//! `include` is empty) AND matches no `exclude` glob. Glob syntax follows
//! standard shell-style, with `**` for recursive segments.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{ErrorKind, Result};
use crate::model::FilePattern;

/// A compiled [`FilePattern`], ready to test many paths cheaply.
pub struct CompiledPattern {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl CompiledPattern {
    pub fn compile(pattern: &FilePattern) -> Result<Self> {
        let include = if pattern.include.is_empty() {
            None
        } else {
            Some(build_glob_set(&pattern.include)?)
        };
        let exclude = build_glob_set(&pattern.exclude)?;
        Ok(Self { include, exclude })
    }

    /// Whether `path` should be copied: matches an include glob (or there
    /// are none), and matches no exclude glob.
    pub fn is_included(&self, path: &str) -> bool {
        let included = match &self.include {
            Some(set) => set.is_match(path),
            None => true,
        };
        included && !self.exclude.is_match(path)
    }

    /// Filters an iterator of candidate paths down to the ones that pass
    /// this pattern, preserving order.
    pub fn filter<'a, I: IntoIterator<Item = &'a str>>(&self, paths: I) -> Vec<&'a str> {
        paths.into_iter().filter(|p| self.is_included(p)).collect()
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for raw in patterns {
        let glob = Glob::new(raw).map_err(|e| {
            stacked_errors::Error::from_err(ErrorKind::InvalidPlan(format!(
                "invalid glob pattern {raw:?}: {e}"
            )))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| stacked_errors::Error::from_err(ErrorKind::InvalidPlan(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(include: &[&str], exclude: &[&str]) -> CompiledPattern {
        let fp = FilePattern {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        };
        CompiledPattern::compile(&fp).unwrap()
    }

    #[test]
    fn empty_include_passes_everything() {
        let p = pattern(&[], &[]);
        assert!(p.is_included("src/main.rs"));
        assert!(p.is_included("README.md"));
    }

    #[test]
    fn include_restricts_to_matches() {
        let p = pattern(&["**/*.rs"], &[]);
        assert!(p.is_included("src/main.rs"));
        assert!(!p.is_included("README.md"));
    }

    #[test]
    fn exclude_overrides_include() {
        let p = pattern(&["**/*.rs"], &["**/generated/**"]);
        assert!(p.is_included("src/main.rs"));
        assert!(!p.is_included("src/generated/foo.rs"));
    }

    #[test]
    fn filter_preserves_order() {
        let p = pattern(&["*.txt"], &[]);
        let result = p.filter(["a.txt", "b.rs", "c.txt"]);
        assert_eq!(result, vec!["a.txt", "c.txt"]);
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let fp = FilePattern {
            include: vec!["[".to_string()],
            exclude: vec![],
        };
        assert!(CompiledPattern::compile(&fp).is_err());
    }
}
