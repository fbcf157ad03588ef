// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Locating schema files by name.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SyncError;

/// Resolves a schema name against an ordered list of root directories.
///
/// Deployments keep schemas in a few well-known places (an installation
/// directory, a site-local override directory); the first root that contains
/// the named file wins. Absolute paths bypass the roots entirely.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    roots: Vec<PathBuf>,
}

impl SchemaResolver {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn resolve(&self, name: impl AsRef<Path>) -> Result<PathBuf, SyncError> {
        let name = name.as_ref();
        if name.is_absolute() {
            return Ok(name.to_path_buf());
        }
        for root in &self.roots {
            let candidate = root.join(name);
            if candidate.exists() {
                debug!(schema = %candidate.display(), "schema resolved");
                return Ok(candidate);
            }
        }
        Err(SyncError::Schema(format!(
            "schema `{}` not found under {} configured director{}",
            name.display(),
            self.roots.len(),
            if self.roots.len() == 1 { "y" } else { "ies" }
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_root_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("jobs.xml"), "<root />").unwrap();
        std::fs::write(second.path().join("jobs.xml"), "<root />").unwrap();

        let resolver = SchemaResolver::new([first.path(), second.path()]);
        assert_eq!(
            resolver.resolve("jobs.xml").unwrap(),
            first.path().join("jobs.xml")
        );
    }

    #[test]
    fn test_falls_through_to_later_roots() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("jobs.xml"), "<root />").unwrap();

        let resolver = SchemaResolver::new([first.path(), second.path()]);
        assert_eq!(
            resolver.resolve("jobs.xml").unwrap(),
            second.path().join("jobs.xml")
        );
    }

    #[test]
    fn test_absolute_path_bypasses_roots() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SchemaResolver::new([dir.path()]);
        let absolute = dir.path().join("anywhere.xml");
        assert_eq!(resolver.resolve(&absolute).unwrap(), absolute);
    }

    #[test]
    fn test_missing_schema_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SchemaResolver::new([dir.path()]);
        assert!(matches!(
            resolver.resolve("absent.xml"),
            Err(SyncError::Schema(_))
        ));
    }
}
