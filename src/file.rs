// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! File-backed factory and builder, plus a literal-string factory.
//!
//! [`FileFactory`] and [`FileBuilder`] together form the copy side of a
//! repository: the builder mirrors the main document to disk, the factory
//! reads it back when the main source is unreachable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::document::Document;
use crate::error::SyncError;
use crate::factory::{Builder, Factory};
use crate::shutdown::ShutdownToken;
use crate::xml;

/// Reads a document from a file on every call.
pub struct FileFactory {
    path: PathBuf,
}

impl FileFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Factory for FileFactory {
    async fn read(
        &self,
        _cancel: &ShutdownToken,
        optional: bool,
    ) -> Result<Option<Document>, SyncError> {
        if optional && !self.path.exists() {
            debug!(path = %self.path.display(), "optional source file does not exist");
            return Ok(None);
        }
        let doc = xml::read_file(&self.path).await?;
        Ok(Some(doc))
    }
}

/// Parses a document from a fixed string. Mostly useful for embedded
/// defaults and tests.
pub struct StringFactory {
    content: String,
}

impl StringFactory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl Factory for StringFactory {
    async fn read(
        &self,
        _cancel: &ShutdownToken,
        _optional: bool,
    ) -> Result<Option<Document>, SyncError> {
        Ok(Some(xml::parse_str(&self.content)?))
    }
}

/// Writes documents to a file, atomically.
pub struct FileBuilder {
    path: PathBuf,
}

impl FileBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl Builder for FileBuilder {
    /// Serialize to a sibling temporary file, then rename over the target so
    /// a crash mid-write never leaves a truncated copy behind.
    async fn write(&self, doc: &Document, _cancel: &ShutdownToken) -> Result<(), SyncError> {
        let content = xml::to_xml_string(doc);
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new("root");
        let job = doc.append_child(doc.root(), "job");
        doc.set_attr(job, None, "name", "JOB1");
        doc
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.xml");
        let token = ShutdownToken::never();

        let doc = sample();
        FileBuilder::new(&path).write(&doc, &token).await.unwrap();
        let read = FileFactory::new(&path)
            .read(&token, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, read);
        assert!(!path.with_extension("xml.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_optional_vs_required() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileFactory::new(dir.path().join("absent.xml"));
        let token = ShutdownToken::never();

        assert!(factory.read(&token, true).await.unwrap().is_none());
        assert!(matches!(
            factory.read(&token, false).await,
            Err(SyncError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_string_factory() {
        let factory = StringFactory::new(r#"<root><job name="JOB1" /></root>"#);
        let doc = factory
            .read(&ShutdownToken::never(), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, sample());
    }

    #[tokio::test]
    async fn test_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.xml");
        let token = ShutdownToken::never();
        let builder = FileBuilder::new(&path);

        builder.write(&sample(), &token).await.unwrap();
        let mut updated = sample();
        let job = updated.children(updated.root())[0];
        updated.set_attr(job, None, "name", "JOB2");
        builder.write(&updated, &token).await.unwrap();

        let read = FileFactory::new(&path)
            .read(&token, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, updated);
    }
}
