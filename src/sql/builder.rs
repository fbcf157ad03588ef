// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schema-driven writes to a relational destination.
//!
//! Writing is merge-then-execute: the document is merged with the schema so
//! every data node is paired with the `sync:request` template that knows how
//! to persist it, then the merged tree is walked and each template, expanded
//! against its node, is executed as a statement.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::AnyPool;
use tracing::{debug, info, warn};

use crate::document::{Document, NodeId};
use crate::error::SyncError;
use crate::eval::{self, PathMode};
use crate::factory::Builder;
use crate::schema::{ConnectionParameters, SchemaDocument, REQUEST_KEY, SCHEMA_NS};
use crate::shutdown::ShutdownToken;

use super::{execute_statement, open_pool};

pub struct SqlBuilder {
    schema: SchemaDocument,
    pool: AnyPool,
    /// One-shot durability downgrade for the next write.
    async_commit: AtomicBool,
}

impl SqlBuilder {
    /// Connect to the destination declared on the schema root.
    pub async fn new(schema: SchemaDocument) -> Result<Self, SyncError> {
        let params = ConnectionParameters::from_schema(&schema)?;
        let pool = open_pool(&params).await?;
        Ok(Self {
            schema,
            pool,
            async_commit: AtomicBool::new(false),
        })
    }

    pub fn schema(&self) -> &SchemaDocument {
        &self.schema
    }
}

#[async_trait]
impl Builder for SqlBuilder {
    async fn write(&self, doc: &Document, cancel: &ShutdownToken) -> Result<(), SyncError> {
        let merged = merge_with_schema(&self.schema, doc);

        if self.async_commit.swap(false, Ordering::SeqCst) {
            // best effort, the destination may not know the setting
            if let Err(e) = execute_statement(&self.pool, "SET synchronous_commit TO off").await {
                warn!(error = %e, "could not enable asynchronous commit");
            }
        }

        let mut executed = 0usize;
        for node in merged.descendants(merged.root()) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(request) = merged.attr(node, Some(SCHEMA_NS), REQUEST_KEY) else {
                continue;
            };
            if request.is_empty() {
                continue;
            }
            let statement = eval::expand_paths(&merged, node, request, PathMode::Strict)?;
            debug!(element = merged.name(node), %statement, "running statement");
            execute_statement(&self.pool, &statement).await?;
            executed += 1;
        }
        info!(statements = executed, "document written");
        Ok(())
    }

    fn set_asynchronous_commit(&self) {
        self.async_commit.store(true, Ordering::SeqCst);
    }
}

/// Merge a document with the schema that knows how to persist it.
///
/// The merged tree follows the schema shape: schema attributes first, data
/// attributes overlaid on top (empty data values never erase a schema
/// default). A schema child matches every same-named data child, producing
/// one merged node per data node. A schema child with no match and no query
/// template is static content and is cloned, minus any templated subtrees,
/// so its own descendants still merge against nothing.
pub(crate) fn merge_with_schema(schema: &SchemaDocument, doc: &Document) -> Document {
    let schema_doc = schema.document();
    let mut merged = Document::shallow_from(schema_doc, schema_doc.root());
    let merged_root = merged.root();
    overlay_attributes(&mut merged, merged_root, doc, doc.root());
    merge_children(
        schema,
        schema_doc.root(),
        doc,
        doc.root(),
        &mut merged,
        merged_root,
    );
    merged
}

fn overlay_attributes(merged: &mut Document, target: NodeId, doc: &Document, node: NodeId) {
    for attr in doc.attrs(node).to_vec() {
        if attr.value.is_empty() {
            info!(
                element = doc.name(node),
                attribute = %attr.local,
                "empty attribute value not merged"
            );
            continue;
        }
        merged.set_attr(target, attr.ns.as_deref(), &attr.local, attr.value);
    }
}

fn merge_children(
    schema: &SchemaDocument,
    schema_node: NodeId,
    doc: &Document,
    doc_node: NodeId,
    merged: &mut Document,
    target: NodeId,
) {
    let schema_doc = schema.document();
    for schema_child in schema_doc.children(schema_node) {
        let name = schema_doc.name(schema_child);
        let matches: Vec<NodeId> = doc
            .children(doc_node)
            .into_iter()
            .filter(|c| doc.name(*c) == name)
            .collect();

        if matches.is_empty() {
            if schema.request(schema_child).is_none() {
                clone_without_requests(schema, schema_child, merged, target);
            }
            continue;
        }
        for doc_child in matches {
            let node = merged.append_shallow_from(target, schema_doc, schema_child);
            overlay_attributes(merged, node, doc, doc_child);
            merge_children(schema, schema_child, doc, doc_child, merged, node);
        }
    }
}

/// Deep-clone a static schema subtree, omitting any descendant that carries
/// a query template: with no data node behind it there is nothing to write.
fn clone_without_requests(
    schema: &SchemaDocument,
    schema_node: NodeId,
    merged: &mut Document,
    target: NodeId,
) {
    let schema_doc = schema.document();
    let node = merged.append_shallow_from(target, schema_doc, schema_node);
    for child in schema_doc.children(schema_node) {
        if schema.request(child).is_none() {
            clone_without_requests(schema, child, merged, node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    const SCHEMA: &str = r#"<root xmlns:sync="urn:confsync:schema" sync:dsn="sqlite://out.db">
  <job sync:request="INSERT INTO job (name, hours) VALUES ('{@name}', {@hours})">
    <component sync:request="INSERT INTO component (name, job) VALUES ('{@name}', '{../@name}')" />
  </job>
  <site code="HQ">
    <line sync:request="INSERT INTO line (code) VALUES ('{@code}')" />
  </site>
</root>"#;

    fn schema() -> SchemaDocument {
        SchemaDocument::from_xml(SCHEMA).unwrap()
    }

    #[test]
    fn test_merge_pairs_data_with_templates() {
        let doc = xml::parse_str(
            r#"<root>
                 <job name="JOB1" hours="8"><component name="C1" /></job>
                 <job name="JOB2" hours="4" />
               </root>"#,
        )
        .unwrap();
        let merged = merge_with_schema(&schema(), &doc);

        let jobs: Vec<NodeId> = merged
            .children(merged.root())
            .into_iter()
            .filter(|n| merged.name(*n) == "job")
            .collect();
        assert_eq!(jobs.len(), 2);
        assert_eq!(merged.attr(jobs[0], None, "name"), Some("JOB1"));
        assert!(merged
            .attr(jobs[0], Some(SCHEMA_NS), REQUEST_KEY)
            .is_some());
        let components = merged.children(jobs[0]);
        assert_eq!(components.len(), 1);
        assert_eq!(merged.attr(components[0], None, "name"), Some("C1"));
        // second job had no component in the data, so none is merged
        assert!(merged.children(jobs[1]).is_empty());
    }

    #[test]
    fn test_merge_keeps_static_content_but_not_templated_subtrees() {
        let doc = xml::parse_str("<root />").unwrap();
        let merged = merge_with_schema(&schema(), &doc);

        let children = merged.children(merged.root());
        // the templated job subtree has no data, the static site survives
        assert_eq!(children.len(), 1);
        assert_eq!(merged.name(children[0]), "site");
        assert_eq!(merged.attr(children[0], None, "code"), Some("HQ"));
        // the templated line under it is omitted too
        assert!(merged.children(children[0]).is_empty());
    }

    #[test]
    fn test_merge_overlay_skips_empty_values() {
        let doc = xml::parse_str(r#"<root><site code="" /></root>"#).unwrap();
        let merged = merge_with_schema(&schema(), &doc);
        let site = merged.children(merged.root())[0];
        assert_eq!(merged.attr(site, None, "code"), Some("HQ"));
    }

    #[test]
    fn test_merged_statement_expands_against_parent() {
        let doc = xml::parse_str(
            r#"<root><job name="JOB1" hours="8"><component name="C1" /></job></root>"#,
        )
        .unwrap();
        let merged = merge_with_schema(&schema(), &doc);
        let job = merged.children(merged.root())[0];
        let component = merged.children(job)[0];
        let request = merged
            .attr(component, Some(SCHEMA_NS), REQUEST_KEY)
            .unwrap();
        let statement =
            eval::expand_paths(&merged, component, request, PathMode::Strict).unwrap();
        assert_eq!(
            statement,
            "INSERT INTO component (name, job) VALUES ('C1', 'JOB1')"
        );
    }
}
