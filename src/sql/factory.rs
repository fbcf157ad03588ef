// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schema-driven materialization from a relational source.
//!
//! Reading walks the schema tree: a node with a `sync:request` template is
//! expanded (paths, key/value lookups, clock functions) into a query, and
//! every returned row becomes one copy of the node in the result, columns
//! landing as attributes. Nodes without a template are copied as-is. Child
//! templates run once per materialized parent, so `{../@name}` in a child
//! query addresses the parent row.
//!
//! A cleanup pass then evaluates the remaining path placeholders, applies
//! `sync:if` keep/drop conditions and strips the engine attributes that have
//! done their job, leaving only the post-synchronization statements and flags
//! behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{AnyPool, Column, Row};
use tracing::{debug, error, info};

use crate::document::{Attr, Document, NodeId};
use crate::error::SyncError;
use crate::eval::{self, PathMode};
use crate::factory::Factory;
use crate::schema::{
    ConnectionParameters, SchemaDocument, APP_STATE_STATUS_KEY, IF_KEY, LIMIT_KEY, REQUEST_KEY,
    SCHEMA_NS, SYNC_ERROR_KEY, SYNC_OK_KEY,
};
use crate::session::{KeyValueSession, KeyValueTable};
use crate::shutdown::ShutdownToken;

use super::{column_text, execute_statement, fetch_rows, open_pool};

/// Name of the scratch element appended while a child query is generated,
/// so relative paths in the template resolve against the right parent.
const SCRATCH_ELEMENT: &str = "child";

pub struct SqlFactory {
    schema: SchemaDocument,
    pool: AnyPool,
    session: Arc<dyn KeyValueSession>,
    has_success_action: bool,
}

impl SqlFactory {
    /// Connect to the source declared on the schema root.
    pub async fn new(
        schema: SchemaDocument,
        session: Arc<dyn KeyValueSession>,
    ) -> Result<Self, SyncError> {
        let params = ConnectionParameters::from_schema(&schema)?;
        let pool = open_pool(&params).await?;
        let has_success_action = schema.has_success_action();
        Ok(Self {
            schema,
            pool,
            session,
            has_success_action,
        })
    }

    pub fn schema(&self) -> &SchemaDocument {
        &self.schema
    }

    /// Look up a configuration value declared inside the schema itself.
    pub fn configuration_value(&self, expr: &str) -> Result<Option<String>, SyncError> {
        self.schema.configuration_value(expr)
    }

    /// Materialize one schema node under `parent`, recursively.
    fn insert_element<'a>(
        &'a self,
        doc: &'a mut Document,
        parent: NodeId,
        schema_node: NodeId,
        cancel: &'a ShutdownToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let schema_doc = self.schema.document();

            let Some(request) = self.schema.request(schema_node) else {
                // no query: the node is static content, copied as-is
                let node = doc.append_shallow_from(parent, schema_doc, schema_node);
                for child in schema_doc.children(schema_node) {
                    self.insert_element(&mut *doc, node, child, cancel).await?;
                }
                return Ok(());
            };

            let statement = self.build_statement(doc, parent, schema_node, request).await?;
            debug!(element = schema_doc.name(schema_node), %statement, "running query");
            let rows = fetch_rows(&self.pool, &statement).await?;
            let limit = self.schema.limit(schema_node);

            let mut materialized = Vec::new();
            for row in rows.iter().take(limit) {
                let node = doc.append_shallow_from(parent, schema_doc, schema_node);
                doc.remove_attr(node, Some(SCHEMA_NS), REQUEST_KEY);
                doc.remove_attr(node, Some(SCHEMA_NS), LIMIT_KEY);
                for (index, column) in row.columns().iter().enumerate() {
                    let name = column.name();
                    let value = column_text(row, index);
                    if self.schema.is_owned_attribute(schema_node, name) {
                        doc.set_attr(node, None, name, value);
                    } else {
                        doc.set_attr(node, Some(SCHEMA_NS), name, value);
                    }
                }
                materialized.push(node);
            }

            for node in materialized {
                for child in schema_doc.children(schema_node) {
                    self.insert_element(&mut *doc, node, child, cancel).await?;
                }
            }
            Ok(())
        })
    }

    /// Expand a query template into an executable statement: paths against
    /// the materialized parent (falling back to the schema declaration), then
    /// key/value lookups, then clock functions. Unresolved paths are errors
    /// here because the statement would otherwise query with a literal
    /// placeholder.
    async fn build_statement(
        &self,
        doc: &mut Document,
        parent: NodeId,
        schema_node: NodeId,
        request: &str,
    ) -> Result<String, SyncError> {
        let scratch = doc.append_child(parent, SCRATCH_ELEMENT);
        let expanded = eval::expand_paths_layered(
            doc,
            scratch,
            self.schema.document(),
            schema_node,
            request,
            PathMode::Strict,
        );
        doc.detach(scratch);
        let statement = expanded?;
        let statement = eval::expand_key_values(self.session.as_ref(), &statement).await?;
        Ok(eval::expand_clock_functions(&statement))
    }

    /// Post-materialization pass: evaluate leftover path placeholders, drop
    /// elements whose `sync:if` condition came out false, strip the engine
    /// attributes that only drive materialization.
    fn cleanup(&self, doc: &mut Document) -> Result<(), SyncError> {
        let mut dropped = Vec::new();
        for id in doc.descendants(doc.root()) {
            let attrs: Vec<Attr> = doc.attrs(id).to_vec();
            let mut drop_element = false;
            let mut updates = Vec::new();
            for attr in &attrs {
                let value = eval::expand_paths(doc, id, &attr.value, PathMode::Lenient)?;
                if attr.ns.as_deref() == Some(SCHEMA_NS)
                    && attr.local == IF_KEY
                    && (value.eq_ignore_ascii_case("false") || value == "0")
                {
                    drop_element = true;
                    break;
                }
                updates.push((attr.ns.clone(), attr.local.clone(), value));
            }
            if drop_element {
                dropped.push(id);
                continue;
            }
            for (ns, local, value) in updates {
                let keep = ns.as_deref() != Some(SCHEMA_NS)
                    || local == SYNC_OK_KEY
                    || local == SYNC_ERROR_KEY
                    || local == APP_STATE_STATUS_KEY;
                if keep {
                    doc.set_attr(id, ns.as_deref(), &local, value);
                } else {
                    doc.remove_attr(id, ns.as_deref(), &local);
                }
            }
        }
        for id in dropped {
            doc.detach(id);
        }
        Ok(())
    }

    /// Record the outcome of a mirror attempt: write `key=value` application
    /// state flags, then run the matching post-synchronization statements.
    async fn flag_synchronization(&self, doc: &Document, success: bool) -> Result<(), SyncError> {
        for (node, raw) in doc.find_attributes(Some(SCHEMA_NS), APP_STATE_STATUS_KEY) {
            let value = eval::expand_paths(doc, node, &raw, PathMode::Lenient)?;
            match value.split_once('=') {
                Some((key, state)) if !key.trim().is_empty() => {
                    self.session
                        .set(KeyValueTable::ApplicationState, key.trim(), state.trim())
                        .await?;
                }
                _ => error!(%value, "applicationstatestatus is not of the form key=value"),
            }
        }

        let statement_key = if success { SYNC_OK_KEY } else { SYNC_ERROR_KEY };
        for (node, raw) in doc.find_attributes(Some(SCHEMA_NS), statement_key) {
            let statement = eval::expand_paths(doc, node, &raw, PathMode::Lenient)?;
            execute_statement(&self.pool, &statement).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Factory for SqlFactory {
    async fn read(
        &self,
        cancel: &ShutdownToken,
        _optional: bool,
    ) -> Result<Option<Document>, SyncError> {
        let schema_doc = self.schema.document();
        let mut doc = Document::shallow_from(schema_doc, schema_doc.root());
        let root = doc.root();
        for child in schema_doc.children(schema_doc.root()) {
            self.insert_element(&mut doc, root, child, cancel).await?;
        }
        self.cleanup(&mut doc)?;
        info!(
            document = %crate::document::summarize(&doc),
            "source materialized"
        );
        Ok(Some(doc))
    }

    fn has_success_action(&self) -> bool {
        self.has_success_action
    }

    async fn on_success(&self, doc: &Document) -> Result<(), SyncError> {
        self.flag_synchronization(doc, true).await
    }

    async fn on_failure(&self, doc: &Document) -> Result<(), SyncError> {
        self.flag_synchronization(doc, false).await
    }
}
