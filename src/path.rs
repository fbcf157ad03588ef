// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Path expressions over [`Document`]s.
//!
//! A small, deliberate subset of the XPath abbreviated syntax, enough for
//! the expressions that appear in schemas:
//!
//! ```text
//! @name                   attribute of the context node
//! ../@name                attribute of the parent
//! component/@kind         attribute of a child element
//! /root/job/@name         absolute path from the root
//! //@sync:request         attribute anywhere in the tree
//! //job/@name             element anywhere, then its attribute
//! ```
//!
//! Steps are `.`, `..` and child element names; an optional final step
//! selects an attribute (`@local` or `@prefix:local`). Attribute prefixes
//! resolve through the document prefix table, with the engine namespace
//! prefix always available. Selecting an element rather than an attribute
//! yields an empty string because elements carry no text in this model.

use crate::document::{Document, NodeId};
use crate::error::SyncError;
use crate::schema::{SCHEMA_NS, SCHEMA_PREFIX};

#[derive(Debug, Clone, PartialEq)]
enum Anchor {
    /// Relative to the context node.
    Context,
    /// From the document root.
    Root,
    /// From every node in the tree (`//`).
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Current,
    Parent,
    Child(String),
}

#[derive(Debug, Clone)]
struct PathExpr {
    anchor: Anchor,
    steps: Vec<Step>,
    /// (prefix, local) of a final attribute step
    attr: Option<(Option<String>, String)>,
}

fn parse(expr: &str) -> Result<PathExpr, SyncError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(SyncError::PathEval("empty path expression".into()));
    }

    let (anchor, rest) = if let Some(rest) = expr.strip_prefix("//") {
        (Anchor::Descendant, rest)
    } else if let Some(rest) = expr.strip_prefix('/') {
        (Anchor::Root, rest)
    } else {
        (Anchor::Context, expr)
    };

    let mut steps = Vec::new();
    let mut attr = None;
    let segments: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('/').collect()
    };
    let count = segments.len();
    for (i, segment) in segments.into_iter().enumerate() {
        if segment.is_empty() {
            return Err(SyncError::PathEval(format!("empty step in `{expr}`")));
        }
        if let Some(name) = segment.strip_prefix('@') {
            if i + 1 != count {
                return Err(SyncError::PathEval(format!(
                    "attribute step must be last in `{expr}`"
                )));
            }
            attr = Some(match name.split_once(':') {
                Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
                None => (None, name.to_string()),
            });
        } else {
            steps.push(match segment {
                "." => Step::Current,
                ".." => Step::Parent,
                name => Step::Child(name.to_string()),
            });
        }
    }

    Ok(PathExpr {
        anchor,
        steps,
        attr,
    })
}

fn resolve_prefix(doc: &Document, prefix: &str) -> Result<String, SyncError> {
    if prefix == SCHEMA_PREFIX {
        return Ok(SCHEMA_NS.to_string());
    }
    doc.uri_for_prefix(prefix)
        .map(str::to_string)
        .ok_or_else(|| SyncError::PathEval(format!("unknown namespace prefix `{prefix}`")))
}

fn push_unique(frontier: &mut Vec<NodeId>, id: NodeId) {
    if !frontier.contains(&id) {
        frontier.push(id);
    }
}

/// All values matched by `expr`, in document order.
pub fn select_all(
    doc: &Document,
    context: NodeId,
    expr: &str,
) -> Result<Vec<String>, SyncError> {
    let parsed = parse(expr)?;

    let mut steps = parsed.steps.as_slice();
    let mut frontier: Vec<NodeId> = match parsed.anchor {
        Anchor::Context => vec![context],
        Anchor::Descendant => doc.descendants(doc.root()),
        Anchor::Root => {
            // the first named step addresses the root element itself
            match steps.split_first() {
                Some((Step::Child(name), tail)) => {
                    let matched = if doc.name(doc.root()) == name.as_str() {
                        vec![doc.root()]
                    } else {
                        Vec::new()
                    };
                    steps = tail;
                    matched
                }
                _ => vec![doc.root()],
            }
        }
    };

    for step in steps {
        let mut next = Vec::new();
        for id in frontier {
            match step {
                Step::Current => push_unique(&mut next, id),
                Step::Parent => {
                    if let Some(parent) = doc.parent(id) {
                        push_unique(&mut next, parent);
                    }
                }
                Step::Child(name) => {
                    for child in doc.children(id) {
                        if doc.name(child) == name.as_str() {
                            push_unique(&mut next, child);
                        }
                    }
                }
            }
        }
        frontier = next;
    }

    match &parsed.attr {
        Some((prefix, local)) => {
            let ns = match prefix {
                Some(p) => Some(resolve_prefix(doc, p)?),
                None => None,
            };
            Ok(frontier
                .into_iter()
                .filter_map(|id| doc.attr(id, ns.as_deref(), local).map(str::to_string))
                .collect())
        }
        // elements carry no text content in this model
        None => Ok(frontier.into_iter().map(|_| String::new()).collect()),
    }
}

/// First value matched by `expr`, in document order. `Ok(None)` when the
/// expression is valid but matches nothing.
pub fn select_first(
    doc: &Document,
    context: NodeId,
    expr: &str,
) -> Result<Option<String>, SyncError> {
    Ok(select_all(doc, context, expr)?.into_iter().next())
}
