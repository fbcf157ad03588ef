// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Markup parsing and writing for [`Document`]s.
//!
//! Attributes are stored namespace-expanded: `sync:request` with
//! `xmlns:sync="urn:confsync:schema"` in scope becomes an attribute whose
//! namespace is the URI. Prefix declarations are remembered on the document
//! so a parse/write round trip keeps the original prefixes.
//!
//! Text nodes are dropped: this data model carries everything in attributes.

use std::collections::HashMap;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::document::{Document, NodeId};
use crate::error::SyncError;

/// Parse a document from a markup string.
pub fn parse_str(input: &str) -> Result<Document, SyncError> {
    let mut reader = Reader::from_str(input);

    let mut doc: Option<Document> = None;
    let mut stack: Vec<NodeId> = Vec::new();
    // innermost-last chain of prefix -> URI scopes
    let mut scopes: Vec<HashMap<String, String>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                open_element(&e, &mut doc, &mut stack, &mut scopes)?;
            }
            Ok(Event::Empty(e)) => {
                open_element(&e, &mut doc, &mut stack, &mut scopes)?;
                stack.pop();
                scopes.pop();
            }
            Ok(Event::End(_)) => {
                stack.pop();
                scopes.pop();
            }
            Ok(Event::Eof) => break,
            // text, comments, declarations and processing instructions are
            // irrelevant to the attribute-based data model
            Ok(_) => {}
            Err(e) => return Err(SyncError::Xml(e.to_string())),
        }
    }

    doc.ok_or_else(|| SyncError::Xml("no root element".into()))
}

/// Read and parse a document from a file.
pub async fn read_file(path: impl AsRef<Path>) -> Result<Document, SyncError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_str(&content)
}

fn open_element(
    e: &quick_xml::events::BytesStart<'_>,
    doc: &mut Option<Document>,
    stack: &mut Vec<NodeId>,
    scopes: &mut Vec<HashMap<String, String>>,
) -> Result<(), SyncError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

    // first pass: raw attributes, collecting namespace declarations
    let mut raw: Vec<(String, String)> = Vec::new();
    let mut scope: HashMap<String, String> = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SyncError::Xml(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| SyncError::Xml(err.to_string()))?
            .into_owned();
        if key == "xmlns" {
            // default namespace applies to element names, which we keep verbatim
            continue;
        }
        if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
            continue;
        }
        raw.push((key, value));
    }

    let node = match doc {
        None => {
            let mut d = Document::new(name);
            let root = d.root();
            *doc = Some(d);
            root
        }
        Some(d) => {
            let parent = *stack
                .last()
                .ok_or_else(|| SyncError::Xml("multiple root elements".into()))?;
            d.append_child(parent, name)
        }
    };
    let d = doc.as_mut().ok_or_else(|| SyncError::Xml("no document".into()))?;
    for (prefix, uri) in &scope {
        d.declare_prefix(prefix.clone(), uri.clone());
    }
    scopes.push(scope);

    // second pass: resolve prefixed attribute names against the scope chain
    for (key, value) in raw {
        match key.split_once(':') {
            Some(("xml", _)) => {}
            Some((prefix, local)) => {
                let uri = scopes
                    .iter()
                    .rev()
                    .find_map(|s| s.get(prefix))
                    .ok_or_else(|| {
                        SyncError::Xml(format!("undeclared namespace prefix `{prefix}`"))
                    })?
                    .clone();
                d.set_attr(node, Some(&uri), local, value);
            }
            None => d.set_attr(node, None, &key, value),
        }
    }

    stack.push(node);
    Ok(())
}

/// Write a document back to markup. Namespace declarations are emitted on
/// the root element; URIs without a recorded prefix get a generated one.
pub fn to_xml_string(doc: &Document) -> String {
    let mut doc = doc.clone();
    doc.ensure_prefixes();

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    write_node(&doc, doc.root(), true, &mut out);
    out.push('\n');
    out
}

fn write_node(doc: &Document, id: NodeId, is_root: bool, out: &mut String) {
    out.push('<');
    out.push_str(doc.name(id));
    if is_root {
        for (prefix, uri) in doc.prefixes() {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
            push_escaped(uri, out);
            out.push('"');
        }
    }
    for attr in doc.attrs(id) {
        out.push(' ');
        if let Some(uri) = &attr.ns {
            // present after ensure_prefixes
            if let Some(prefix) = doc.prefix_for_uri(uri) {
                out.push_str(prefix);
                out.push(':');
            }
        }
        out.push_str(&attr.local);
        out.push_str("=\"");
        push_escaped(&attr.value, out);
        out.push('"');
    }

    let children = doc.children(id);
    if children.is_empty() {
        out.push_str(" />");
    } else {
        out.push('>');
        for child in children {
            write_node(doc, child, false, out);
        }
        out.push_str("</");
        out.push_str(doc.name(id));
        out.push('>');
    }
}

fn push_escaped(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<root xmlns:sync="urn:confsync:schema" sync:dsn="sqlite://test.db">
  <job name="JOB1" sync:request="SELECT name FROM job">
    <component name="C1" />
  </job>
</root>"#;

    #[test]
    fn test_parse_expands_namespaces() {
        let doc = parse_str(SAMPLE).unwrap();
        let root = doc.root();
        assert_eq!(doc.name(root), "root");
        assert_eq!(
            doc.attr(root, Some("urn:confsync:schema"), "dsn"),
            Some("sqlite://test.db")
        );
        let job = doc.children(root)[0];
        assert_eq!(doc.attr(job, None, "name"), Some("JOB1"));
        assert_eq!(
            doc.attr(job, Some("urn:confsync:schema"), "request"),
            Some("SELECT name FROM job")
        );
    }

    #[test]
    fn test_round_trip_is_structurally_equal() {
        let doc = parse_str(SAMPLE).unwrap();
        let written = to_xml_string(&doc);
        let reparsed = parse_str(&written).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn test_round_trip_keeps_prefix() {
        let doc = parse_str(SAMPLE).unwrap();
        let written = to_xml_string(&doc);
        assert!(written.contains("xmlns:sync=\"urn:confsync:schema\""));
        assert!(written.contains("sync:dsn="));
    }

    #[test]
    fn test_escaping() {
        let mut doc = Document::new("r");
        let root = doc.root();
        doc.set_attr(root, None, "q", "a<b & \"c\"");
        let written = to_xml_string(&doc);
        assert!(written.contains("a&lt;b &amp; &quot;c&quot;"));
        let reparsed = parse_str(&written).unwrap();
        assert_eq!(reparsed.attr(reparsed.root(), None, "q"), Some("a<b & \"c\""));
    }

    #[test]
    fn test_undeclared_prefix_is_an_error() {
        let err = parse_str(r#"<root db:request="SELECT 1" />"#).unwrap_err();
        assert!(matches!(err, SyncError::Xml(_)));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(parse_str(""), Err(SyncError::Xml(_))));
    }

    #[test]
    fn test_generated_prefix_for_undeclared_uri() {
        let mut doc = Document::new("r");
        let root = doc.root();
        doc.set_attr(root, Some("urn:other"), "k", "v");
        let written = to_xml_string(&doc);
        assert!(written.contains("xmlns:ns1=\"urn:other\""));
        assert!(written.contains("ns1:k=\"v\""));
    }
}
