// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Template evaluators for query text.
//!
//! Three independent passes expand placeholders inside request templates,
//! applied in this order when a query is generated:
//!
//! 1. **Paths**: `{expr}` resolved against the document being built (and,
//!    during materialization, against the schema node as a second layer)
//! 2. **Key/value tables**: `[%table.key%]` looked up through the
//!    [`KeyValueSession`]
//! 3. **Clock functions**: `LocalNow(fmt)`, `UtcNow(fmt)`,
//!    `LocalNowOffset(fmt,offset)`, `UtcNowOffset(fmt,offset)`
//!
//! Path expansion is strict where the result becomes an SQL statement and
//! lenient in cleanup passes, where an unresolved placeholder is left in
//! place with a warning. Key/value misses are always left in place; only a
//! failing lookup is fatal. Clock functions never fail: malformed arguments
//! keep the original text.

use std::sync::LazyLock;

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use regex::Regex;
use tracing::warn;

use crate::document::{Document, NodeId};
use crate::error::SyncError;
use crate::path;
use crate::session::{KeyValueSession, KeyValueTable};

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^}]*)\}").unwrap());
static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[%(\w+)\.([\w.]+)%\]").unwrap());
static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(LocalNow|UtcNow|LocalNowOffset|UtcNowOffset)\(([^()]*)\)").unwrap()
});

/// How path expansion treats placeholders that match nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Unresolved placeholder is an error.
    Strict,
    /// Unresolved placeholder stays in place, with a warning.
    Lenient,
}

/// Expand `{expr}` placeholders against a single context node.
pub fn expand_paths(
    doc: &Document,
    context: NodeId,
    input: &str,
    mode: PathMode,
) -> Result<String, SyncError> {
    expand_paths_inner(doc, context, None, input, mode)
}

/// Expand `{expr}` placeholders against two layers: the document context
/// first, then the schema node. Used while generating requests, where `{..}`
/// style expressions address the materialized parent row and bare attribute
/// expressions fall back to the schema declaration.
pub fn expand_paths_layered(
    doc: &Document,
    context: NodeId,
    schema: &Document,
    schema_node: NodeId,
    input: &str,
    mode: PathMode,
) -> Result<String, SyncError> {
    expand_paths_inner(doc, context, Some((schema, schema_node)), input, mode)
}

fn expand_paths_inner(
    doc: &Document,
    context: NodeId,
    fallback: Option<(&Document, NodeId)>,
    input: &str,
    mode: PathMode,
) -> Result<String, SyncError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for cap in PATH_RE.captures_iter(input) {
        let whole = cap.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        let expr = &cap[1];
        out.push_str(&input[last..whole.0]);
        last = whole.1;

        let resolved = match lookup(doc, context, fallback, expr) {
            Ok(v) => v,
            Err(e) => match mode {
                PathMode::Strict => return Err(e),
                PathMode::Lenient => {
                    warn!(expr, error = %e, "invalid path expression, keeping placeholder");
                    out.push_str(&input[whole.0..whole.1]);
                    continue;
                }
            },
        };
        match resolved {
            Some(value) => out.push_str(&value),
            None => match mode {
                PathMode::Strict => {
                    return Err(SyncError::PathEval(format!(
                        "path `{expr}` matched nothing in `{input}`"
                    )))
                }
                PathMode::Lenient => {
                    warn!(expr, "path matched nothing, keeping placeholder");
                    out.push_str(&input[whole.0..whole.1]);
                }
            },
        }
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn lookup(
    doc: &Document,
    context: NodeId,
    fallback: Option<(&Document, NodeId)>,
    expr: &str,
) -> Result<Option<String>, SyncError> {
    if let Some(value) = path::select_first(doc, context, expr)? {
        return Ok(Some(value));
    }
    if let Some((schema, node)) = fallback {
        if let Some(value) = path::select_first(schema, node, expr)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Expand `[%table.key%]` placeholders through the key/value session.
///
/// Unknown tables and missing keys are kept in place with a warning; a
/// failing lookup aborts with a database error, because the generated query
/// would silently be wrong otherwise.
pub async fn expand_key_values(
    session: &dyn KeyValueSession,
    input: &str,
) -> Result<String, SyncError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for cap in KEY_VALUE_RE.captures_iter(input) {
        let whole = cap.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        let table_name = &cap[1];
        let key = &cap[2];
        out.push_str(&input[last..whole.0]);
        last = whole.1;

        let Ok(table) = table_name.parse::<KeyValueTable>() else {
            warn!(table = table_name, "unsupported key/value table, keeping placeholder");
            out.push_str(&input[whole.0..whole.1]);
            continue;
        };
        match session.get(table, key).await? {
            Some(value) => out.push_str(&value),
            None => {
                warn!(%table, key, "key not found, keeping placeholder");
                out.push_str(&input[whole.0..whole.1]);
            }
        }
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// Expand clock function calls. Malformed formats or offsets keep the
/// original text.
pub fn expand_clock_functions(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for cap in CLOCK_RE.captures_iter(input) {
        let whole = cap.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        let function = &cap[1];
        let arguments = &cap[2];
        out.push_str(&input[last..whole.0]);
        last = whole.1;

        let rendered = match function {
            "LocalNow" => render(Local::now(), arguments),
            "UtcNow" => render(Utc::now(), arguments),
            "LocalNowOffset" => render_offset(Local::now(), arguments),
            "UtcNowOffset" => render_offset(Utc::now(), arguments),
            _ => None,
        };
        match rendered {
            Some(value) => out.push_str(&value),
            None => {
                warn!(function, arguments, "clock function not expanded");
                out.push_str(&input[whole.0..whole.1]);
            }
        }
    }
    out.push_str(&input[last..]);
    out
}

fn render<Tz: TimeZone>(now: DateTime<Tz>, format: &str) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    use std::fmt::Write;
    let mut s = String::new();
    // an invalid format specifier surfaces as a fmt error, not a panic
    write!(s, "{}", now.format(format)).ok()?;
    Some(s)
}

fn render_offset<Tz: TimeZone>(now: DateTime<Tz>, arguments: &str) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    let (format, offset) = arguments.split_once(',')?;
    let offset = parse_offset(offset)?;
    render(now + offset, format)
}

/// Parse a `[-][d.]hh:mm[:ss]` duration.
fn parse_offset(input: &str) -> Option<ChronoDuration> {
    let input = input.trim();
    let (negative, input) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    let (days, clock) = match input.split_once('.') {
        Some((d, rest)) => (d.parse::<i64>().ok()?, rest),
        None => (0, input),
    };
    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m] => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?, 0),
        [h, m, s] => (
            h.parse::<i64>().ok()?,
            m.parse::<i64>().ok()?,
            s.parse::<i64>().ok()?,
        ),
        _ => return None,
    };
    let total = days * 86_400 + hours * 3_600 + minutes * 60 + seconds;
    Some(ChronoDuration::seconds(if negative { -total } else { total }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA_NS;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn doc() -> Document {
        let mut doc = Document::new("root");
        doc.declare_prefix("sync", SCHEMA_NS);
        let job = doc.append_child(doc.root(), "job");
        doc.set_attr(job, None, "name", "JOB1");
        doc.set_attr(job, Some(SCHEMA_NS), "type", "main");
        doc
    }

    #[test]
    fn test_expand_paths_strict() {
        let doc = doc();
        let job = doc.children(doc.root())[0];
        let out = expand_paths(
            &doc,
            job,
            "SELECT * FROM t WHERE name='{@name}'",
            PathMode::Strict,
        )
        .unwrap();
        assert_eq!(out, "SELECT * FROM t WHERE name='JOB1'");
    }

    #[test]
    fn test_expand_paths_strict_unresolved_is_error() {
        let doc = doc();
        let job = doc.children(doc.root())[0];
        let err = expand_paths(&doc, job, "x={@missing}", PathMode::Strict).unwrap_err();
        assert!(matches!(err, SyncError::PathEval(_)));
    }

    #[test]
    fn test_expand_paths_lenient_keeps_placeholder() {
        let doc = doc();
        let job = doc.children(doc.root())[0];
        let out = expand_paths(&doc, job, "x={@missing} y={@name}", PathMode::Lenient).unwrap();
        assert_eq!(out, "x={@missing} y=JOB1");
    }

    #[test]
    fn test_expand_paths_layered_falls_back_to_schema() {
        let mut result = Document::new("root");
        let parent = result.append_child(result.root(), "job");
        result.set_attr(parent, None, "name", "JOB1");
        let scratch = result.append_child(parent, "child");

        let schema = doc();
        let schema_job = schema.children(schema.root())[0];

        // parent attribute resolves in the document being built
        let out = expand_paths_layered(
            &result,
            scratch,
            &schema,
            schema_job,
            "{../@name}",
            PathMode::Strict,
        )
        .unwrap();
        assert_eq!(out, "JOB1");

        // schema declaration resolves through the fallback layer
        let out = expand_paths_layered(
            &result,
            scratch,
            &schema,
            schema_job,
            "{@sync:type}",
            PathMode::Strict,
        )
        .unwrap();
        assert_eq!(out, "main");
    }

    struct MapSession {
        values: Mutex<HashMap<(KeyValueTable, String), String>>,
        fail: bool,
    }

    impl MapSession {
        fn new(entries: &[(KeyValueTable, &str, &str)]) -> Self {
            let values = entries
                .iter()
                .map(|(t, k, v)| ((*t, k.to_string()), v.to_string()))
                .collect();
            Self {
                values: Mutex::new(values),
                fail: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl KeyValueSession for MapSession {
        async fn get(
            &self,
            table: KeyValueTable,
            key: &str,
        ) -> Result<Option<String>, SyncError> {
            if self.fail {
                return Err(SyncError::database("kv get", "session down"));
            }
            Ok(self.values.lock().get(&(table, key.to_string())).cloned())
        }

        async fn set(
            &self,
            table: KeyValueTable,
            key: &str,
            value: &str,
        ) -> Result<(), SyncError> {
            self.values
                .lock()
                .insert((table, key.to_string()), value.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_expand_key_values() {
        let session = MapSession::new(&[
            (KeyValueTable::ApplicationState, "synchro.job", "42"),
            (KeyValueTable::Config, "site", "lyon"),
        ]);
        let out = expand_key_values(
            &session,
            "WHERE id > [%applicationstate.synchro.job%] AND site = '[%CONFIG.site%]'",
        )
        .await
        .unwrap();
        assert_eq!(out, "WHERE id > 42 AND site = 'lyon'");
    }

    #[tokio::test]
    async fn test_expand_key_values_missing_key_kept() {
        let session = MapSession::new(&[]);
        let input = "WHERE id > [%applicationstate.absent%]";
        assert_eq!(expand_key_values(&session, input).await.unwrap(), input);
    }

    #[tokio::test]
    async fn test_expand_key_values_unknown_table_kept() {
        let session = MapSession::new(&[]);
        let input = "[%machine.id%]";
        assert_eq!(expand_key_values(&session, input).await.unwrap(), input);
    }

    #[tokio::test]
    async fn test_expand_key_values_lookup_failure_is_fatal() {
        let mut session = MapSession::new(&[]);
        session.fail = true;
        let err = expand_key_values(&session, "[%config.site%]")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Database { .. }));
    }

    #[test]
    fn test_clock_functions() {
        let out = expand_clock_functions("d='UtcNow(%Y-%m-%d)'");
        assert!(!out.contains("UtcNow"), "got {out}");
        let year: i32 = out[3..7].parse().unwrap();
        assert!(year >= 2026);
    }

    #[test]
    fn test_clock_offset() {
        let plus = expand_clock_functions("UtcNowOffset(%Y,366.00:00)");
        let base = expand_clock_functions("UtcNow(%Y)");
        let plus: i32 = plus.parse().unwrap();
        let base: i32 = base.parse().unwrap();
        assert_eq!(plus, base + 1);
    }

    #[test]
    fn test_clock_malformed_offset_kept() {
        let input = "UtcNowOffset(%Y,bogus)";
        assert_eq!(expand_clock_functions(input), input);
        let missing = "UtcNowOffset(%Y)";
        assert_eq!(expand_clock_functions(missing), missing);
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("02:30"), Some(ChronoDuration::seconds(9000)));
        assert_eq!(
            parse_offset("1.00:00:05"),
            Some(ChronoDuration::seconds(86_405))
        );
        assert_eq!(parse_offset("-00:01"), Some(ChronoDuration::seconds(-60)));
        assert_eq!(parse_offset("xx"), None);
        assert_eq!(parse_offset("1:2:3:4"), None);
    }
}
