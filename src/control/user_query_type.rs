// Statement classification.
//
// A small set of directive statements is recognized by prefix match and
// handled outside the executor pipeline; everything else routes through the
// planner as an ordinary SELECT.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::global::QueryId;
use crate::query::{SelectStmt, ValueFactor};

static SUBMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*SUBMIT\s+(.+)$").expect("submit regex"));
static SELECT_RESULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+\*\s+FROM\s+QSERV_RESULT\s*\(\s*(\d+)\s*\)\s*;?\s*$")
        .expect("select result regex")
});
static FLUSH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*FLUSH\s+QSERV_CHUNKS_CACHE(?:\s+FOR\s+`?([A-Za-z0-9_]+)`?)?\s*;?\s*$")
        .expect("flush regex")
});
static KILL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*KILL\s+(?:QUERY\s+|CONNECTION\s+)?(\d+)\s*;?\s*$").expect("kill regex")
});
static CANCEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*CANCEL\s+(\d+)\s*;?\s*$").expect("cancel regex"));
static PROCESSLIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SHOW\s+(FULL\s+)?PROCESSLIST\s*;?\s*$").expect("processlist regex")
});
static SELECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\b").expect("select regex"));

/// What kind of statement arrived, with its extracted arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQueryKind {
    /// Ordinary SELECT for the planner.
    Select,
    /// `SUBMIT <select>`: run asynchronously, carrying the stripped query.
    Submit(String),
    /// `SELECT * FROM QSERV_RESULT(<id>)`: fetch a submitted query's rows.
    SelectResult(QueryId),
    /// `FLUSH QSERV_CHUNKS_CACHE [FOR db]`.
    FlushChunksCache(Option<String>),
    /// `KILL [QUERY|CONNECTION] <id>`.
    Kill(QueryId),
    /// `CANCEL <id>`.
    Cancel(QueryId),
    /// `SHOW [FULL] PROCESSLIST`.
    ProcessList { full: bool },
    /// Anything else; rejected before planning.
    Unsupported,
}

impl UserQueryKind {
    pub fn classify(sql: &str) -> UserQueryKind {
        if let Some(caps) = SELECT_RESULT_RE.captures(sql) {
            if let Ok(id) = caps[1].parse() {
                return UserQueryKind::SelectResult(id);
            }
        }
        if let Some(caps) = SUBMIT_RE.captures(sql) {
            return UserQueryKind::Submit(caps[1].trim().to_string());
        }
        if let Some(caps) = FLUSH_RE.captures(sql) {
            return UserQueryKind::FlushChunksCache(caps.get(1).map(|m| m.as_str().to_string()));
        }
        if let Some(caps) = KILL_RE.captures(sql) {
            if let Ok(id) = caps[1].parse() {
                return UserQueryKind::Kill(id);
            }
        }
        if let Some(caps) = CANCEL_RE.captures(sql) {
            if let Ok(id) = caps[1].parse() {
                return UserQueryKind::Cancel(id);
            }
        }
        if let Some(caps) = PROCESSLIST_RE.captures(sql) {
            return UserQueryKind::ProcessList {
                full: caps.get(1).is_some(),
            };
        }
        if SELECT_RE.is_match(sql) {
            return UserQueryKind::Select;
        }
        UserQueryKind::Unsupported
    }
}

/// Detect `SELECT COUNT(*) FROM <table>` with no other clauses: answerable
/// from recorded row counts without dispatching anything. Returns the
/// `(db, table)` pair.
pub fn simple_count_star(stmt: &SelectStmt) -> Option<(Option<String>, String)> {
    if stmt.select_list.len() != 1
        || !stmt.group_by.is_empty()
        || stmt.where_clause.is_some()
        || stmt.having.is_some()
        || !stmt.order_by.is_empty()
        || stmt.distinct
        || stmt.from.len() != 1
    {
        return None;
    }
    match &stmt.select_list[0].factor {
        ValueFactor::Agg {
            func: crate::query::AggFunc::Count,
            distinct: false,
            arg,
        } if matches!(arg.factor, ValueFactor::Star { .. }) => {
            let table = &stmt.from[0].table;
            Some((table.db.clone(), table.name.clone()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_select;

    #[test]
    fn classifies_directives() {
        assert_eq!(
            UserQueryKind::classify("SELECT * FROM QSERV_RESULT(42)"),
            UserQueryKind::SelectResult(42)
        );
        assert_eq!(
            UserQueryKind::classify("SUBMIT SELECT ra FROM Object"),
            UserQueryKind::Submit("SELECT ra FROM Object".to_string())
        );
        assert_eq!(
            UserQueryKind::classify("FLUSH QSERV_CHUNKS_CACHE"),
            UserQueryKind::FlushChunksCache(None)
        );
        assert_eq!(
            UserQueryKind::classify("FLUSH QSERV_CHUNKS_CACHE FOR sky"),
            UserQueryKind::FlushChunksCache(Some("sky".to_string()))
        );
        assert_eq!(UserQueryKind::classify("KILL 17"), UserQueryKind::Kill(17));
        assert_eq!(
            UserQueryKind::classify("KILL QUERY 17;"),
            UserQueryKind::Kill(17)
        );
        assert_eq!(
            UserQueryKind::classify("CANCEL 23"),
            UserQueryKind::Cancel(23)
        );
        assert_eq!(
            UserQueryKind::classify("SHOW PROCESSLIST"),
            UserQueryKind::ProcessList { full: false }
        );
        assert_eq!(
            UserQueryKind::classify("show full processlist;"),
            UserQueryKind::ProcessList { full: true }
        );
    }

    #[test]
    fn plain_select_and_garbage() {
        assert_eq!(
            UserQueryKind::classify("SELECT ra FROM Object WHERE ra > 2"),
            UserQueryKind::Select
        );
        assert_eq!(
            UserQueryKind::classify("DROP TABLE Object"),
            UserQueryKind::Unsupported
        );
    }

    #[test]
    fn case_insensitive_prefixes() {
        assert_eq!(
            UserQueryKind::classify("submit select 1 from T"),
            UserQueryKind::Submit("select 1 from T".to_string())
        );
        assert_eq!(
            UserQueryKind::classify("flush qserv_chunks_cache for `sky`"),
            UserQueryKind::FlushChunksCache(Some("sky".to_string()))
        );
    }

    #[test]
    fn count_star_shortcut_detection() {
        let stmt = parse_select("SELECT COUNT(*) FROM sky.Object").unwrap();
        assert_eq!(
            simple_count_star(&stmt),
            Some((Some("sky".to_string()), "Object".to_string()))
        );
        let with_where = parse_select("SELECT COUNT(*) FROM Object WHERE ra > 1").unwrap();
        assert_eq!(simple_count_star(&with_where), None);
        let count_col = parse_select("SELECT COUNT(ra) FROM Object").unwrap();
        assert_eq!(simple_count_star(&count_col), None);
    }
}
