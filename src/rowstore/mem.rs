// In-memory row store.
//
// Holds chunk tables as plain row vectors and evaluates the statement shapes
// the planner actually generates: projections, simple AND-ed comparisons,
// the five set functions with optional GROUP BY, and a trailing LIMIT.
// Anything outside that surface is an explicit error rather than a silently
// wrong result.

use std::collections::HashMap;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::rowstore::row::{Row, Value};
use crate::rowstore::{QueryResult, RowStore};

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*SELECT\s+(?P<list>.+?)\s+FROM\s+(?P<table>[A-Za-z0-9_.]+)(?:\s+AS\s+\w+)?(?P<rest>.*)$",
    )
    .expect("select regex")
});
static WHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bWHERE\s+(?P<pred>.+?)(?:\s+GROUP\s+BY\b.*|\s+ORDER\s+BY\b.*|\s+LIMIT\b.*|\s*)$")
        .expect("where regex")
});
static GROUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bGROUP\s+BY\s+(?P<keys>.+?)(?:\s+ORDER\s+BY\b.*|\s+LIMIT\b.*|\s*)$")
        .expect("group regex")
});
static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bLIMIT\s+(\d+)\s*$").expect("limit regex"));
static AGG_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(COUNT|SUM|MIN|MAX|AVG)\(\s*(\*|[A-Za-z0-9_.]+)\s*\)(?:\s+AS\s+([A-Za-z0-9_]+))?$")
        .expect("agg item regex")
});
static COL_ITEM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^([A-Za-z0-9_.]+)(?:\s+AS\s+([A-Za-z0-9_]+))?$").expect("col item regex")
});
static PRED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\(?\s*([A-Za-z0-9_.]+)\s*(=|<>|!=|>=|<=|>|<)\s*('[^']*'|-?\d+(?:\.\d+)?)\s*\)?$",
    )
    .expect("predicate regex")
});

struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// Chunk tables keyed by `(db, table)`.
pub struct MemRowStore {
    tables: DashMap<(String, String), Table>,
}

impl MemRowStore {
    pub fn new() -> Self {
        MemRowStore {
            tables: DashMap::new(),
        }
    }

    pub fn register_table(
        &self,
        db: &str,
        table: &str,
        columns: Vec<&str>,
        rows: Vec<Row>,
    ) {
        self.tables.insert(
            (db.to_string(), table.to_string()),
            Table {
                columns: columns.into_iter().map(str::to_string).collect(),
                rows,
            },
        );
    }
}

impl Default for MemRowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn parse_literal(text: &str) -> Value {
    if let Some(stripped) = text.strip_prefix('\'') {
        return Value::Text(stripped.trim_end_matches('\'').to_string());
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Text(text.to_string())
}

enum SelectItem {
    All,
    Column { name: String, output: String },
    Agg {
        func: String,
        arg: Option<String>,
        output: String,
    },
}

fn parse_select_item(item: &str) -> Result<SelectItem> {
    let item = item.trim();
    if item == "*" {
        return Ok(SelectItem::All);
    }
    if let Some(caps) = AGG_ITEM_RE.captures(item) {
        let func = caps[1].to_ascii_uppercase();
        let arg_text = caps[2].to_string();
        let arg = if arg_text == "*" {
            None
        } else {
            Some(last_segment(&arg_text).to_string())
        };
        let output = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| item.to_string());
        return Ok(SelectItem::Agg { func, arg, output });
    }
    if let Some(caps) = COL_ITEM_RE.captures(item) {
        let name = last_segment(&caps[1]).to_string();
        let output = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| name.clone());
        return Ok(SelectItem::Column { name, output });
    }
    Err(Error::RowStore(format!("unsupported select item: {item}")))
}

struct Predicate {
    column: String,
    op: String,
    value: Value,
}

impl Predicate {
    fn matches(&self, v: &Value) -> bool {
        use std::cmp::Ordering::*;
        if v.is_null() {
            return false;
        }
        let ord = v.compare(&self.value);
        match self.op.as_str() {
            "=" => ord == Equal,
            "<>" | "!=" => ord != Equal,
            ">" => ord == Greater,
            ">=" => ord != Less,
            "<" => ord == Less,
            "<=" => ord != Greater,
            _ => false,
        }
    }
}

fn parse_predicates(pred_text: &str) -> Result<Vec<Predicate>> {
    static AND_SPLIT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\s+AND\s+").expect("and regex"));
    let mut out = Vec::new();
    for conjunct in AND_SPLIT.split(pred_text) {
        let caps = PRED_RE
            .captures(conjunct.trim())
            .ok_or_else(|| Error::RowStore(format!("unsupported predicate: {conjunct}")))?;
        out.push(Predicate {
            column: last_segment(&caps[1]).to_string(),
            op: caps[2].to_string(),
            value: parse_literal(&caps[3]),
        });
    }
    Ok(out)
}

impl RowStore for MemRowStore {
    fn execute(&self, db: &str, sql: &str) -> Result<QueryResult> {
        let caps = SELECT_RE
            .captures(sql)
            .ok_or_else(|| Error::RowStore(format!("unsupported statement: {sql}")))?;
        let table_text = caps.name("table").map(|m| m.as_str()).unwrap_or_default();
        let (table_db, table_name) = match table_text.split_once('.') {
            Some((d, t)) => (d.to_string(), t.to_string()),
            None => (db.to_string(), table_text.to_string()),
        };
        let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();

        let table = self
            .tables
            .get(&(table_db.clone(), table_name.clone()))
            .ok_or_else(|| Error::RowStore(format!("no such table: {table_db}.{table_name}")))?;

        let col_index: HashMap<&str, usize> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        let lookup = |name: &str| -> Result<usize> {
            col_index
                .get(name)
                .copied()
                .ok_or_else(|| Error::RowStore(format!("no such column: {name}")))
        };

        // Row filter.
        let predicates = match WHERE_RE.captures(rest) {
            Some(w) => parse_predicates(w.name("pred").map(|m| m.as_str()).unwrap_or(""))?,
            None => Vec::new(),
        };
        let mut filtered: Vec<&Row> = Vec::new();
        'rows: for row in &table.rows {
            for p in &predicates {
                let idx = lookup(&p.column)?;
                if !p.matches(&row[idx]) {
                    continue 'rows;
                }
            }
            filtered.push(row);
        }

        let list_text = caps.name("list").map(|m| m.as_str()).unwrap_or_default();
        let items: Vec<SelectItem> = list_text
            .split(',')
            .map(parse_select_item)
            .collect::<Result<_>>()?;
        let has_agg = items.iter().any(|i| matches!(i, SelectItem::Agg { .. }));

        let mut result = if has_agg {
            let group_cols: Vec<String> = match GROUP_RE.captures(rest) {
                Some(g) => g
                    .name("keys")
                    .map(|m| m.as_str())
                    .unwrap_or("")
                    .split(',')
                    .map(|k| last_segment(k.trim()).to_string())
                    .collect(),
                None => Vec::new(),
            };
            aggregate(&items, &group_cols, &filtered, &lookup)?
        } else {
            project(&items, &table.columns, &filtered, &lookup)?
        };

        if let Some(caps) = LIMIT_RE.captures(rest) {
            let limit: usize = caps[1]
                .parse()
                .map_err(|_| Error::RowStore("bad LIMIT".to_string()))?;
            result.rows.truncate(limit);
        }
        Ok(result)
    }
}

fn project(
    items: &[SelectItem],
    table_columns: &[String],
    rows: &[&Row],
    lookup: &dyn Fn(&str) -> Result<usize>,
) -> Result<QueryResult> {
    let mut columns = Vec::new();
    let mut indices: Vec<usize> = Vec::new();
    for item in items {
        match item {
            SelectItem::All => {
                for (i, c) in table_columns.iter().enumerate() {
                    columns.push(c.clone());
                    indices.push(i);
                }
            }
            SelectItem::Column { name, output } => {
                columns.push(output.clone());
                indices.push(lookup(name)?);
            }
            SelectItem::Agg { .. } => {
                return Err(Error::RowStore(
                    "aggregate in projection path".to_string(),
                ))
            }
        }
    }
    let out_rows = rows
        .iter()
        .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
        .collect();
    Ok(QueryResult::new(columns, out_rows))
}

fn aggregate(
    items: &[SelectItem],
    group_cols: &[String],
    rows: &[&Row],
    lookup: &dyn Fn(&str) -> Result<usize>,
) -> Result<QueryResult> {
    let key_indices: Vec<usize> = group_cols
        .iter()
        .map(|c| lookup(c))
        .collect::<Result<_>>()?;

    // Group preserving first-seen order.
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: Vec<Vec<&Row>> = Vec::new();
    for row in rows {
        let key: Vec<Value> = key_indices.iter().map(|i| row[*i].clone()).collect();
        match order.iter().position(|k| *k == key) {
            Some(pos) => groups[pos].push(row),
            None => {
                order.push(key);
                groups.push(vec![row]);
            }
        }
    }
    // A global aggregate over no rows still yields one row.
    if groups.is_empty() && group_cols.is_empty() {
        order.push(Vec::new());
        groups.push(Vec::new());
    }

    let mut columns = Vec::new();
    for item in items {
        match item {
            SelectItem::All => {
                return Err(Error::RowStore(
                    "SELECT * cannot be mixed with aggregates".to_string(),
                ))
            }
            SelectItem::Column { output, .. } | SelectItem::Agg { output, .. } => {
                columns.push(output.clone())
            }
        }
    }

    let mut out_rows = Vec::new();
    for (key, members) in order.iter().zip(groups.iter()) {
        let mut row = Vec::new();
        for item in items {
            match item {
                SelectItem::All => unreachable!(),
                SelectItem::Column { name, .. } => {
                    // Grouping key: constant within the group.
                    let pos = group_cols
                        .iter()
                        .position(|g| g == name)
                        .ok_or_else(|| {
                            Error::RowStore(format!(
                                "column {name} is neither aggregated nor grouped"
                            ))
                        })?;
                    row.push(key[pos].clone());
                }
                SelectItem::Agg { func, arg, .. } => {
                    let value = match (func.as_str(), arg) {
                        ("COUNT", None) => Value::Int(members.len() as i64),
                        ("COUNT", Some(col)) => {
                            let idx = lookup(col)?;
                            Value::Int(
                                members.iter().filter(|r| !r[idx].is_null()).count() as i64
                            )
                        }
                        (name, Some(col)) => {
                            let idx = lookup(col)?;
                            fold_agg(name, members.iter().map(|r| &r[idx]))
                        }
                        (name, None) => {
                            return Err(Error::RowStore(format!("{name}(*) is not valid")))
                        }
                    };
                    row.push(value);
                }
            }
        }
        out_rows.push(row);
    }
    Ok(QueryResult::new(columns, out_rows))
}

fn fold_agg<'a>(func: &str, values: impl Iterator<Item = &'a Value>) -> Value {
    let mut sum = Value::Null;
    let mut min = Value::Null;
    let mut max = Value::Null;
    let mut count: i64 = 0;
    for v in values {
        if v.is_null() {
            continue;
        }
        sum = sum.add(v);
        count += 1;
        if min.is_null() || v.compare(&min) == std::cmp::Ordering::Less {
            min = v.clone();
        }
        if max.is_null() || v.compare(&max) == std::cmp::Ordering::Greater {
            max = v.clone();
        }
    }
    match func {
        "SUM" => sum,
        "MIN" => min,
        "MAX" => max,
        "AVG" => {
            if count == 0 {
                Value::Null
            } else {
                sum.divide(&Value::Int(count))
            }
        }
        _ => Value::Null,
    }
}
