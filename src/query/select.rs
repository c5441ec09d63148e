// SELECT statement model.
//
// Only the shapes the planner rewrites get structure: the select list, the
// FROM list, ORDER BY / GROUP BY / LIMIT. Filter expressions are carried as
// rendered text; plugins only ever append conjuncts to them.

use std::fmt;

use crate::query::expr::ValueExpr;
use crate::query::template::QueryTemplate;

/// A table reference in the FROM list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub db: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(db: Option<&str>, name: &str, alias: Option<&str>) -> Self {
        TableRef {
            db: db.map(str::to_string),
            name: name.to_string(),
            alias: alias.map(str::to_string),
        }
    }

    /// The name other clauses refer to this table by.
    pub fn correlation_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        if let Some(db) = &self.db {
            out.push_str(db);
            out.push('.');
        }
        out.push_str(&self.name);
        if let Some(alias) = &self.alias {
            out.push_str(" AS ");
            out.push_str(alias);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

/// One entry of the FROM list. The first entry has no join spec; later
/// entries are either comma-joined (`join` = None) or explicit joins with an
/// optional ON condition carried as rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromEntry {
    pub table: TableRef,
    pub join: Option<(JoinKind, Option<String>)>,
}

/// An ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: ValueExpr,
    pub desc: bool,
}

impl OrderTerm {
    pub fn to_sql(&self) -> String {
        if self.desc {
            format!("{} DESC", self.expr.factor_sql())
        } else {
            self.expr.factor_sql()
        }
    }
}

/// The statement the plugin pipeline rewrites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectStmt {
    pub distinct: bool,
    pub select_list: Vec<ValueExpr>,
    pub from: Vec<FromEntry>,
    /// Rendered filter text; plugins append conjuncts via `and_where`.
    pub where_clause: Option<String>,
    pub group_by: Vec<ValueExpr>,
    pub having: Option<String>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<u64>,
}

impl SelectStmt {
    /// Conjoin another filter onto the WHERE clause.
    pub fn and_where(&mut self, cond: &str) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => format!("({existing}) AND {cond}"),
            None => cond.to_string(),
        });
    }

    /// True if any select-list entry is a set function.
    pub fn has_aggregate(&self) -> bool {
        self.select_list.iter().any(ValueExpr::is_aggregate)
    }

    /// Distinct table references, first-occurrence order.
    pub fn table_refs(&self) -> Vec<&TableRef> {
        self.from.iter().map(|e| &e.table).collect()
    }

    pub fn to_sql(&self) -> String {
        let mut out = String::from("SELECT ");
        if self.distinct {
            out.push_str("DISTINCT ");
        }
        let items: Vec<String> = self.select_list.iter().map(ValueExpr::to_sql).collect();
        out.push_str(&items.join(", "));
        if !self.from.is_empty() {
            out.push_str(" FROM ");
            for (i, entry) in self.from.iter().enumerate() {
                if i > 0 {
                    match &entry.join {
                        Some((kind, on)) => {
                            out.push(' ');
                            out.push_str(kind.keyword());
                            out.push(' ');
                            out.push_str(&entry.table.to_sql());
                            if let Some(on) = on {
                                out.push_str(" ON ");
                                out.push_str(on);
                            }
                            continue;
                        }
                        None => out.push_str(", "),
                    }
                }
                out.push_str(&entry.table.to_sql());
            }
        }
        if let Some(w) = &self.where_clause {
            out.push_str(" WHERE ");
            out.push_str(w);
        }
        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            let terms: Vec<String> = self.group_by.iter().map(|e| e.factor_sql()).collect();
            out.push_str(&terms.join(", "));
        }
        if let Some(h) = &self.having {
            out.push_str(" HAVING ");
            out.push_str(h);
        }
        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            let terms: Vec<String> = self.order_by.iter().map(OrderTerm::to_sql).collect();
            out.push_str(&terms.join(", "));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        out
    }

    /// Render into a restartable template with chunk placeholders intact.
    pub fn to_template(&self) -> QueryTemplate {
        QueryTemplate::from_sql(&self.to_sql())
    }
}

impl fmt::Display for SelectStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple() -> SelectStmt {
        SelectStmt {
            select_list: vec![ValueExpr::column("ra"), ValueExpr::column("decl")],
            from: vec![FromEntry {
                table: TableRef::new(None, "Object", None),
                join: None,
            }],
            where_clause: Some("ra > 10".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn renders_simple_select() {
        assert_eq!(simple().to_sql(), "SELECT ra, decl FROM Object WHERE ra > 10");
    }

    #[test]
    fn and_where_parenthesizes_existing() {
        let mut s = simple();
        s.and_where("decl < 0");
        assert_eq!(
            s.to_sql(),
            "SELECT ra, decl FROM Object WHERE (ra > 10) AND decl < 0"
        );
    }

    #[test]
    fn renders_join_and_order() {
        let mut s = simple();
        s.from.push(FromEntry {
            table: TableRef::new(None, "Source", Some("s")),
            join: Some((JoinKind::Inner, Some("s.objectId = Object.id".to_string()))),
        });
        s.order_by.push(OrderTerm {
            expr: ValueExpr::column("ra"),
            desc: true,
        });
        s.limit = Some(5);
        assert_eq!(
            s.to_sql(),
            "SELECT ra, decl FROM Object JOIN Source AS s ON s.objectId = Object.id \
             WHERE ra > 10 ORDER BY ra DESC LIMIT 5"
        );
    }
}
