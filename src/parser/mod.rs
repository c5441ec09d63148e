// Lowering from the external SQL parser's AST into the crate's query IR.
//
// Grammar and tokenization are entirely the parser crate's problem; this
// layer only reshapes a parsed SELECT into `SelectStmt`, rejecting statement
// forms the executor does not handle. Filter and join conditions are carried
// as rendered text since plugins never rewrite inside them.

use sqlparser::ast::{
    Distinct, DuplicateTreatment, Expr, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, LimitClause, OrderByKind, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{Error, Result};
use crate::query::{
    AggFunc, ColumnRef, FromEntry, JoinKind, OrderTerm, SelectStmt, TableRef, ValueExpr,
    ValueFactor,
};

/// Parse one SELECT statement into the planner IR.
pub fn parse_select(sql: &str) -> Result<SelectStmt> {
    let dialect = GenericDialect {};
    let mut statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| Error::Parse(e.to_string()))?;
    if statements.len() != 1 {
        return Err(Error::Parse(format!(
            "expected a single statement, found {}",
            statements.len()
        )));
    }
    match statements.remove(0) {
        Statement::Query(query) => {
            let mut stmt = match *query.body {
                SetExpr::Select(select) => lower_select(*select)?,
                _ => {
                    return Err(Error::Parse(
                        "only plain SELECT queries are supported".to_string(),
                    ))
                }
            };
            if let Some(order_by) = query.order_by {
                match order_by.kind {
                    OrderByKind::Expressions(exprs) => {
                        for oe in exprs {
                            stmt.order_by.push(OrderTerm {
                                expr: lower_expr(&oe.expr),
                                desc: oe.options.asc == Some(false),
                            });
                        }
                    }
                    _ => return Err(Error::Parse("unsupported ORDER BY form".to_string())),
                }
            }
            if let Some(limit_clause) = query.limit_clause {
                match limit_clause {
                    LimitClause::LimitOffset {
                        limit: Some(limit_expr),
                        ..
                    } => {
                        let n = limit_expr
                            .to_string()
                            .parse::<u64>()
                            .map_err(|_| Error::Parse("non-numeric LIMIT".to_string()))?;
                        stmt.limit = Some(n);
                    }
                    LimitClause::LimitOffset { limit: None, .. } => {}
                    _ => return Err(Error::Parse("unsupported LIMIT form".to_string())),
                }
            }
            Ok(stmt)
        }
        _ => Err(Error::Parse(
            "only SELECT statements reach the executor".to_string(),
        )),
    }
}

fn lower_select(select: Select) -> Result<SelectStmt> {
    let mut stmt = SelectStmt {
        distinct: matches!(select.distinct, Some(Distinct::Distinct)),
        ..Default::default()
    };
    for item in select.projection {
        stmt.select_list.push(lower_select_item(item)?);
    }
    if stmt.select_list.is_empty() {
        return Err(Error::Parse("empty select list".to_string()));
    }
    for twj in select.from {
        lower_from(&mut stmt, twj)?;
    }
    stmt.where_clause = select.selection.map(|e| e.to_string());
    match select.group_by {
        GroupByExpr::Expressions(exprs, _) => {
            for e in exprs {
                stmt.group_by.push(lower_expr(&e));
            }
        }
        _ => return Err(Error::Parse("unsupported GROUP BY form".to_string())),
    }
    stmt.having = select.having.map(|e| e.to_string());
    Ok(stmt)
}

fn lower_select_item(item: SelectItem) -> Result<ValueExpr> {
    Ok(match item {
        SelectItem::UnnamedExpr(expr) => lower_expr(&expr),
        SelectItem::ExprWithAlias { expr, alias } => {
            lower_expr(&expr).with_alias(alias.value)
        }
        SelectItem::Wildcard(_) => ValueExpr::star(),
        SelectItem::QualifiedWildcard(kind, _) => {
            let mut table = kind.to_string();
            if let Some(stripped) = table.strip_suffix(".*") {
                table = stripped.to_string();
            }
            ValueExpr {
                factor: ValueFactor::Star { table: Some(table) },
                alias: None,
            }
        }
    })
}

/// Lower an expression to a value expression. Shapes the planner rewrites
/// (columns, set functions) get structure; everything else is carried as
/// rendered text.
fn lower_expr(expr: &Expr) -> ValueExpr {
    match expr {
        Expr::Identifier(ident) => ValueExpr {
            factor: ValueFactor::Column(ColumnRef::bare(ident.value.clone())),
            alias: None,
        },
        Expr::CompoundIdentifier(parts) => {
            let names: Vec<String> = parts.iter().map(|p| p.value.clone()).collect();
            let factor = match names.as_slice() {
                [table, column] => ValueFactor::Column(ColumnRef {
                    db: None,
                    table: Some(table.clone()),
                    column: column.clone(),
                }),
                [db, table, column] => ValueFactor::Column(ColumnRef {
                    db: Some(db.clone()),
                    table: Some(table.clone()),
                    column: column.clone(),
                }),
                _ => ValueFactor::Raw(expr.to_string()),
            };
            ValueExpr {
                factor,
                alias: None,
            }
        }
        Expr::Value(_) => ValueExpr {
            factor: ValueFactor::Literal(expr.to_string()),
            alias: None,
        },
        Expr::Function(func) => lower_function(func, expr),
        _ => ValueExpr::raw(expr.to_string()),
    }
}

fn lower_function(func: &sqlparser::ast::Function, whole: &Expr) -> ValueExpr {
    let name = func
        .name
        .0
        .last()
        .map(|part| part.to_string())
        .unwrap_or_default();
    let (args, distinct) = match &func.args {
        FunctionArguments::List(list) => (
            list.args.as_slice(),
            matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct)),
        ),
        FunctionArguments::None => (&[][..], false),
        _ => return ValueExpr::raw(whole.to_string()),
    };
    if let Some(agg) = AggFunc::from_name(&name) {
        // Set functions take exactly one argument; COUNT also accepts `*`.
        if args.len() == 1 {
            let arg = match &args[0] {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(lower_expr(e)),
                FunctionArg::Unnamed(FunctionArgExpr::Wildcard) if agg == AggFunc::Count => {
                    Some(ValueExpr::star())
                }
                _ => None,
            };
            if let Some(arg) = arg {
                return ValueExpr {
                    factor: ValueFactor::Agg {
                        func: agg,
                        distinct,
                        arg: Box::new(arg),
                    },
                    alias: None,
                };
            }
        }
        return ValueExpr::raw(whole.to_string());
    }
    let lowered: Vec<ValueExpr> = args
        .iter()
        .filter_map(|a| match a {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(lower_expr(e)),
            _ => None,
        })
        .collect();
    if lowered.len() == args.len() {
        ValueExpr {
            factor: ValueFactor::Func {
                name,
                args: lowered,
            },
            alias: None,
        }
    } else {
        ValueExpr::raw(whole.to_string())
    }
}

fn lower_from(stmt: &mut SelectStmt, twj: TableWithJoins) -> Result<()> {
    let first = lower_table_factor(&twj.relation)?;
    stmt.from.push(FromEntry {
        table: first,
        join: None,
    });
    for join in twj.joins {
        use sqlparser::ast::{JoinConstraint, JoinOperator};
        let (kind, constraint) = match join.join_operator {
            JoinOperator::Inner(c) => (JoinKind::Inner, c),
            JoinOperator::LeftOuter(c) => (JoinKind::Left, c),
            JoinOperator::RightOuter(c) => (JoinKind::Right, c),
            _ => return Err(Error::Parse("unsupported join type".to_string())),
        };
        let on = match constraint {
            JoinConstraint::On(expr) => Some(expr.to_string()),
            JoinConstraint::None => None,
            _ => return Err(Error::Parse("unsupported join constraint".to_string())),
        };
        stmt.from.push(FromEntry {
            table: lower_table_factor(&join.relation)?,
            join: Some((kind, on)),
        });
    }
    Ok(())
}

fn lower_table_factor(factor: &TableFactor) -> Result<TableRef> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let parts: Vec<String> = name.0.iter().map(|p| p.to_string()).collect();
            let (db, table) = match parts.as_slice() {
                [table] => (None, table.clone()),
                [db, table] => (Some(db.clone()), table.clone()),
                _ => {
                    return Err(Error::Parse(format!(
                        "table name has too many qualifiers: {name}"
                    )))
                }
            };
            Ok(TableRef {
                db,
                name: table,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
            })
        }
        _ => Err(Error::Parse(
            "derived tables and subqueries are not supported".to_string(),
        )),
    }
}
