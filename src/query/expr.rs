// Value expressions appearing in select lists, GROUP BY and ORDER BY.

use std::fmt;

/// Set functions the aggregate rewrite understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggFunc::Count),
            "SUM" => Some(AggFunc::Sum),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// A possibly-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub db: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn bare(column: impl Into<String>) -> Self {
        ColumnRef {
            db: None,
            table: None,
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(db) = &self.db {
            write!(f, "{db}.")?;
        }
        if let Some(table) = &self.table {
            write!(f, "{table}.")?;
        }
        write!(f, "{}", self.column)
    }
}

/// The factor of one select-list entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueFactor {
    Column(ColumnRef),
    /// `*` or `t.*`.
    Star { table: Option<String> },
    /// A literal constant, already rendered.
    Literal(String),
    /// A set function over one argument expression.
    Agg {
        func: AggFunc,
        distinct: bool,
        arg: Box<ValueExpr>,
    },
    /// Any other function call, carried through unmodified.
    Func { name: String, args: Vec<ValueExpr> },
    /// An expression the lowering left opaque (arithmetic, CASE, ...),
    /// rendered verbatim.
    Raw(String),
}

/// One select-list entry: a factor plus optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueExpr {
    pub factor: ValueFactor,
    pub alias: Option<String>,
}

impl ValueExpr {
    pub fn column(column: impl Into<String>) -> Self {
        ValueExpr {
            factor: ValueFactor::Column(ColumnRef::bare(column)),
            alias: None,
        }
    }

    pub fn star() -> Self {
        ValueExpr {
            factor: ValueFactor::Star { table: None },
            alias: None,
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        ValueExpr {
            factor: ValueFactor::Raw(text.into()),
            alias: None,
        }
    }

    pub fn agg(func: AggFunc, arg: ValueExpr) -> Self {
        ValueExpr {
            factor: ValueFactor::Agg {
                func,
                distinct: false,
                arg: Box::new(arg),
            },
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// True when the factor is a set function.
    pub fn is_aggregate(&self) -> bool {
        matches!(self.factor, ValueFactor::Agg { .. })
    }

    /// Name this entry contributes to the output schema: the alias when
    /// present, otherwise the rendered factor.
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(a) => a.clone(),
            None => self.factor_sql(),
        }
    }

    pub fn factor_sql(&self) -> String {
        match &self.factor {
            ValueFactor::Column(c) => c.to_string(),
            ValueFactor::Star { table: Some(t) } => format!("{t}.*"),
            ValueFactor::Star { table: None } => "*".to_string(),
            ValueFactor::Literal(text) | ValueFactor::Raw(text) => text.clone(),
            ValueFactor::Agg {
                func,
                distinct,
                arg,
            } => {
                if *distinct {
                    format!("{}(DISTINCT {})", func.name(), arg.factor_sql())
                } else {
                    format!("{}({})", func.name(), arg.factor_sql())
                }
            }
            ValueFactor::Func { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.factor_sql()).collect();
                format!("{}({})", name, rendered.join(", "))
            }
        }
    }

    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(a) => format!("{} AS {a}", self.factor_sql()),
            None => self.factor_sql(),
        }
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_column_and_alias() {
        let e = ValueExpr::column("ra").with_alias("ra_deg");
        assert_eq!(e.to_sql(), "ra AS ra_deg");
        assert_eq!(e.output_name(), "ra_deg");
    }

    #[test]
    fn render_aggregate() {
        let e = ValueExpr::agg(AggFunc::Avg, ValueExpr::column("flux"));
        assert_eq!(e.to_sql(), "AVG(flux)");
        assert!(e.is_aggregate());
    }

    #[test]
    fn qualified_column() {
        let c = ColumnRef {
            db: Some("sky".into()),
            table: Some("o".into()),
            column: "decl".into(),
        };
        assert_eq!(c.to_string(), "sky.o.decl");
    }
}
