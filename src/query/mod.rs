// The frontend's own representation of a SELECT statement.
//
// The external parser produces its AST; the lowering layer in `crate::parser`
// converts that into these types, which is what the planning plugins mutate.
// Rendering a statement yields a `QueryTemplate` whose placeholders are later
// bound to chunk numbers.

pub mod expr;
pub mod select;
pub mod template;

pub use expr::{AggFunc, ColumnRef, ValueExpr, ValueFactor};
pub use select::{FromEntry, JoinKind, OrderTerm, SelectStmt, TableRef};
pub use template::{QueryTemplate, Token};
