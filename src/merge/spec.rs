// Structured description of the merge step.
//
// The merge SQL text is what gets recorded with the query; this mirror of it
// drives the in-process merge evaluator. Both are produced together by the
// planning pipeline so they cannot drift apart.

use serde::{Deserialize, Serialize};

/// How one output column is computed from the partial-result columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOp {
    /// Copy the partial column (also the grouping path).
    PassThrough,
    /// SUM over partial values; also reconstructs COUNT from partial counts.
    Sum,
    Min,
    Max,
    /// AVG reconstruction: SUM(sum_col) / SUM(cnt_col), computed in the
    /// row-store's native numeric type with no intermediate truncation.
    AvgRatio { sum_col: String, cnt_col: String },
}

/// One output column of the merge step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeColumn {
    pub op: MergeOp,
    /// Name of the partial column this op reads (unused for `AvgRatio`).
    pub input: String,
    /// Output column name in the final result.
    pub output: String,
}

impl MergeColumn {
    pub fn pass_through(name: &str) -> Self {
        MergeColumn {
            op: MergeOp::PassThrough,
            input: name.to_string(),
            output: name.to_string(),
        }
    }
}

/// The whole merge step: columns, grouping, ordering, limit.
///
/// The default spec is the trivial pass-through merge (plain concatenation
/// of partial results).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSpec {
    pub columns: Vec<MergeColumn>,
    /// Grouping key column names (partial-result names).
    pub group_by: Vec<String>,
    /// Output column name plus descending flag.
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<u64>,
    pub distinct: bool,
}

impl MergeSpec {
    /// True when the merge does more than concatenate partials.
    pub fn is_trivial(&self) -> bool {
        self.group_by.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && !self.distinct
            && self
                .columns
                .iter()
                .all(|c| c.op == MergeOp::PassThrough)
    }
}
