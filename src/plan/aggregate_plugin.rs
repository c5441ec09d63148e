// Aggregate splitting.
//
// Each set function in the select list is split into a parallel expression
// computed per chunk and a merge expression that combines the partials:
//
//   COUNT(x) -> COUNT(x) AS p_cnt   / SUM(p_cnt)
//   SUM(x)   -> SUM(x)   AS p_sum   / SUM(p_sum)
//   MIN(x)   -> MIN(x)   AS p_min   / MIN(p_min)
//   MAX(x)   -> MAX(x)   AS p_max   / MAX(p_max)
//   AVG(x)   -> SUM(x) AS p_sum, COUNT(x) AS p_cnt / SUM(p_sum)/SUM(p_cnt)
//
// The structured merge spec is built alongside the merge statement so the
// in-process merger computes exactly what the recorded merge SQL says.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::merge::spec::{MergeColumn, MergeOp, MergeSpec};
use crate::plan::context::QueryContext;
use crate::plan::plugin::{PhysicalPlan, QueryPlugin};
use crate::query::{AggFunc, ValueExpr, ValueFactor};

pub struct AggregatePlugin {
    name_counts: HashMap<&'static str, usize>,
}

impl AggregatePlugin {
    pub fn new() -> Self {
        AggregatePlugin {
            name_counts: HashMap::new(),
        }
    }

    /// Next partial-column name for a prefix: `p_sum`, then `p_sum_2`, ...
    fn next_name(&mut self, prefix: &'static str) -> String {
        let count = self.name_counts.entry(prefix).or_insert(0);
        *count += 1;
        if *count == 1 {
            prefix.to_string()
        } else {
            format!("{prefix}_{count}")
        }
    }
}

impl Default for AggregatePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for AggregatePlugin {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn apply_physical(&mut self, plan: &mut PhysicalPlan, ctx: &mut QueryContext) -> Result<()> {
        let needs_rewrite = plan.parallel.has_aggregate()
            || !plan.parallel.group_by.is_empty()
            || plan.parallel.distinct;
        if !needs_rewrite {
            // Trivial merge: partial results concatenate unchanged.
            ctx.merge_spec = MergeSpec::default();
            plan.merge.select_list = vec![ValueExpr::star()];
            return Ok(());
        }

        let original = std::mem::take(&mut plan.parallel.select_list);
        let mut parallel_list: Vec<ValueExpr> = Vec::new();
        let mut merge_list: Vec<ValueExpr> = Vec::new();
        let mut spec = MergeSpec {
            distinct: plan.parallel.distinct,
            ..Default::default()
        };

        for entry in &original {
            let output = entry.output_name();
            match &entry.factor {
                ValueFactor::Agg {
                    func,
                    distinct,
                    arg,
                } => {
                    if *distinct {
                        return Err(Error::Planning(format!(
                            "{}(DISTINCT ...) cannot be split across chunks",
                            func.name()
                        )));
                    }
                    match func {
                        AggFunc::Count => {
                            let n = self.next_name("p_cnt");
                            parallel_list.push(
                                ValueExpr::agg(AggFunc::Count, (**arg).clone()).with_alias(&n),
                            );
                            merge_list
                                .push(ValueExpr::raw(format!("SUM({n})")).with_alias(&output));
                            spec.columns.push(MergeColumn {
                                op: MergeOp::Sum,
                                input: n,
                                output,
                            });
                        }
                        AggFunc::Sum => {
                            let n = self.next_name("p_sum");
                            parallel_list.push(
                                ValueExpr::agg(AggFunc::Sum, (**arg).clone()).with_alias(&n),
                            );
                            merge_list
                                .push(ValueExpr::raw(format!("SUM({n})")).with_alias(&output));
                            spec.columns.push(MergeColumn {
                                op: MergeOp::Sum,
                                input: n,
                                output,
                            });
                        }
                        AggFunc::Min => {
                            let n = self.next_name("p_min");
                            parallel_list.push(
                                ValueExpr::agg(AggFunc::Min, (**arg).clone()).with_alias(&n),
                            );
                            merge_list
                                .push(ValueExpr::raw(format!("MIN({n})")).with_alias(&output));
                            spec.columns.push(MergeColumn {
                                op: MergeOp::Min,
                                input: n,
                                output,
                            });
                        }
                        AggFunc::Max => {
                            let n = self.next_name("p_max");
                            parallel_list.push(
                                ValueExpr::agg(AggFunc::Max, (**arg).clone()).with_alias(&n),
                            );
                            merge_list
                                .push(ValueExpr::raw(format!("MAX({n})")).with_alias(&output));
                            spec.columns.push(MergeColumn {
                                op: MergeOp::Max,
                                input: n,
                                output,
                            });
                        }
                        AggFunc::Avg => {
                            let sum_col = self.next_name("p_sum");
                            let cnt_col = self.next_name("p_cnt");
                            parallel_list.push(
                                ValueExpr::agg(AggFunc::Sum, (**arg).clone())
                                    .with_alias(&sum_col),
                            );
                            parallel_list.push(
                                ValueExpr::agg(AggFunc::Count, (**arg).clone())
                                    .with_alias(&cnt_col),
                            );
                            merge_list.push(
                                ValueExpr::raw(format!("SUM({sum_col})/SUM({cnt_col})"))
                                    .with_alias(&output),
                            );
                            spec.columns.push(MergeColumn {
                                op: MergeOp::AvgRatio {
                                    sum_col: sum_col.clone(),
                                    cnt_col: cnt_col.clone(),
                                },
                                input: sum_col,
                                output,
                            });
                        }
                    }
                }
                _ => {
                    // Plain column or expression: computed per chunk, passed
                    // through the merge, and usable as a grouping key.
                    parallel_list.push(entry.clone());
                    merge_list.push(ValueExpr::column(&output));
                    spec.columns.push(MergeColumn::pass_through(&output));
                }
            }
        }

        // Map GROUP BY terms onto parallel output names for the merge side.
        let mut merge_keys = Vec::new();
        for key in &plan.parallel.group_by {
            let key_sql = key.factor_sql();
            let matched = original.iter().find(|e| {
                e.alias.as_deref() == Some(key_sql.as_str()) || e.factor_sql() == key_sql
            });
            match matched {
                Some(e) => merge_keys.push(e.output_name()),
                None => {
                    return Err(Error::Planning(format!(
                        "GROUP BY term {key_sql} must appear in the select list"
                    )))
                }
            }
        }
        for k in &merge_keys {
            plan.merge.group_by.push(ValueExpr::column(k));
        }
        spec.group_by = merge_keys;

        plan.parallel.select_list = parallel_list;
        plan.merge.select_list = merge_list;
        plan.merge.distinct = plan.parallel.distinct;
        plan.has_merge = true;
        ctx.merge_spec = spec;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::PartitionMap;
    use crate::parser::parse_select;
    use std::sync::Arc;

    fn run(sql: &str) -> (PhysicalPlan, QueryContext) {
        let stmt = parse_select(sql).unwrap();
        let mut plan = PhysicalPlan::new(stmt);
        let mut ctx = QueryContext::new(1, "sky", Arc::new(PartitionMap::new()));
        AggregatePlugin::new()
            .apply_physical(&mut plan, &mut ctx)
            .unwrap();
        (plan, ctx)
    }

    #[test]
    fn avg_splits_into_sum_and_count() {
        let (plan, ctx) = run("SELECT AVG(x) FROM T");
        let parallel = plan.parallel.to_sql();
        assert!(
            parallel.contains("SUM(x) AS p_sum, COUNT(x) AS p_cnt"),
            "got: {parallel}"
        );
        let merge: Vec<String> = plan.merge.select_list.iter().map(|e| e.to_sql()).collect();
        assert_eq!(merge, vec!["SUM(p_sum)/SUM(p_cnt) AS AVG(x)".to_string()]);
        assert!(plan.has_merge);
        assert!(matches!(
            ctx.merge_spec.columns[0].op,
            MergeOp::AvgRatio { .. }
        ));
    }

    #[test]
    fn count_becomes_sum_of_partials() {
        let (plan, ctx) = run("SELECT COUNT(*) AS n FROM T");
        assert!(plan.parallel.to_sql().contains("COUNT(*) AS p_cnt"));
        assert_eq!(plan.merge.select_list[0].to_sql(), "SUM(p_cnt) AS n");
        assert_eq!(ctx.merge_spec.columns[0].op, MergeOp::Sum);
        assert_eq!(ctx.merge_spec.columns[0].output, "n");
    }

    #[test]
    fn group_by_passes_key_through() {
        let (plan, ctx) = run("SELECT filter, SUM(flux) AS total FROM T GROUP BY filter");
        let parallel = plan.parallel.to_sql();
        assert!(parallel.contains("filter, SUM(flux) AS p_sum"), "got: {parallel}");
        assert!(parallel.contains("GROUP BY filter"));
        assert_eq!(ctx.merge_spec.group_by, vec!["filter".to_string()]);
        let merge = plan.merge.to_sql();
        assert!(merge.contains("GROUP BY filter"), "got: {merge}");
    }

    #[test]
    fn plain_select_keeps_trivial_merge() {
        let (plan, ctx) = run("SELECT ra, decl FROM T WHERE ra > 0");
        assert!(!plan.has_merge);
        assert!(ctx.merge_spec.is_trivial());
    }

    #[test]
    fn count_distinct_rejected() {
        let stmt = parse_select("SELECT COUNT(DISTINCT x) FROM T").unwrap();
        let mut plan = PhysicalPlan::new(stmt);
        let mut ctx = QueryContext::new(1, "sky", Arc::new(PartitionMap::new()));
        assert!(AggregatePlugin::new()
            .apply_physical(&mut plan, &mut ctx)
            .is_err());
    }

    #[test]
    fn two_sums_get_distinct_partial_names() {
        let (plan, _ctx) = run("SELECT SUM(a), SUM(b) FROM T");
        let parallel = plan.parallel.to_sql();
        assert!(parallel.contains("SUM(a) AS p_sum"), "got: {parallel}");
        assert!(parallel.contains("SUM(b) AS p_sum_2"), "got: {parallel}");
    }
}
