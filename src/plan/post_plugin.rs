// ORDER BY / LIMIT placement.
//
// Ordering across jobs is undefined, so ORDER BY always moves to the merge
// statement. LIMIT stays on the parallel side only when it is safe to take
// the first N rows of every chunk (no aggregation, no ordering); the merge
// side always applies the final LIMIT.

use crate::error::Result;
use crate::plan::context::QueryContext;
use crate::plan::plugin::{PhysicalPlan, QueryPlugin};
use crate::query::{OrderTerm, ValueExpr};

pub struct PostPlugin;

impl PostPlugin {
    pub fn new() -> Self {
        PostPlugin
    }
}

impl Default for PostPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for PostPlugin {
    fn name(&self) -> &'static str {
        "post"
    }

    fn apply_physical(&mut self, plan: &mut PhysicalPlan, ctx: &mut QueryContext) -> Result<()> {
        let had_aggregation = plan.has_merge;
        let order_terms = std::mem::take(&mut plan.parallel.order_by);

        if !order_terms.is_empty() {
            for term in &order_terms {
                // Refer to the merge-side output name when the term matches a
                // select entry; otherwise carry the rendered term.
                let term_sql = term.expr.factor_sql();
                // The aggregate pass aliases merge entries by the original
                // output names, so look there first.
                let name = plan
                    .merge
                    .select_list
                    .iter()
                    .chain(plan.parallel.select_list.iter())
                    .find(|e| e.alias.as_deref() == Some(term_sql.as_str())
                        || (e.alias.is_none() && e.factor_sql() == term_sql))
                    .map(|e| e.output_name())
                    .unwrap_or(term_sql);
                plan.merge.order_by.push(OrderTerm {
                    expr: ValueExpr::column(&name),
                    desc: term.desc,
                });
                ctx.merge_spec.order_by.push((name, term.desc));
            }
            plan.has_merge = true;
        }

        if let Some(limit) = plan.parallel.limit {
            ctx.merge_spec.limit = Some(limit);
            plan.merge.limit = Some(limit);
            plan.has_merge = true;
            // Per-chunk LIMIT is an over-fetch guard, valid only when chunk
            // rows pass through unmodified and unordered.
            if had_aggregation || !order_terms.is_empty() {
                plan.parallel.limit = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::PartitionMap;
    use crate::parser::parse_select;
    use crate::plan::aggregate_plugin::AggregatePlugin;
    use std::sync::Arc;

    fn run(sql: &str) -> (PhysicalPlan, QueryContext) {
        let stmt = parse_select(sql).unwrap();
        let mut plan = PhysicalPlan::new(stmt);
        let mut ctx = QueryContext::new(1, "sky", Arc::new(PartitionMap::new()));
        AggregatePlugin::new()
            .apply_physical(&mut plan, &mut ctx)
            .unwrap();
        PostPlugin::new()
            .apply_physical(&mut plan, &mut ctx)
            .unwrap();
        (plan, ctx)
    }

    #[test]
    fn order_by_moves_to_merge() {
        let (plan, ctx) = run("SELECT ra FROM T ORDER BY ra DESC");
        assert!(plan.parallel.order_by.is_empty());
        assert_eq!(plan.merge.order_by.len(), 1);
        assert!(plan.merge.order_by[0].desc);
        assert!(plan.has_merge);
        assert_eq!(ctx.merge_spec.order_by, vec![("ra".to_string(), true)]);
    }

    #[test]
    fn bare_limit_stays_on_parallel_too() {
        let (plan, ctx) = run("SELECT ra FROM T LIMIT 10");
        assert_eq!(plan.parallel.limit, Some(10));
        assert_eq!(plan.merge.limit, Some(10));
        assert_eq!(ctx.merge_spec.limit, Some(10));
    }

    #[test]
    fn ordered_limit_strips_parallel_limit() {
        let (plan, _ctx) = run("SELECT ra FROM T ORDER BY ra LIMIT 10");
        assert_eq!(plan.parallel.limit, None);
        assert_eq!(plan.merge.limit, Some(10));
    }

    #[test]
    fn aggregate_limit_strips_parallel_limit() {
        let (plan, _ctx) = run("SELECT COUNT(*) FROM T LIMIT 1");
        assert_eq!(plan.parallel.limit, None);
        assert_eq!(plan.merge.limit, Some(1));
    }

    #[test]
    fn order_term_uses_merge_output_name() {
        let (plan, ctx) = run("SELECT SUM(flux) AS total FROM T ORDER BY total");
        assert_eq!(ctx.merge_spec.order_by, vec![("total".to_string(), false)]);
        let merge = plan.merge.to_sql();
        assert!(merge.contains("ORDER BY total"), "got: {merge}");
    }
}
