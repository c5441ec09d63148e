// Match-table duplicate suppression.
//
// Match tables relate two director tables and are duplicated into every
// partition that holds either side of a relation, so an unfiltered query
// would return some rows twice. This pass appends a filter on the
// partitioning flag column so only rows native to the visited partition
// survive. Runs strictly after the table pass, which records which FROM
// entries resolved to match tables.

use crate::error::Result;
use crate::global::{CHUNK_TAG, SUBCHUNK_TAG};
use crate::plan::context::QueryContext;
use crate::plan::plugin::QueryPlugin;
use crate::query::SelectStmt;

/// Flag column maintained by the partitioner: non-zero on rows that are
/// partition duplicates.
pub const DUP_FLAG_COLUMN: &str = "partition_dup";

pub struct MatchTablePlugin;

impl MatchTablePlugin {
    pub fn new() -> Self {
        MatchTablePlugin
    }
}

impl Default for MatchTablePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for MatchTablePlugin {
    fn name(&self) -> &'static str {
        "match-table"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        if ctx.match_tables.is_empty() {
            return Ok(());
        }
        // Collect correlation names first; and_where borrows the statement.
        let mut filters = Vec::new();
        for entry in &stmt.from {
            let db = entry.table.db.as_deref().unwrap_or(&ctx.default_db);
            // The table pass aliased rewritten tables back to their base
            // name, so the base name is recoverable from the correlation.
            let corr = entry.table.correlation_name().to_string();
            // Undo the table pass's placeholder suffix to recover the base name.
            let base = entry
                .table
                .name
                .strip_suffix(&format!("_{CHUNK_TAG}_{SUBCHUNK_TAG}"))
                .or_else(|| entry.table.name.strip_suffix(&format!("_{CHUNK_TAG}")))
                .unwrap_or(&entry.table.name)
                .to_string();
            if ctx
                .match_tables
                .iter()
                .any(|(mdb, mtab)| mdb == db && (*mtab == base || *mtab == corr))
            {
                filters.push(format!("{corr}.{DUP_FLAG_COLUMN} = 0"));
            }
        }
        for f in filters {
            stmt.and_where(&f);
        }
        Ok(())
    }
}
