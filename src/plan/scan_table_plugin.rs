// Shared-scan annotation.
//
// A query that sweeps a chunked table without any row restriction is a
// shared-scan candidate: the worker scheduler groups such tasks so one
// sequential pass over the table serves every concurrent query touching it.
// Restricted queries stay unannotated and run as interactive work.

use crate::error::Result;
use crate::plan::context::QueryContext;
use crate::plan::plugin::QueryPlugin;
use crate::query::SelectStmt;

pub struct ScanTablePlugin;

impl ScanTablePlugin {
    pub fn new() -> Self {
        ScanTablePlugin
    }
}

impl Default for ScanTablePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for ScanTablePlugin {
    fn name(&self) -> &'static str {
        "scan-table"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        if stmt.where_clause.is_some() {
            return Ok(());
        }
        for (db, table) in &ctx.chunked_tables {
            if !ctx
                .scan_tables
                .iter()
                .any(|(sdb, stab)| sdb == db && stab == table)
            {
                ctx.scan_tables.push((db.clone(), table.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{PartitionMap, TableMeta};
    use crate::parser::parse_select;
    use crate::plan::table_plugin::TablePlugin;
    use std::sync::Arc;

    fn ctx() -> QueryContext {
        let map = PartitionMap::new();
        map.add_table(
            "sky",
            "Object",
            TableMeta {
                chunked: true,
                ..Default::default()
            },
        );
        QueryContext::new(1, "sky", Arc::new(map))
    }

    #[test]
    fn unrestricted_query_is_annotated() {
        let mut stmt = parse_select("SELECT ra FROM Object").unwrap();
        let mut ctx = ctx();
        TablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        ScanTablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        assert_eq!(
            ctx.scan_tables,
            vec![("sky".to_string(), "Object".to_string())]
        );
    }

    #[test]
    fn restricted_query_stays_interactive() {
        let mut stmt = parse_select("SELECT ra FROM Object WHERE ra BETWEEN 1 AND 2").unwrap();
        let mut ctx = ctx();
        TablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        ScanTablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        assert!(ctx.scan_tables.is_empty());
    }
}
