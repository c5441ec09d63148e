// Table resolution and chunk-placeholder substitution.
//
// Resolves qualified names against the partition map, rewrites every chunked
// table into its placeholder template (`T` becomes `T_%CC%`, or
// `T_%CC%_%SS%` when a subchunked table is self-joined), and records the
// dominant database. Later passes rely on the annotations this one leaves
// in the context.

use crate::error::{Error, Result};
use crate::global::{CHUNK_TAG, SUBCHUNK_TAG};
use crate::plan::context::QueryContext;
use crate::plan::plugin::QueryPlugin;
use crate::query::SelectStmt;

pub struct TablePlugin;

impl TablePlugin {
    pub fn new() -> Self {
        TablePlugin
    }
}

impl Default for TablePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlugin for TablePlugin {
    fn name(&self) -> &'static str {
        "table"
    }

    fn apply_logical(&mut self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        if stmt.from.is_empty() {
            return Err(Error::Planning("query has no FROM clause".to_string()));
        }

        // Count occurrences of each base table to spot self-joins, which is
        // what forces subchunk fragments for near-neighbour queries.
        let mut occurrences: Vec<(String, String)> = Vec::new();
        for entry in &stmt.from {
            let db = entry
                .table
                .db
                .clone()
                .unwrap_or_else(|| ctx.default_db.clone());
            occurrences.push((db, entry.table.name.clone()));
        }

        for (i, entry) in stmt.from.iter_mut().enumerate() {
            let (db, base) = occurrences[i].clone();
            if !ctx.partition_map.has_db(&db) {
                return Err(Error::Planning(format!("unknown database: {db}")));
            }
            let Some(meta) = ctx.partition_map.table(&db, &base) else {
                return Err(Error::Planning(format!("unknown table: {db}.{base}")));
            };
            // Resolve the qualifier so the rendered template is unambiguous.
            entry.table.db = Some(db.clone());
            if meta.match_table {
                ctx.match_tables.push((db.clone(), base.clone()));
            }
            if !meta.chunked {
                continue;
            }
            if ctx.dominant_db.is_empty() {
                // The first chunked table's database governs partitioning.
                ctx.dominant_db = db.clone();
            } else if ctx.dominant_db != db {
                return Err(Error::Planning(format!(
                    "query spans partitioned tables of {} and {db}; \
                     a single dominant database is required",
                    ctx.dominant_db
                )));
            }
            let self_joined = occurrences
                .iter()
                .filter(|(odb, otab)| *odb == db && *otab == base)
                .count()
                > 1;
            if meta.sub_chunked && self_joined {
                entry.table.name = format!("{base}_{CHUNK_TAG}_{SUBCHUNK_TAG}");
                // Keep the original name visible to other clauses.
                if entry.table.alias.is_none() {
                    entry.table.alias = Some(base.clone());
                }
                ctx.mapping.insert_chunk_entry();
                ctx.mapping.insert_sub_chunk_entry();
                ctx.mapping.insert_sub_chunk_table(&base);
            } else {
                entry.table.name = format!("{base}_{CHUNK_TAG}");
                if entry.table.alias.is_none() {
                    entry.table.alias = Some(base.clone());
                }
                ctx.mapping.insert_chunk_entry();
            }
            ctx.chunked_tables.push((db, base));
        }

        if ctx.dominant_db.is_empty() {
            // No chunked table anywhere: a metadata-only query still needs a
            // home; the default database fills in.
            ctx.dominant_db = ctx.default_db.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{PartitionMap, TableMeta};
    use crate::parser::parse_select;
    use std::sync::Arc;

    fn ctx() -> QueryContext {
        let map = PartitionMap::new();
        map.add_table(
            "sky",
            "Object",
            TableMeta {
                chunked: true,
                sub_chunked: true,
                ..Default::default()
            },
        );
        map.add_table(
            "sky",
            "Filter",
            TableMeta {
                chunked: false,
                ..Default::default()
            },
        );
        QueryContext::new(1, "sky", Arc::new(map))
    }

    #[test]
    fn substitutes_chunked_table() {
        let mut stmt = parse_select("SELECT ra FROM Object WHERE ra > 2").unwrap();
        let mut ctx = ctx();
        TablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        assert_eq!(ctx.dominant_db, "sky");
        assert_eq!(
            stmt.to_sql(),
            "SELECT ra FROM sky.Object_%CC% AS Object WHERE ra > 2"
        );
        assert!(ctx.mapping.has_chunks());
        assert!(!ctx.mapping.has_sub_chunks());
    }

    #[test]
    fn self_join_uses_subchunks() {
        let mut stmt =
            parse_select("SELECT o1.ra FROM Object AS o1, Object AS o2 WHERE o1.id <> o2.id")
                .unwrap();
        let mut ctx = ctx();
        TablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        assert!(ctx.mapping.has_sub_chunks());
        let sql = stmt.to_sql();
        assert!(sql.contains("Object_%CC%_%SS% AS o1"), "got: {sql}");
        assert!(sql.contains("Object_%CC%_%SS% AS o2"), "got: {sql}");
    }

    #[test]
    fn unpartitioned_table_untouched() {
        let mut stmt = parse_select("SELECT name FROM Filter").unwrap();
        let mut ctx = ctx();
        TablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .unwrap();
        assert_eq!(stmt.to_sql(), "SELECT name FROM sky.Filter");
        assert!(!ctx.mapping.has_chunks());
        assert_eq!(ctx.dominant_db, "sky");
    }

    #[test]
    fn unknown_table_is_planning_error() {
        let mut stmt = parse_select("SELECT x FROM Mystery").unwrap();
        let mut ctx = ctx();
        assert!(TablePlugin::new()
            .apply_logical(&mut stmt, &mut ctx)
            .is_err());
    }
}
