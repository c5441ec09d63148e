// The pipeline runner.
//
// Runs every registered plugin over the parsed statement and the physical
// plan, then freezes the outcome into a `Plan`: the per-chunk template, the
// merge SQL and its structured mirror, the placeholder mapping, and the
// chunk coverage with empty chunks already removed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::global::{ChunkId, QueryId, DUMMY_CHUNK};
use crate::merge::spec::MergeSpec;
use crate::meta::{EmptyChunks, PartitionMap};
use crate::parser::parse_select;
use crate::plan::context::QueryContext;
use crate::plan::mapping::{ChunkSpec, ChunkSpecSingle, QueryMapping};
use crate::plan::plugin::{PhysicalPlan, PluginRegistry};
use crate::query::template::QueryTemplate;
use crate::query::{FromEntry, SelectStmt, TableRef, ValueExpr};

/// The frozen outcome of planning one query.
#[derive(Debug, Clone)]
pub struct Plan {
    pub original: String,
    /// Restartable per-chunk statement template.
    pub parallel: QueryTemplate,
    /// Output column names of the parallel statement (empty for `SELECT *`).
    pub parallel_columns: Vec<String>,
    /// Recorded merge statement, run over the combined partial results.
    pub merge_sql: String,
    /// Structured mirror of `merge_sql` driving the in-process merger.
    pub merge_spec: MergeSpec,
    pub has_merge: bool,
    pub dominant_db: String,
    pub mapping: QueryMapping,
    /// Shared-scan tables, `(db, table)`.
    pub scan_tables: Vec<(String, String)>,
    /// Chunks to visit, empty chunks already excluded.
    pub chunk_specs: Vec<ChunkSpec>,
    /// Chunks skipped because the empty-chunk set covers them.
    pub skipped_empty: Vec<ChunkId>,
}

impl Plan {
    /// Concrete SQL fragments for one chunk: a single statement for
    /// whole-chunk queries, one per subchunk for near-neighbour queries.
    pub fn fragments_for(&self, spec: &ChunkSpec) -> Result<Vec<String>> {
        if self.mapping.has_sub_chunks() {
            spec.sub_chunks
                .iter()
                .map(|s| {
                    self.mapping.apply_single(
                        &ChunkSpecSingle {
                            chunk: spec.chunk,
                            sub_chunk: *s,
                        },
                        &self.parallel,
                    )
                })
                .collect()
        } else {
            Ok(vec![self.mapping.apply(spec, &self.parallel)?])
        }
    }

    /// Scan-table names as sent to workers (`db.table`).
    pub fn scan_table_names(&self) -> Vec<String> {
        self.scan_tables
            .iter()
            .map(|(db, t)| format!("{db}.{t}"))
            .collect()
    }
}

pub struct Planner {
    partition_map: Arc<PartitionMap>,
    empty_chunks: Option<Arc<EmptyChunks>>,
    registry: PluginRegistry,
}

impl Planner {
    pub fn new(partition_map: Arc<PartitionMap>, empty_chunks: Option<Arc<EmptyChunks>>) -> Self {
        Planner {
            partition_map,
            empty_chunks,
            registry: PluginRegistry::standard(),
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Plan one SELECT. `result_table` names the table the merge statement
    /// reads from.
    pub fn plan(
        &self,
        query_id: QueryId,
        default_db: &str,
        sql: &str,
        result_table: &str,
    ) -> Result<Plan> {
        let stmt = parse_select(sql)?;
        let mut ctx = QueryContext::new(query_id, default_db, Arc::clone(&self.partition_map));
        let mut plugins = self.registry.instantiate_all()?;

        for p in plugins.iter_mut() {
            p.prepare()?;
        }
        let mut logical = stmt.clone();
        for p in plugins.iter_mut() {
            p.apply_logical(&mut logical, &mut ctx)?;
        }
        let mut phys = PhysicalPlan::new(logical);
        for p in plugins.iter_mut() {
            p.apply_physical(&mut phys, &mut ctx)?;
        }

        if phys.merge.select_list.is_empty() {
            phys.merge.select_list = vec![ValueExpr::star()];
        }
        phys.merge.from = vec![FromEntry {
            table: TableRef::new(None, result_table, None),
            join: None,
        }];

        let template = phys.parallel.to_template();
        ctx.mapping.validate(&template)?;

        let parallel_columns = Self::output_columns(&phys.parallel);
        let chunk_specs = self.chunk_coverage(&ctx)?;
        let (chunk_specs, skipped_empty) = self.drop_empty(&ctx.dominant_db, chunk_specs);

        debug!(
            query_id,
            chunks = chunk_specs.len(),
            skipped = skipped_empty.len(),
            has_merge = phys.has_merge,
            "planned query"
        );

        Ok(Plan {
            original: sql.to_string(),
            parallel: template,
            parallel_columns,
            merge_sql: phys.merge.to_sql(),
            merge_spec: ctx.merge_spec,
            has_merge: phys.has_merge,
            dominant_db: ctx.dominant_db,
            mapping: ctx.mapping,
            scan_tables: ctx.scan_tables,
            chunk_specs,
            skipped_empty,
        })
    }

    fn output_columns(stmt: &SelectStmt) -> Vec<String> {
        if stmt
            .select_list
            .iter()
            .any(|e| matches!(e.factor, crate::query::ValueFactor::Star { .. }))
        {
            return Vec::new();
        }
        stmt.select_list.iter().map(|e| e.output_name()).collect()
    }

    fn chunk_coverage(&self, ctx: &QueryContext) -> Result<Vec<ChunkSpec>> {
        if !ctx.mapping.has_chunks() {
            // Unpartitioned query: one job against the dummy chunk.
            return Ok(vec![ChunkSpec::whole(DUMMY_CHUNK)]);
        }
        let chunks = self.partition_map.chunks(&ctx.dominant_db);
        if chunks.is_empty() {
            return Err(Error::Planning(format!(
                "no chunk inventory for database {}",
                ctx.dominant_db
            )));
        }
        let sub_chunks: Vec<ChunkId> = if ctx.mapping.has_sub_chunks() {
            let n = self.partition_map.sub_chunk_count(&ctx.dominant_db);
            if n == 0 {
                return Err(Error::Planning(format!(
                    "query needs subchunks but database {} has no subchunk inventory",
                    ctx.dominant_db
                )));
            }
            (0..n as ChunkId).collect()
        } else {
            Vec::new()
        };
        Ok(chunks
            .into_iter()
            .map(|chunk| ChunkSpec {
                chunk,
                sub_chunks: sub_chunks.clone(),
            })
            .collect())
    }

    fn drop_empty(
        &self,
        dominant_db: &str,
        specs: Vec<ChunkSpec>,
    ) -> (Vec<ChunkSpec>, Vec<ChunkId>) {
        let Some(empty) = &self.empty_chunks else {
            return (specs, Vec::new());
        };
        let empty_set = match empty.get_empty(dominant_db) {
            Ok(set) => set,
            Err(e) => {
                warn!(db = dominant_db, error = %e, "no empty-chunk list; visiting all chunks");
                return (specs, Vec::new());
            }
        };
        let mut kept = Vec::new();
        let mut skipped = Vec::new();
        for spec in specs {
            if spec.chunk != DUMMY_CHUNK && empty_set.contains(&spec.chunk) {
                skipped.push(spec.chunk);
            } else {
                kept.push(spec);
            }
        }
        (kept, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::TableMeta;

    fn planner() -> Planner {
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
        map.add_table("sky", "Filter", TableMeta::default());
        map.set_chunks("sky", vec![3, 4, 5]);
        map.set_sub_chunk_count("sky", 2);
        Planner::new(Arc::new(map), None)
    }

    #[test]
    fn plans_chunked_select() {
        let plan = planner()
            .plan(1, "sky", "SELECT ra FROM Object WHERE ra > 1", "result_1")
            .unwrap();
        assert_eq!(plan.dominant_db, "sky");
        assert_eq!(plan.chunk_specs.len(), 3);
        assert!(!plan.has_merge);
        let frags = plan.fragments_for(&plan.chunk_specs[0]).unwrap();
        assert_eq!(
            frags,
            vec!["SELECT ra FROM sky.Object_3 AS Object WHERE ra > 1".to_string()]
        );
        assert_eq!(plan.parallel_columns, vec!["ra".to_string()]);
    }

    #[test]
    fn merge_statement_reads_result_table() {
        let plan = planner()
            .plan(1, "sky", "SELECT AVG(ra) FROM Object", "result_9")
            .unwrap();
        assert!(plan.has_merge);
        assert!(plan.merge_sql.contains("FROM result_9"), "got: {}", plan.merge_sql);
        assert!(
            plan.merge_sql.contains("SUM(p_sum)/SUM(p_cnt)"),
            "got: {}",
            plan.merge_sql
        );
    }

    #[test]
    fn unpartitioned_query_uses_dummy_chunk() {
        let plan = planner()
            .plan(1, "sky", "SELECT name FROM Filter WHERE name = 'g'", "r")
            .unwrap();
        assert_eq!(plan.chunk_specs.len(), 1);
        assert_eq!(plan.chunk_specs[0].chunk, DUMMY_CHUNK);
        let frags = plan.fragments_for(&plan.chunk_specs[0]).unwrap();
        assert_eq!(
            frags,
            vec!["SELECT name FROM sky.Filter WHERE name = 'g'".to_string()]
        );
    }

    #[test]
    fn self_join_emits_subchunk_fragments() {
        let plan = planner()
            .plan(
                1,
                "sky",
                "SELECT o1.ra FROM Object AS o1, Object AS o2 WHERE o1.id <> o2.id",
                "r",
            )
            .unwrap();
        assert!(plan.mapping.has_sub_chunks());
        let frags = plan.fragments_for(&plan.chunk_specs[0]).unwrap();
        assert_eq!(frags.len(), 2);
        assert!(frags[0].contains("Object_3_0"), "got: {}", frags[0]);
        assert!(frags[1].contains("Object_3_1"), "got: {}", frags[1]);
    }

    #[test]
    fn empty_chunks_are_skipped() {
        use std::io::Write;
        let dir = tempfile::TempDir::new().unwrap();
        let mut f = std::fs::File::create(dir.path().join("empty_sky.txt")).unwrap();
        writeln!(f, "3\n5\n7").unwrap();
        let map = PartitionMap::new();
        map.add_table(
            "sky",
            "Object",
            TableMeta {
                chunked: true,
                ..Default::default()
            },
        );
        map.set_chunks("sky", vec![3, 4, 5]);
        let empty = EmptyChunks::new(dir.path(), dir.path().join("none.txt"));
        let planner = Planner::new(Arc::new(map), Some(Arc::new(empty)));
        let plan = planner
            .plan(1, "sky", "SELECT ra FROM Object WHERE ra > 0", "r")
            .unwrap();
        assert_eq!(plan.chunk_specs.len(), 1);
        assert_eq!(plan.chunk_specs[0].chunk, 4);
        assert_eq!(plan.skipped_empty, vec![3, 5]);
    }
}
