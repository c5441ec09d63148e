// Shared state the plugin pipeline reads and annotates.

use std::sync::Arc;

use crate::global::QueryId;
use crate::merge::spec::MergeSpec;
use crate::meta::PartitionMap;
use crate::plan::mapping::QueryMapping;

/// Per-query planning context. Plugins never talk to each other directly;
/// annotations flow through here and through the plan.
pub struct QueryContext {
    pub query_id: QueryId,
    /// Database assumed for unqualified table names.
    pub default_db: String,
    /// Database whose partitioning governs the query; set by the table
    /// plugin from the FROM list.
    pub dominant_db: String,
    pub partition_map: Arc<PartitionMap>,
    /// Placeholder bindings accumulated by the table plugin.
    pub mapping: QueryMapping,
    /// `(db, table)` pairs the table plugin resolved as chunked.
    pub chunked_tables: Vec<(String, String)>,
    /// `(db, table)` pairs resolved as match tables.
    pub match_tables: Vec<(String, String)>,
    /// Shared-scan annotation consumed by the worker scheduler.
    pub scan_tables: Vec<(String, String)>,
    /// Structured description of the merge step, kept in sync with the
    /// merge statement by the aggregate and post-processing plugins.
    pub merge_spec: MergeSpec,
}

impl QueryContext {
    pub fn new(query_id: QueryId, default_db: &str, partition_map: Arc<PartitionMap>) -> Self {
        QueryContext {
            query_id,
            default_db: default_db.to_string(),
            dominant_db: String::new(),
            partition_map,
            mapping: QueryMapping::new(),
            chunked_tables: Vec::new(),
            match_tables: Vec::new(),
            scan_tables: Vec::new(),
            merge_spec: MergeSpec::default(),
        }
    }

    /// True once the table plugin has seen at least one chunked table.
    pub fn has_chunks(&self) -> bool {
        !self.chunked_tables.is_empty()
    }
}
