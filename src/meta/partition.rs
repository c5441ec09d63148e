// Partitioning metadata consulted by the planner.
//
// Describes, per table, whether it is chunked, subchunked, or a match table,
// plus the chunk inventory of each database. The authoritative copy lives in
// the external metadata store; this map is the in-process view, loadable
// from a `KvStore` tree shaped like:
//
//   /DBS/<db>                      -> "READY"
//   /DBS/<db>/TABLES/<table>       -> json TableMeta
//   /DBS/<db>/CHUNKS               -> whitespace-separated chunk numbers

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::global::ChunkId;
use crate::meta::kv::KvStore;

/// Per-table partitioning flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMeta {
    /// Horizontally partitioned into chunk tables.
    pub chunked: bool,
    /// Carries secondary subchunk partitioning for near-neighbour joins.
    pub sub_chunked: bool,
    /// Match table joining two director tables across partitions.
    pub match_table: bool,
    /// Total row count, when the ingest recorded one. Serves the simple
    /// COUNT(*) shortcut without dispatching a query.
    pub row_count: Option<u64>,
}

#[derive(Default)]
struct DbMeta {
    tables: HashMap<String, TableMeta>,
    chunks: Vec<ChunkId>,
    // Subchunks per chunk; zero when the database has no subchunked tables.
    sub_chunk_count: usize,
}

/// Thread-safe registry of partitioning metadata.
#[derive(Default)]
pub struct PartitionMap {
    dbs: RwLock<HashMap<String, DbMeta>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from the metadata tree.
    pub fn from_kv(kv: &dyn KvStore) -> Result<Arc<Self>> {
        let map = PartitionMap::new();
        for db in kv.get_children("/DBS")? {
            let tables_key = format!("/DBS/{db}/TABLES");
            for table in kv.get_children(&tables_key).unwrap_or_default() {
                let meta_json = kv.get(&format!("{tables_key}/{table}"))?;
                let meta: TableMeta = serde_json::from_str(&meta_json)
                    .map_err(|e| Error::Backend(format!("bad table meta for {db}.{table}: {e}")))?;
                map.add_table(&db, &table, meta);
            }
            if let Ok(chunk_text) = kv.get(&format!("/DBS/{db}/CHUNKS")) {
                let mut chunks = Vec::new();
                for token in chunk_text.split_whitespace() {
                    let chunk = token
                        .parse()
                        .map_err(|_| Error::Backend(format!("bad chunk number {token:?} for {db}")))?;
                    chunks.push(chunk);
                }
                map.set_chunks(&db, chunks);
            }
        }
        Ok(Arc::new(map))
    }

    pub fn add_table(&self, db: &str, table: &str, meta: TableMeta) {
        let mut dbs = self.dbs.write();
        dbs.entry(db.to_string())
            .or_default()
            .tables
            .insert(table.to_string(), meta);
    }

    pub fn set_chunks(&self, db: &str, mut chunks: Vec<ChunkId>) {
        chunks.sort_unstable();
        chunks.dedup();
        self.dbs.write().entry(db.to_string()).or_default().chunks = chunks;
    }

    pub fn table(&self, db: &str, table: &str) -> Option<TableMeta> {
        self.dbs.read().get(db)?.tables.get(table).cloned()
    }

    pub fn is_chunked(&self, db: &str, table: &str) -> bool {
        self.table(db, table).map(|m| m.chunked).unwrap_or(false)
    }

    pub fn has_db(&self, db: &str) -> bool {
        self.dbs.read().contains_key(db)
    }

    /// Chunk inventory for a database, ascending.
    pub fn chunks(&self, db: &str) -> Vec<ChunkId> {
        self.dbs
            .read()
            .get(db)
            .map(|d| d.chunks.clone())
            .unwrap_or_default()
    }

    pub fn table_row_count(&self, db: &str, table: &str) -> Option<u64> {
        self.table(db, table)?.row_count
    }

    pub fn set_sub_chunk_count(&self, db: &str, count: usize) {
        self.dbs
            .write()
            .entry(db.to_string())
            .or_default()
            .sub_chunk_count = count;
    }

    pub fn sub_chunk_count(&self, db: &str) -> usize {
        self.dbs
            .read()
            .get(db)
            .map(|d| d.sub_chunk_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::kv::MemKvStore;

    #[test]
    fn load_from_kv_tree() {
        let kv = MemKvStore::new();
        kv.set("/DBS/sky", "READY").unwrap();
        kv.set(
            "/DBS/sky/TABLES/Object",
            r#"{"chunked":true,"sub_chunked":true,"match_table":false,"row_count":1000}"#,
        )
        .unwrap();
        kv.set(
            "/DBS/sky/TABLES/Filter",
            r#"{"chunked":false,"sub_chunked":false,"match_table":false,"row_count":null}"#,
        )
        .unwrap();
        kv.set("/DBS/sky/CHUNKS", "3 4 5 5").unwrap();

        let map = PartitionMap::from_kv(&kv).unwrap();
        assert!(map.is_chunked("sky", "Object"));
        assert!(!map.is_chunked("sky", "Filter"));
        assert_eq!(map.chunks("sky"), vec![3, 4, 5]);
        assert_eq!(map.table_row_count("sky", "Object"), Some(1000));
        assert_eq!(map.table_row_count("sky", "Filter"), None);
    }

    #[test]
    fn unknown_table_is_unpartitioned() {
        let map = PartitionMap::new();
        assert!(!map.is_chunked("nodb", "notable"));
        assert!(map.chunks("nodb").is_empty());
    }
}
