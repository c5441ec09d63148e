// Identifiers and value types shared by the frontend and worker sides.

pub mod resource_unit;
pub mod string_util;

pub use resource_unit::{ResourceUnit, UnitType};

/// Identity of one user query, stable across all its jobs, tasks and retries.
pub type QueryId = u64;

/// Per-chunk job number, unique within one query.
pub type JobId = i32;

/// Chunk number within a partitioned database.
pub type ChunkId = i32;

/// Attempt counter for one job; bumped on every retry.
pub type AttemptId = u32;

/// Chunk number used for unpartitioned (whole-table) queries.
pub const DUMMY_CHUNK: ChunkId = 1_234_567_890;

/// Placeholder substituted with the chunk number when a query template is
/// made concrete for one chunk.
pub const CHUNK_TAG: &str = "%CC%";

/// Placeholder substituted with the subchunk number.
pub const SUBCHUNK_TAG: &str = "%SS%";
