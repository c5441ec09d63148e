// Frontend-side result collection: the per-query result table, the staging
// store for worker result files, and the merging response handler.

pub mod merger;
pub mod result_store;
pub mod result_table;
pub mod spec;

pub use merger::{MergingHandler, ResultMerger};
pub use result_store::{ResultFile, ResultFileStore};
pub use result_table::ResultTable;
pub use spec::{MergeColumn, MergeOp, MergeSpec};
