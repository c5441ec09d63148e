// Result merging.
//
// `ResultMerger` owns the query's result table and evaluates the merge step
// over it; `MergingHandler` is the `ResponseHandler` the executive drives,
// one shared instance per query. The merge computes exactly what the
// recorded merge SQL says, via the structured spec built by planning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dispatch::message_store::{MessageSeverity, MessageStore, NOTSET};
use crate::dispatch::response_handler::{FlushResult, ResponseHandler};
use crate::error::{Error, Result};
use crate::global::{AttemptId, JobId};
use crate::merge::result_store::ResultFileStore;
use crate::merge::result_table::ResultTable;
use crate::merge::spec::{MergeOp, MergeSpec};
use crate::rowstore::{QueryResult, Row, Value};

pub struct ResultMerger {
    table: ResultTable,
    spec: MergeSpec,
    /// Schema fallback when workers report no columns (`SELECT *` plans
    /// know theirs only from the store).
    parallel_columns: Vec<String>,
    store: Arc<ResultFileStore>,
}

impl ResultMerger {
    pub fn new(
        result_table: &str,
        parallel_columns: Vec<String>,
        spec: MergeSpec,
        store: Arc<ResultFileStore>,
    ) -> Self {
        ResultMerger {
            table: ResultTable::new(result_table),
            spec,
            parallel_columns,
            store,
        }
    }

    pub fn table(&self) -> &ResultTable {
        &self.table
    }

    /// Pull one result file and merge it. The row count must match what the
    /// worker reported in its summary.
    pub fn merge_file(
        &self,
        job_id: JobId,
        attempt: AttemptId,
        url: &str,
        expected_rows: u64,
    ) -> Result<u64> {
        let file = self
            .store
            .take(url)
            .ok_or_else(|| Error::Merge(format!("no result file at {url}")))?;
        let actual = file.rows.len() as u64;
        if actual != expected_rows {
            return Err(Error::RowCountMismatch {
                job_id,
                expected: expected_rows,
                actual,
            });
        }
        let columns = if file.columns.is_empty() {
            self.parallel_columns.clone()
        } else {
            file.columns
        };
        self.table.adopt_columns(&columns)?;
        self.table.append_batch(job_id, attempt, file.rows);
        debug!(job_id, attempt, rows = actual, "merged result file");
        Ok(actual)
    }

    pub fn scrub(&self, job_id: JobId, attempt: AttemptId) {
        let removed = self.table.scrub(job_id, attempt);
        if removed > 0 {
            debug!(job_id, attempt, removed, "scrubbed superseded rows");
        }
    }

    /// Evaluate the merge step over the merged partials, producing the final
    /// result set.
    pub fn finalize(&self) -> Result<QueryResult> {
        let table_columns = self.table.columns();
        let rows = self.table.rows_snapshot();

        let mut result = if self.spec.columns.is_empty() {
            // Identity merge: plain concatenation of partials.
            QueryResult::new(table_columns.clone(), rows)
        } else {
            self.evaluate_columns(&table_columns, &rows)?
        };

        if self.spec.distinct {
            let mut seen: Vec<Row> = Vec::new();
            result.rows.retain(|row| {
                if seen.contains(row) {
                    false
                } else {
                    seen.push(row.clone());
                    true
                }
            });
        }

        if !self.spec.order_by.is_empty() {
            let mut keys = Vec::new();
            for (name, desc) in &self.spec.order_by {
                let idx = result
                    .columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| Error::Merge(format!("ORDER BY unknown column {name}")))?;
                keys.push((idx, *desc));
            }
            result.rows.sort_by(|a, b| {
                for (idx, desc) in &keys {
                    let ord = a[*idx].compare(&b[*idx]);
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(limit) = self.spec.limit {
            result.rows.truncate(limit as usize);
        }
        Ok(result)
    }

    fn evaluate_columns(&self, table_columns: &[String], rows: &[Row]) -> Result<QueryResult> {
        let lookup = |name: &str| -> Result<usize> {
            table_columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| Error::Merge(format!("merge references unknown column {name}")))
        };

        let key_indices: Vec<usize> = self
            .spec
            .group_by
            .iter()
            .map(|k| lookup(k))
            .collect::<Result<_>>()?;
        let has_agg = self
            .spec
            .columns
            .iter()
            .any(|c| c.op != MergeOp::PassThrough);

        // All pass-through with no grouping key (e.g. DISTINCT): a plain
        // per-row projection, not one collapsed group.
        if !has_agg && key_indices.is_empty() {
            let indices: Vec<usize> = self
                .spec
                .columns
                .iter()
                .map(|c| lookup(&c.input))
                .collect::<Result<_>>()?;
            let columns: Vec<String> =
                self.spec.columns.iter().map(|c| c.output.clone()).collect();
            let out_rows = rows
                .iter()
                .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
                .collect();
            return Ok(QueryResult::new(columns, out_rows));
        }

        // Group partial rows, preserving first-seen key order.
        let mut order: Vec<Vec<Value>> = Vec::new();
        let mut groups: Vec<Vec<&Row>> = Vec::new();
        for row in rows {
            let key: Vec<Value> = key_indices.iter().map(|i| row[*i].clone()).collect();
            match order.iter().position(|k| *k == key) {
                Some(pos) => groups[pos].push(row),
                None => {
                    order.push(key);
                    groups.push(vec![row]);
                }
            }
        }
        // A global aggregate over zero partials still yields one row.
        if groups.is_empty() && key_indices.is_empty() && has_agg {
            order.push(Vec::new());
            groups.push(Vec::new());
        }

        let columns: Vec<String> = self.spec.columns.iter().map(|c| c.output.clone()).collect();
        let mut out_rows = Vec::new();
        for members in groups {
            let mut row = Vec::new();
            for col in &self.spec.columns {
                let value = match &col.op {
                    MergeOp::PassThrough => {
                        let idx = lookup(&col.input)?;
                        members.first().map(|r| r[idx].clone()).unwrap_or(Value::Null)
                    }
                    MergeOp::Sum => {
                        let idx = lookup(&col.input)?;
                        fold(&members, idx, |acc, v| acc.add(v))
                    }
                    MergeOp::Min => {
                        let idx = lookup(&col.input)?;
                        fold(&members, idx, |acc, v| {
                            if acc.is_null() || v.compare(&acc) == std::cmp::Ordering::Less {
                                v.clone()
                            } else {
                                acc
                            }
                        })
                    }
                    MergeOp::Max => {
                        let idx = lookup(&col.input)?;
                        fold(&members, idx, |acc, v| {
                            if acc.is_null() || v.compare(&acc) == std::cmp::Ordering::Greater {
                                v.clone()
                            } else {
                                acc
                            }
                        })
                    }
                    MergeOp::AvgRatio { sum_col, cnt_col } => {
                        let sum_idx = lookup(sum_col)?;
                        let cnt_idx = lookup(cnt_col)?;
                        let total = fold(&members, sum_idx, |acc, v| acc.add(v));
                        let count = fold(&members, cnt_idx, |acc, v| acc.add(v));
                        total.divide(&count)
                    }
                };
                row.push(value);
            }
            out_rows.push(row);
        }
        Ok(QueryResult::new(columns, out_rows))
    }
}

fn fold(rows: &[&Row], idx: usize, f: impl Fn(Value, &Value) -> Value) -> Value {
    let mut acc = Value::Null;
    for row in rows {
        let v = &row[idx];
        if v.is_null() {
            continue;
        }
        acc = f(acc, v);
    }
    acc
}

/// The per-query response handler: merges result files, applies
/// first-error-wins reporting, and serves the scrub and cancel hooks.
pub struct MergingHandler {
    merger: Arc<ResultMerger>,
    message_store: Arc<MessageStore>,
    first_error: Mutex<Option<(i32, String)>>,
    cancelled: AtomicBool,
}

impl MergingHandler {
    pub fn new(merger: Arc<ResultMerger>, message_store: Arc<MessageStore>) -> Arc<Self> {
        Arc::new(MergingHandler {
            merger,
            message_store,
            first_error: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn first_error(&self) -> Option<(i32, String)> {
        self.first_error.lock().clone()
    }

    /// Record an error; only the first one per query is authoritative.
    fn record_error(&self, code: i32, msg: &str) {
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some((code, msg.to_string()));
            self.message_store
                .add_message(NOTSET, "merge", code, msg, MessageSeverity::Error);
        } else {
            self.message_store
                .add_message(NOTSET, "merge", code, msg, MessageSeverity::Info);
        }
    }
}

impl ResponseHandler for MergingHandler {
    fn flush_http(&self, file_url: &str, expected_rows: u64) -> FlushResult {
        if self.cancelled.load(Ordering::Acquire) {
            return FlushResult::failed(false);
        }
        let Some((_query_id, job_id, attempt)) = ResultFileStore::parse_url(file_url) else {
            self.record_error(-1, &format!("unparseable result url {file_url}"));
            return FlushResult::failed(true);
        };
        match self.merger.merge_file(job_id, attempt, file_url, expected_rows) {
            Ok(rows) => FlushResult::ok(rows),
            Err(e @ Error::RowCountMismatch { .. }) => {
                // Terminal for the query; drop whatever this attempt left.
                self.merger.scrub(job_id, attempt);
                self.record_error(e.code(), &e.to_string());
                FlushResult::failed(true)
            }
            Err(e) => {
                warn!(job_id, attempt, error = %e, "merge failed");
                self.record_error(e.code(), &e.to_string());
                FlushResult::failed(true)
            }
        }
    }

    fn flush_http_error(&self, error_code: i32, error_msg: &str, status: i32) {
        self.record_error(
            error_code,
            &format!("worker error (status {status}): {error_msg}"),
        );
    }

    fn prep_scrub_results(&self, job_id: JobId, attempt: AttemptId) {
        self.merger.scrub(job_id, attempt);
    }

    fn error_flush(&self, msg: &str, code: i32) {
        self.record_error(code, msg);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
