// End-to-end execution over the in-process wiring: plan, dispatch through
// the executive, run on a real worker processor against the in-memory row
// store, stream results back, and merge. Covers the merge-equivalence
// property for projections, aggregates and ORDER BY, the empty-chunk skip,
// transport retries, and cooperative cancellation.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skyserv::config::{CzarConfig, WorkerConfig};
use skyserv::control::{QueryDriver, QueryOutcome};
use skyserv::dispatch::messenger::{Messenger, StaticWorkerRegistry};
use skyserv::error::{Error, Result};
use skyserv::global::ResourceUnit;
use skyserv::merge::ResultFileStore;
use skyserv::meta::{EmptyChunks, PartitionMap, TableMeta};
use skyserv::proto::{CancelMsg, ResponseSummary, RowBatch, TaskMsg};
use skyserv::rowstore::{MemRowStore, QueryResult, RowStore, Value};
use skyserv::worker::WorkerProcessor;
use skyserv::xfer::LocalMessenger;

fn partition_map() -> Arc<PartitionMap> {
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
    Arc::new(map)
}

/// Chunk tables: ra values 1.0, 2.0 | 3.0, 4.0, 5.0 | 6.0.
fn populated_store() -> Arc<MemRowStore> {
    let store = MemRowStore::new();
    store.register_table(
        "sky",
        "Object_3",
        vec!["id", "ra"],
        vec![
            vec![Value::Int(1), Value::Float(1.0)],
            vec![Value::Int(2), Value::Float(2.0)],
        ],
    );
    store.register_table(
        "sky",
        "Object_4",
        vec!["id", "ra"],
        vec![
            vec![Value::Int(3), Value::Float(3.0)],
            vec![Value::Int(4), Value::Float(4.0)],
            vec![Value::Int(5), Value::Float(5.0)],
        ],
    );
    store.register_table(
        "sky",
        "Object_5",
        vec!["id", "ra"],
        vec![vec![Value::Int(6), Value::Float(6.0)]],
    );
    Arc::new(store)
}

fn local_messenger(rowstore: Arc<dyn RowStore>) -> (Arc<LocalMessenger>, Arc<WorkerProcessor>) {
    let registry = Arc::new(StaticWorkerRegistry::new());
    registry.set_default_worker("w1");
    let processor = WorkerProcessor::new(&WorkerConfig::default(), rowstore).unwrap();
    let messenger = Arc::new(LocalMessenger::new(registry));
    messenger.register_worker("w1", Arc::clone(&processor));
    (messenger, processor)
}

fn driver(
    messenger: Arc<dyn Messenger>,
    empty_chunks: Option<Arc<EmptyChunks>>,
) -> QueryDriver {
    QueryDriver::new(CzarConfig::default(), partition_map(), empty_chunks, messenger)
}

fn rows_of(outcome: QueryOutcome) -> QueryResult {
    match outcome {
        QueryOutcome::Rows(result) => result,
        other => panic!("expected rows, got {other:?}"),
    }
}

#[test]
fn projection_merges_all_chunks() {
    let (messenger, processor) = local_messenger(populated_store());
    let d = driver(messenger, None);
    let result = rows_of(d.execute("sky", "SELECT id, ra FROM Object WHERE ra > 1.5").unwrap());
    assert_eq!(result.columns, vec!["id", "ra"]);
    // Chunk 3 contributes one row, chunk 4 three, chunk 5 one.
    assert_eq!(result.rows.len(), 5);
    processor.shutdown();
}

#[test]
fn avg_equals_whole_table_average() {
    let (messenger, processor) = local_messenger(populated_store());
    let d = driver(messenger, None);
    let result = rows_of(d.execute("sky", "SELECT AVG(ra) FROM Object").unwrap());
    // (1+2+3+4+5+6)/6 = 3.5, reconstructed as SUM(p_sum)/SUM(p_cnt).
    assert_eq!(result.rows, vec![vec![Value::Float(3.5)]]);
    processor.shutdown();
}

#[test]
fn count_and_min_max_merge() {
    let (messenger, processor) = local_messenger(populated_store());
    let d = driver(messenger, None);
    let result = rows_of(
        d.execute(
            "sky",
            "SELECT COUNT(ra) AS n, MIN(ra) AS lo, MAX(ra) AS hi FROM Object",
        )
        .unwrap(),
    );
    assert_eq!(result.columns, vec!["n", "lo", "hi"]);
    assert_eq!(
        result.rows,
        vec![vec![Value::Int(6), Value::Float(1.0), Value::Float(6.0)]]
    );
    processor.shutdown();
}

#[test]
fn order_by_is_applied_at_merge() {
    let (messenger, processor) = local_messenger(populated_store());
    let d = driver(messenger, None);
    let result = rows_of(
        d.execute("sky", "SELECT ra FROM Object ORDER BY ra DESC LIMIT 3")
            .unwrap(),
    );
    assert_eq!(
        result.rows,
        vec![
            vec![Value::Float(6.0)],
            vec![Value::Float(5.0)],
            vec![Value::Float(4.0)],
        ]
    );
    processor.shutdown();
}

#[test]
fn empty_chunks_are_skipped_and_result_matches_remaining_chunk() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut f = std::fs::File::create(dir.path().join("empty_sky.txt")).unwrap();
    writeln!(f, "3 5 7").unwrap();
    let empty = Arc::new(EmptyChunks::new(
        dir.path(),
        dir.path().join("emptyChunks.txt"),
    ));
    let (messenger, processor) = local_messenger(populated_store());
    let d = driver(messenger, Some(empty));
    let result = rows_of(d.execute("sky", "SELECT id FROM Object WHERE id > 0").unwrap());
    // Only chunk 4 is visited; its row count is the result row count.
    assert_eq!(result.rows.len(), 3);
    processor.shutdown();
}

/// Messenger decorator failing the first deliveries of every job.
struct FlakyMessenger {
    inner: Arc<dyn Messenger>,
    fail_below_attempt: u32,
    failures: AtomicU32,
}

impl Messenger for FlakyMessenger {
    fn deliver(
        &self,
        resource: &ResourceUnit,
        task: &TaskMsg,
    ) -> Result<(ResponseSummary, Vec<RowBatch>)> {
        if task.attempt < self.fail_below_attempt {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Transport("synthetic link failure".to_string()));
        }
        self.inner.deliver(resource, task)
    }

    fn cancel(&self, resource: &ResourceUnit, msg: &CancelMsg) -> Result<()> {
        self.inner.cancel(resource, msg)
    }
}

#[test]
fn transport_retries_still_produce_exact_rows() {
    let (messenger, processor) = local_messenger(populated_store());
    let flaky = Arc::new(FlakyMessenger {
        inner: messenger,
        fail_below_attempt: 3,
        failures: AtomicU32::new(0),
    });
    let d = driver(flaky.clone(), None);
    let result = rows_of(d.execute("sky", "SELECT id FROM Object WHERE id > 0").unwrap());
    // Attempts 1 and 2 of each of the three jobs failed and were scrubbed;
    // attempt 3 merged exactly once per job.
    assert_eq!(result.rows.len(), 6);
    assert_eq!(flaky.failures.load(Ordering::SeqCst), 6);
    processor.shutdown();
}

/// Row store that takes its time, giving cancellation something to outrun.
struct SlowStore {
    inner: Arc<MemRowStore>,
    delay: Duration,
}

impl RowStore for SlowStore {
    fn execute(&self, db: &str, sql: &str) -> Result<QueryResult> {
        std::thread::sleep(self.delay);
        self.inner.execute(db, sql)
    }
}

#[test]
fn cancellation_terminates_submitted_query() {
    let slow = Arc::new(SlowStore {
        inner: populated_store(),
        delay: Duration::from_millis(40),
    });
    let (messenger, processor) = local_messenger(slow);
    let d = driver(messenger, None);
    let QueryOutcome::Submitted(id) = d
        .execute("sky", "SUBMIT SELECT id FROM Object WHERE id > 0")
        .unwrap()
    else {
        panic!("expected submission")
    };
    std::thread::sleep(Duration::from_millis(20));
    d.cancel_query(id).unwrap();
    match d.execute("sky", &format!("SELECT * FROM QSERV_RESULT({id})")) {
        Err(Error::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    processor.shutdown();
}

#[test]
fn worker_sql_error_fails_the_query() {
    let store = MemRowStore::new();
    // Chunk tables missing entirely: every job fails on the worker.
    let (messenger, processor) = local_messenger(Arc::new(store));
    let d = driver(messenger, None);
    match d.execute("sky", "SELECT id FROM Object WHERE id > 0") {
        Err(Error::WorkerExec { msg, .. }) => {
            assert!(msg.contains("no such table"), "got: {msg}");
        }
        other => panic!("expected worker error, got {other:?}"),
    }
    processor.shutdown();
}

#[test]
fn result_files_are_consumed_exactly_once() {
    // Direct check of the staging store used by the executive.
    let store = ResultFileStore::new();
    let url = ResultFileStore::url_for(1, 1, 1);
    store.insert(
        &url,
        skyserv::merge::ResultFile {
            columns: vec!["a".to_string()],
            rows: vec![vec![Value::Int(1)]],
        },
    );
    assert!(store.take(&url).is_some());
    assert!(store.take(&url).is_none());
}
