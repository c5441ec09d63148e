// Per-query driving.
//
// `QueryDriver` is the frontend's entry point: classify the statement,
// handle directives, and for real SELECTs run plan -> dispatch -> merge.
// Submitted (async) queries stay in the registry, keyed by query id, until
// their results are fetched with `QSERV_RESULT(<id>)`; KILL and CANCEL
// resolve through the same registry. One id space identifies a query
// everywhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::CzarConfig;
use crate::control::user_query_type::{simple_count_star, UserQueryKind};
use crate::dispatch::executive::{Executive, QueryState};
use crate::dispatch::job_description::JobDescription;
use crate::dispatch::message_store::MessageStore;
use crate::dispatch::messenger::Messenger;
use crate::error::{Error, Result};
use crate::global::string_util::hash_name;
use crate::global::{QueryId, ResourceUnit};
use crate::merge::merger::{MergingHandler, ResultMerger};
use crate::merge::result_store::ResultFileStore;
use crate::meta::{EmptyChunks, PartitionMap};
use crate::plan::planner::Planner;
use crate::proto::TaskMsg;
use crate::rowstore::{QueryResult, Value};

/// What executing one statement produced.
#[derive(Debug)]
pub enum QueryOutcome {
    /// Rows ready for the client.
    Rows(QueryResult),
    /// Async submission accepted; fetch later via `QSERV_RESULT(<id>)`.
    Submitted(QueryId),
    /// A cache flush or cancellation directive completed.
    Done,
}

struct ActiveQuery {
    executive: Arc<Executive>,
    merger: Arc<ResultMerger>,
    handler: Arc<MergingHandler>,
    /// Recorded so asynchronous result queries can be served later.
    #[allow(dead_code)]
    merge_sql: String,
    message_store: Arc<MessageStore>,
}

pub struct QueryDriver {
    config: CzarConfig,
    planner: Planner,
    partition_map: Arc<PartitionMap>,
    empty_chunks: Option<Arc<EmptyChunks>>,
    messenger: Arc<dyn Messenger>,
    active: DashMap<QueryId, Arc<ActiveQuery>>,
    next_id: AtomicU64,
}

impl QueryDriver {
    pub fn new(
        config: CzarConfig,
        partition_map: Arc<PartitionMap>,
        empty_chunks: Option<Arc<EmptyChunks>>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let planner = Planner::new(Arc::clone(&partition_map), empty_chunks.clone());
        QueryDriver {
            config,
            planner,
            partition_map,
            empty_chunks,
            messenger,
            active: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Execute one statement from the proxy.
    pub fn execute(&self, default_db: &str, sql: &str) -> Result<QueryOutcome> {
        match UserQueryKind::classify(sql) {
            UserQueryKind::Select => {
                if let Some(result) = self.try_count_star_shortcut(default_db, sql)? {
                    return Ok(QueryOutcome::Rows(result));
                }
                let query_id = self.start_query(default_db, sql)?;
                self.collect(query_id).map(QueryOutcome::Rows)
            }
            UserQueryKind::Submit(stripped) => {
                let query_id = self.start_query(default_db, &stripped)?;
                info!(query_id, "query submitted for async execution");
                Ok(QueryOutcome::Submitted(query_id))
            }
            UserQueryKind::SelectResult(query_id) => {
                self.collect(query_id).map(QueryOutcome::Rows)
            }
            UserQueryKind::FlushChunksCache(db) => {
                match &self.empty_chunks {
                    Some(ec) => ec.clear_cache(db.as_deref()),
                    None => warn!("no empty-chunk store configured; flush ignored"),
                }
                Ok(QueryOutcome::Done)
            }
            UserQueryKind::Kill(query_id) | UserQueryKind::Cancel(query_id) => {
                self.cancel_query(query_id)?;
                Ok(QueryOutcome::Done)
            }
            UserQueryKind::ProcessList { full } => Ok(QueryOutcome::Rows(self.process_list(full))),
            UserQueryKind::Unsupported => Err(Error::Parse(format!(
                "statement not supported by the executor: {}",
                sql.trim()
            ))),
        }
    }

    /// Plan a SELECT and dispatch one job per non-empty chunk. Returns as
    /// soon as every job is enqueued.
    pub fn start_query(&self, default_db: &str, sql: &str) -> Result<QueryId> {
        let query_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let result_table = format!("result_{}", hash_name(&format!("{query_id}:{sql}")));
        let plan = self
            .planner
            .plan(query_id, default_db, sql, &result_table)?;

        let message_store = Arc::new(MessageStore::new());
        let result_files = Arc::new(ResultFileStore::new());
        let merger = Arc::new(ResultMerger::new(
            &result_table,
            plan.parallel_columns.clone(),
            plan.merge_spec.clone(),
            Arc::clone(&result_files),
        ));
        let handler = MergingHandler::new(Arc::clone(&merger), Arc::clone(&message_store));
        let executive = Executive::new(
            query_id,
            self.config.max_job_retries,
            self.config.dispatch_threads,
            Arc::clone(&self.messenger),
            Arc::clone(&message_store),
            result_files,
        );

        for chunk in &plan.skipped_empty {
            executive.mark_skipped_empty(*chunk);
        }
        let scan_tables = plan.scan_table_names();
        for (i, spec) in plan.chunk_specs.iter().enumerate() {
            let job_id = i as i32;
            let fragments = plan.fragments_for(spec)?;
            let task = TaskMsg {
                query_id,
                job_id,
                attempt: 1,
                chunk_id: spec.chunk,
                db: plan.dominant_db.clone(),
                fragments,
                result_table: result_table.clone(),
                scan_tables: scan_tables.clone(),
                session: query_id,
            };
            let resource =
                ResourceUnit::from_path(&ResourceUnit::make_path(spec.chunk, &plan.dominant_db));
            let resp_handler: Arc<dyn crate::dispatch::response_handler::ResponseHandler> =
                handler.clone();
            let desc = JobDescription::new(
                query_id,
                job_id,
                resource,
                task,
                &result_table,
                resp_handler,
            );
            executive.add(desc)?;
        }
        info!(
            query_id,
            jobs = plan.chunk_specs.len(),
            skipped = plan.skipped_empty.len(),
            has_merge = plan.has_merge,
            "query dispatched"
        );

        self.active.insert(
            query_id,
            Arc::new(ActiveQuery {
                executive,
                merger,
                handler,
                merge_sql: plan.merge_sql,
                message_store,
            }),
        );
        Ok(query_id)
    }

    /// Wait for a query and produce its final rows. The query stays in the
    /// registry until collected exactly once.
    pub fn collect(&self, query_id: QueryId) -> Result<QueryResult> {
        let active = self
            .active
            .get(&query_id)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| Error::NoSuchKey(format!("no such query: {query_id}")))?;
        let state = active.executive.join();
        let outcome = match state {
            QueryState::Success => active.merger.finalize(),
            QueryState::Cancel => Err(Error::Cancelled),
            QueryState::Error | QueryState::Unknown => {
                let (code, msg) = active
                    .handler
                    .first_error()
                    .or_else(|| {
                        active
                            .message_store
                            .first_error()
                            .map(|m| (m.code, m.description))
                    })
                    .unwrap_or((-1, "query failed".to_string()));
                Err(Error::WorkerExec { code, msg })
            }
        };
        self.active.remove(&query_id);
        outcome
    }

    /// Squash a running query. Resolves KILL and CANCEL directives.
    pub fn cancel_query(&self, query_id: QueryId) -> Result<()> {
        let active = self
            .active
            .get(&query_id)
            .map(|a| Arc::clone(&a))
            .ok_or_else(|| Error::NoSuchKey(format!("no such query: {query_id}")))?;
        active.executive.squash();
        Ok(())
    }

    /// Messages for the user-visible log of one active query.
    pub fn message_store(&self, query_id: QueryId) -> Option<Arc<MessageStore>> {
        self.active
            .get(&query_id)
            .map(|a| Arc::clone(&a.message_store))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Introspection rows for `SHOW [FULL] PROCESSLIST`.
    fn process_list(&self, full: bool) -> QueryResult {
        let mut columns = vec![
            "query_id".to_string(),
            "jobs".to_string(),
            "skipped_chunks".to_string(),
        ];
        if full {
            columns.push("messages".to_string());
        }
        let mut rows: Vec<Vec<Value>> = self
            .active
            .iter()
            .map(|entry| {
                let a = entry.value();
                let mut row = vec![
                    Value::Int(a.executive.query_id() as i64),
                    Value::Int(a.executive.job_count() as i64),
                    Value::Int(a.executive.skipped_empty() as i64),
                ];
                if full {
                    row.push(Value::Int(a.message_store.message_count() as i64));
                }
                row
            })
            .collect();
        rows.sort_by(|a, b| a[0].compare(&b[0]));
        QueryResult::new(columns, rows)
    }

    /// Answer `SELECT COUNT(*) FROM <t>` from recorded row counts when the
    /// metadata has them; fall through to normal planning otherwise.
    fn try_count_star_shortcut(
        &self,
        default_db: &str,
        sql: &str,
    ) -> Result<Option<QueryResult>> {
        let Ok(stmt) = crate::parser::parse_select(sql) else {
            return Ok(None);
        };
        let Some((db, table)) = simple_count_star(&stmt) else {
            return Ok(None);
        };
        let db = db.unwrap_or_else(|| default_db.to_string());
        let Some(count) = self.partition_map.table_row_count(&db, &table) else {
            return Ok(None);
        };
        let name = stmt.select_list[0].output_name();
        Ok(Some(QueryResult::new(
            vec![name],
            vec![vec![Value::Int(count as i64)]],
        )))
    }
}
