// Chunk-affinity scheduling with per-session fair share.
//
// Queued work is partitioned by session (user query id). Dispatch picks the
// session with the fewest running tasks, FIFO within it, which gives every
// session an approximately even share of the pool. Within a session, tasks
// for the same chunk are grouped so consecutive dispatches hit the same
// chunk tables while the page cache is warm.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::global::{ChunkId, QueryId};
use crate::worker::task::Task;

struct ChunkGroup {
    chunk_id: ChunkId,
    tasks: VecDeque<Arc<Task>>,
}

struct SessionQueue {
    session: QueryId,
    running: usize,
    groups: VecDeque<ChunkGroup>,
}

impl SessionQueue {
    fn queued(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }
}

#[derive(Default)]
pub struct GroupScheduler {
    sessions: Mutex<Vec<SessionQueue>>,
}

impl GroupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, task: Arc<Task>) {
        let mut sessions = self.sessions.lock();
        let session = task.session();
        let idx = match sessions.iter().position(|s| s.session == session) {
            Some(i) => i,
            None => {
                sessions.push(SessionQueue {
                    session,
                    running: 0,
                    groups: VecDeque::new(),
                });
                sessions.len() - 1
            }
        };
        let entry = &mut sessions[idx];
        let chunk_id = task.chunk_id();
        match entry.groups.iter().position(|g| g.chunk_id == chunk_id) {
            Some(pos) => entry.groups[pos].tasks.push_back(task),
            None => {
                let mut tasks = VecDeque::new();
                tasks.push_back(task);
                entry.groups.push_back(ChunkGroup { chunk_id, tasks });
            }
        }
    }

    /// Non-blocking dispatch following the fair-share rule.
    pub fn try_get(&self) -> Option<Arc<Task>> {
        let mut sessions = self.sessions.lock();
        // Session with fewest running tasks among those with queued work.
        let idx = sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.queued() > 0)
            .min_by_key(|(_, s)| s.running)
            .map(|(i, _)| i)?;
        let entry = &mut sessions[idx];
        let group = entry.groups.front_mut()?;
        let task = group.tasks.pop_front()?;
        if group.tasks.is_empty() {
            entry.groups.pop_front();
        }
        entry.running += 1;
        Some(task)
    }

    pub fn finish(&self, task: &Arc<Task>) {
        let mut sessions = self.sessions.lock();
        if let Some(pos) = sessions.iter().position(|s| s.session == task.session()) {
            let entry = &mut sessions[pos];
            entry.running = entry.running.saturating_sub(1);
            if entry.running == 0 && entry.queued() == 0 {
                sessions.remove(pos);
            }
        }
    }

    pub fn cancel_queued(&self, query_id: QueryId) -> Vec<Arc<Task>> {
        let mut sessions = self.sessions.lock();
        let Some(pos) = sessions.iter().position(|s| s.session == query_id) else {
            return Vec::new();
        };
        let entry = &mut sessions[pos];
        let removed: Vec<Arc<Task>> = entry
            .groups
            .drain(..)
            .flat_map(|g| g.tasks.into_iter())
            .collect();
        if entry.running == 0 {
            sessions.remove(pos);
        }
        removed
    }

    pub fn queued_count(&self) -> usize {
        self.sessions.lock().iter().map(|s| s.queued()).sum()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TaskMsg;
    use crate::worker::send_channel::CollectingSendChannel;

    fn task(session: QueryId, job: i32, chunk: ChunkId) -> Arc<Task> {
        let msg = TaskMsg {
            query_id: session,
            job_id: job,
            attempt: 1,
            chunk_id: chunk,
            db: "sky".to_string(),
            fragments: vec!["SELECT 1".to_string()],
            result_table: "r".to_string(),
            scan_tables: Vec::new(),
            session,
        };
        Task::from_msg(msg, CollectingSendChannel::new())
    }

    #[test]
    fn fair_share_across_two_sessions() {
        let sched = GroupScheduler::new();
        for job in 0..8 {
            sched.queue(task(1, job, job));
            sched.queue(task(2, job, job));
        }
        // Simulate a pool of four threads taking work.
        let mut per_session = std::collections::HashMap::new();
        for _ in 0..4 {
            let t = sched.try_get().unwrap();
            *per_session.entry(t.session()).or_insert(0) += 1;
        }
        // Steady state: each session holds half the threads.
        assert_eq!(per_session.get(&1), Some(&2));
        assert_eq!(per_session.get(&2), Some(&2));
    }

    #[test]
    fn fifo_within_session() {
        let sched = GroupScheduler::new();
        sched.queue(task(1, 0, 10));
        sched.queue(task(1, 1, 10));
        sched.queue(task(1, 2, 11));
        assert_eq!(sched.try_get().unwrap().job_id(), 0);
        assert_eq!(sched.try_get().unwrap().job_id(), 1);
        assert_eq!(sched.try_get().unwrap().job_id(), 2);
        assert!(sched.try_get().is_none());
    }

    #[test]
    fn chunk_affinity_groups_same_chunk() {
        let sched = GroupScheduler::new();
        sched.queue(task(1, 0, 10));
        sched.queue(task(1, 1, 11));
        // A later task for chunk 10 joins the existing front group.
        sched.queue(task(1, 2, 10));
        assert_eq!(sched.try_get().unwrap().chunk_id(), 10);
        assert_eq!(sched.try_get().unwrap().chunk_id(), 10);
        assert_eq!(sched.try_get().unwrap().chunk_id(), 11);
    }

    #[test]
    fn cancel_queued_drains_session() {
        let sched = GroupScheduler::new();
        for job in 0..3 {
            sched.queue(task(5, job, job));
        }
        sched.queue(task(6, 0, 0));
        let removed = sched.cancel_queued(5);
        assert_eq!(removed.len(), 3);
        assert_eq!(sched.queued_count(), 1);
        assert_eq!(sched.try_get().unwrap().session(), 6);
    }

    #[test]
    fn finish_releases_session_bookkeeping() {
        let sched = GroupScheduler::new();
        sched.queue(task(1, 0, 0));
        let t = sched.try_get().unwrap();
        assert_eq!(sched.session_count(), 1);
        sched.finish(&t);
        assert_eq!(sched.session_count(), 0);
    }
}
