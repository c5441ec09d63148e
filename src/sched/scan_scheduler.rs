// Shared-scan scheduling.
//
// Tasks are grouped by the union of their scan tables; groups line up in a
// table-ordering queue and only the front group's tasks are eligible to
// start, so one sequential pass over a large table serves every query in
// the group. A group leaves the queue once it has neither queued nor
// running tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::global::QueryId;
use crate::worker::task::Task;

struct ScanGroup {
    key: String,
    tasks: VecDeque<Arc<Task>>,
    running: usize,
}

#[derive(Default)]
pub struct ScanScheduler {
    groups: Mutex<VecDeque<ScanGroup>>,
}

impl ScanScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, task: Arc<Task>) {
        let key = task.scan_group_key();
        let mut groups = self.groups.lock();
        match groups.iter().position(|g| g.key == key) {
            Some(pos) => groups[pos].tasks.push_back(task),
            None => {
                let mut tasks = VecDeque::new();
                tasks.push_back(task);
                groups.push_back(ScanGroup {
                    key,
                    tasks,
                    running: 0,
                });
            }
        }
    }

    /// Non-blocking dispatch: only the front group is eligible.
    pub fn try_get(&self) -> Option<Arc<Task>> {
        let mut groups = self.groups.lock();
        let front = groups.front_mut()?;
        match front.tasks.pop_front() {
            Some(task) => {
                front.running += 1;
                Some(task)
            }
            None => None,
        }
    }

    pub fn finish(&self, task: &Arc<Task>) {
        let key = task.scan_group_key();
        let mut groups = self.groups.lock();
        if let Some(pos) = groups.iter().position(|g| g.key == key) {
            let group = &mut groups[pos];
            group.running = group.running.saturating_sub(1);
            // The pass is over: let the next table ordering through.
            if group.running == 0 && group.tasks.is_empty() {
                groups.remove(pos);
            }
        }
    }

    pub fn cancel_queued(&self, query_id: QueryId) -> Vec<Arc<Task>> {
        let mut removed = Vec::new();
        let mut groups = self.groups.lock();
        for group in groups.iter_mut() {
            let mut kept = VecDeque::new();
            while let Some(task) = group.tasks.pop_front() {
                if task.query_id() == query_id {
                    removed.push(task);
                } else {
                    kept.push_back(task);
                }
            }
            group.tasks = kept;
        }
        groups.retain(|g| g.running > 0 || !g.tasks.is_empty());
        removed
    }

    pub fn queued_count(&self) -> usize {
        self.groups.lock().iter().map(|g| g.tasks.len()).sum()
    }

    pub fn session_count(&self) -> usize {
        let groups = self.groups.lock();
        let mut sessions: Vec<QueryId> = groups
            .iter()
            .flat_map(|g| g.tasks.iter().map(|t| t.session()))
            .collect();
        sessions.sort_unstable();
        sessions.dedup();
        sessions.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().len()
    }
}
