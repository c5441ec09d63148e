// Throughput of the queue/dispatch/finish cycle on the blend scheduler.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use skyserv::proto::TaskMsg;
use skyserv::sched::{BlendScheduler, Scheduler};
use skyserv::worker::task::Task;
use skyserv::worker::CollectingSendChannel;

fn make_task(session: u64, job: i32, scan: bool) -> Arc<Task> {
    let msg = TaskMsg {
        query_id: session,
        job_id: job,
        attempt: 1,
        chunk_id: job,
        db: "sky".to_string(),
        fragments: vec!["SELECT 1".to_string()],
        result_table: "r".to_string(),
        scan_tables: if scan {
            vec!["sky.Object".to_string()]
        } else {
            Vec::new()
        },
        session,
    };
    Task::from_msg(msg, CollectingSendChannel::new())
}

fn bench_dispatch_cycle(c: &mut Criterion) {
    c.bench_function("group_dispatch_cycle", |b| {
        let sched = BlendScheduler::new();
        b.iter(|| {
            for job in 0..64 {
                sched.queue_cmd(make_task((job % 4) as u64, job, false));
            }
            while let Some(task) = sched.get_cmd(false) {
                sched.command_finish(black_box(&task));
            }
        });
    });

    c.bench_function("scan_dispatch_cycle", |b| {
        let sched = BlendScheduler::new();
        b.iter(|| {
            for job in 0..64 {
                sched.queue_cmd(make_task((job % 4) as u64, job, true));
            }
            while let Some(task) = sched.get_cmd(false) {
                sched.command_finish(black_box(&task));
            }
        });
    });
}

criterion_group!(benches, bench_dispatch_cycle);
criterion_main!(benches);
