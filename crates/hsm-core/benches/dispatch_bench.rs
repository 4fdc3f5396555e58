//! Post→dispatch throughput through a worker-thread machine.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use hsm_core::{Event, EventKind, Machine};

const BATCH: i64 = 1_000;

fn bench_post_dispatch(c: &mut Criterion) {
    c.bench_function("post_dispatch_1k", |b| {
        b.iter_batched(
            || {
                let m = Machine::new("bench");
                let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
                m.register("run", move |_, _, ev| {
                    if ev.seq() == BATCH - 1 {
                        let _ = done_tx.send(());
                    }
                    true
                });
                m.change_state("run");
                m.start(true).expect("worker spawns");
                (m, done_rx)
            },
            |(m, done_rx)| {
                for i in 0..BATCH {
                    m.post(Event::new(EventKind::Step).with_seq(i));
                }
                done_rx.recv().expect("batch dispatched");
                m.stop();
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, bench_post_dispatch);
criterion_main!(benches);
