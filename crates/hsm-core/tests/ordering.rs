//! Dispatch ordering and snapshot visibility across threads.

use hsm_core::{Event, EventKind, Machine};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn events_from_one_thread_dispatch_in_posting_order() {
    let m = Machine::new("m");
    let seqs = Arc::new(Mutex::new(Vec::new()));
    let in_handler = Arc::new(Mutex::new(false));

    {
        let seqs = Arc::clone(&seqs);
        let in_handler = Arc::clone(&in_handler);
        m.register("s", move |m, _, ev| {
            if ev.kind() == EventKind::Step {
                {
                    // Serialization check: no other handler invocation is
                    // in flight while we are.
                    let mut flag = in_handler.lock().unwrap();
                    assert!(!*flag, "handler re-entered");
                    *flag = true;
                }
                thread::sleep(Duration::from_millis(1));
                seqs.lock().unwrap().push(ev.seq());
                *in_handler.lock().unwrap() = false;
                if ev.seq() == 63 {
                    m.stop();
                }
            }
            true
        });
    }
    m.change_state("s");
    for i in 0..64 {
        m.post(Event::new(EventKind::Step).with_seq(i));
    }
    m.start(false).unwrap();
    m.run().unwrap();

    assert_eq!(*seqs.lock().unwrap(), (0..64).collect::<Vec<i64>>());
}

#[test]
fn per_producer_order_survives_concurrent_posting() {
    const PRODUCERS: i64 = 4;
    const PER_PRODUCER: i64 = 50;

    let m = Machine::new("m");
    let seen: Arc<Mutex<Vec<(i64, i64)>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let seen = Arc::clone(&seen);
        m.register("s", move |m, _, ev| {
            if ev.kind() == EventKind::Step {
                let producer = ev.seq() / PER_PRODUCER;
                let index = ev.seq() % PER_PRODUCER;
                let mut seen = seen.lock().unwrap();
                seen.push((producer, index));
                if seen.len() as i64 == PRODUCERS * PER_PRODUCER {
                    m.stop();
                }
            }
            true
        });
    }
    m.change_state("s");
    m.start(true).unwrap();

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let m = m.clone();
        producers.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                m.post(Event::new(EventKind::Step).with_seq(p * PER_PRODUCER + i));
            }
        }));
    }
    for t in producers {
        t.join().unwrap();
    }

    // The worker stops itself once every event has been dispatched.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().len() as i64 != PRODUCERS * PER_PRODUCER {
        assert!(std::time::Instant::now() < deadline, "dispatch stalled");
        thread::sleep(Duration::from_millis(5));
    }

    let seen = seen.lock().unwrap();
    for p in 0..PRODUCERS {
        let indices: Vec<i64> = seen
            .iter()
            .filter(|(producer, _)| *producer == p)
            .map(|(_, index)| *index)
            .collect();
        assert_eq!(indices, (0..PER_PRODUCER).collect::<Vec<i64>>());
    }
}

#[test]
fn snapshot_tracks_committed_transitions_from_any_thread() {
    let m = Machine::new("m");
    m.register("A", |_, _, _| true);
    m.register("B", |m, _, ev| {
        if ev.kind() == EventKind::Entry {
            m.stop();
        }
        true
    });

    assert_eq!(m.current_state(), "");
    m.change_state("A");
    m.start(true).unwrap();

    // Wait until A is committed, observed from this (non-worker) thread.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while m.current_state() != "A" {
        assert!(std::time::Instant::now() < deadline, "A never committed");
        thread::sleep(Duration::from_millis(2));
    }

    let reader = m.clone();
    let reader_thread = thread::spawn(move || {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while reader.current_state() != "B" {
            assert!(std::time::Instant::now() < deadline, "B never committed");
            thread::sleep(Duration::from_millis(2));
        }
    });

    m.change_state("B");
    reader_thread.join().unwrap();
    assert_eq!(m.current_state(), "B");
}

#[test]
fn no_event_posted_during_exit_lands_between_exit_and_entry() {
    let m = Machine::new("m");
    let trace = Arc::new(Mutex::new(Vec::new()));

    {
        let trace = Arc::clone(&trace);
        m.register("A", move |m, state, ev| {
            trace.lock().unwrap().push(format!("{state}/{}", ev.kind()));
            match ev.kind() {
                EventKind::Step => m.change_state("B"),
                EventKind::Exit => {
                    // Posted mid-transition: must queue after B's ENTRY.
                    m.post(Event::new(EventKind::Cancel));
                }
                _ => {}
            }
            true
        });
    }
    {
        let trace = Arc::clone(&trace);
        m.register("B", move |m, state, ev| {
            trace.lock().unwrap().push(format!("{state}/{}", ev.kind()));
            if ev.kind() == EventKind::Cancel {
                m.stop();
            }
            true
        });
    }

    m.change_state("A");
    m.post(Event::new(EventKind::Step));
    m.start(false).unwrap();
    m.run().unwrap();

    assert_eq!(
        *trace.lock().unwrap(),
        vec!["A/ENTRY", "A/STEP", "A/EXIT", "B/ENTRY", "B/CANCEL"]
    );
}
