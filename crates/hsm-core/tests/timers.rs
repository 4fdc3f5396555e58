//! Timer service: delivery window, cancellation, id uniqueness, stray
//! TIMEOUT tolerance. Upper bounds are generous so CI jitter cannot flake.

use hsm_core::{Event, EventKind, Machine};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn timer_delivers_one_timeout_with_matching_seq_and_source() {
    let m = Machine::new("waiter");
    let observed = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();

    {
        let observed = Arc::clone(&observed);
        m.register("w", move |m, _, ev| {
            if ev.kind() == EventKind::Timeout {
                observed.lock().unwrap().push((
                    ev.seq(),
                    ev.source().unwrap_or_default().to_string(),
                    ev.name().unwrap_or_default().to_string(),
                    started.elapsed(),
                ));
                m.stop();
            }
            true
        });
    }
    m.change_state("w");
    let id = m.schedule_timer(Duration::from_millis(200));
    m.start(false).unwrap();
    m.run().unwrap();

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    let (seq, source, name, elapsed) = &observed[0];
    assert_eq!(*seq, id);
    assert_eq!(source, "waiter");
    assert_eq!(name, "TIMER_EXPIRED");
    assert!(*elapsed >= Duration::from_millis(200));
    assert!(*elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
}

#[test]
fn cancelled_timer_never_delivers() {
    let m = Machine::new("m");
    let cancelled_seqs = Arc::new(Mutex::new(Vec::new()));
    let target = m.schedule_timer(Duration::from_millis(500));

    {
        let cancelled_seqs = Arc::clone(&cancelled_seqs);
        m.register("w", move |m, _, ev| {
            if ev.kind() == EventKind::Timeout {
                if ev.seq() == target {
                    cancelled_seqs.lock().unwrap().push(ev.seq());
                } else {
                    // The guard timer: long past the cancelled deadline.
                    m.stop();
                }
            }
            true
        });
    }
    m.change_state("w");

    assert!(m.cancel_timer(target));
    // Guard fires well after the cancelled timer would have.
    m.schedule_timer(Duration::from_millis(800));
    m.start(false).unwrap();
    m.run().unwrap();

    assert!(cancelled_seqs.lock().unwrap().is_empty());
}

#[test]
fn two_timers_deliver_in_deadline_order() {
    let m = Machine::new("m");
    let order = Arc::new(Mutex::new(Vec::new()));
    let slow = m.schedule_timer(Duration::from_millis(160));
    let fast = m.schedule_timer(Duration::from_millis(40));

    {
        let order = Arc::clone(&order);
        m.register("w", move |m, _, ev| {
            if ev.kind() == EventKind::Timeout {
                order.lock().unwrap().push(ev.seq());
                if ev.seq() == slow {
                    m.stop();
                }
            }
            true
        });
    }
    m.change_state("w");
    m.start(false).unwrap();
    m.run().unwrap();

    assert_eq!(*order.lock().unwrap(), vec![fast, slow]);
}

#[test]
fn handler_can_reschedule_from_timeout() {
    let m = Machine::new("m");
    let beats = Arc::new(Mutex::new(0u32));
    {
        let beats = Arc::clone(&beats);
        m.register("hb", move |m, _, ev| {
            if ev.kind() == EventKind::Entry {
                m.schedule_timer(Duration::from_millis(20));
                return true;
            }
            if ev.kind() == EventKind::Timeout {
                let mut beats = beats.lock().unwrap();
                *beats += 1;
                if *beats == 3 {
                    m.stop();
                } else {
                    m.schedule_timer(Duration::from_millis(20));
                }
            }
            true
        });
    }
    m.change_state("hb");
    m.start(false).unwrap();
    m.run().unwrap();
    assert_eq!(*beats.lock().unwrap(), 3);
}

#[test]
fn cancel_from_another_thread_is_safe() {
    let m = Machine::new("m");
    let fired = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    let id = m.schedule_timer(Duration::from_millis(300));

    {
        let fired = Arc::clone(&fired);
        m.register("w", move |m, _, ev| {
            if ev.kind() == EventKind::Timeout {
                fired.lock().unwrap().push(ev.seq());
                if ev.seq() != id {
                    let _ = done_tx.send(());
                    m.stop();
                }
            }
            true
        });
    }
    m.change_state("w");
    // Guard fires well after the cancelled deadline and shuts the worker down.
    m.schedule_timer(Duration::from_millis(600));
    m.start(true).unwrap();

    let canceller = m.clone();
    let t = std::thread::spawn(move || canceller.cancel_timer(id));
    assert!(t.join().unwrap());
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("guard timer fired");

    let fired = fired.lock().unwrap();
    assert!(!fired.contains(&id), "cancelled timer fired: {fired:?}");
}

#[test]
fn stray_timeout_after_state_change_carries_unknown_seq() {
    // A timer scheduled in one state may fire after the machine moved on;
    // the new state's handler sees a TIMEOUT whose seq it never issued and
    // must be able to shrug it off.
    let m = Machine::new("m");
    let strays = Arc::new(Mutex::new(Vec::new()));

    m.register("first", |m, _, ev| {
        if ev.kind() == EventKind::Entry {
            m.schedule_timer(Duration::from_millis(30));
            // Leave before the timer fires; deliberately do not cancel.
            m.change_state("second");
        }
        true
    });
    {
        let strays = Arc::clone(&strays);
        m.register("second", move |m, _, ev| {
            match ev.kind() {
                EventKind::Timeout => {
                    strays.lock().unwrap().push(ev.seq());
                }
                EventKind::Step => m.stop(),
                _ => {}
            }
            true
        });
    }

    m.change_state("first");
    let stopper = m.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        stopper.post(Event::new(EventKind::Step));
    });
    m.start(false).unwrap();
    m.run().unwrap();

    // The stray arrived in "second" and was tolerated, not lost or doubled.
    assert_eq!(strays.lock().unwrap().len(), 1);
}
