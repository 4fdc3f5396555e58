//! Cross-module flow orchestration demo.
//!
//! Modules A and B each run a five-state machine on their own worker thread.
//! A scheduler machine on the main thread drives the business sequence
//! A1→A2→B1→B2→B3→B4→A3→A4→B5→A5: it waits for both modules to report
//! ready, posts `START` for each step, and advances on each `RESULT_OK`
//! completion that bubbles back. Everything crosses threads through the
//! runtime's event queues.

use anyhow::Result;
use clap::Parser;
use hsm_core::{Event, EventKind, ExecContext, Machine};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

const A_STATES: [&str; 5] = ["A1", "A2", "A3", "A4", "A5"];
const B_STATES: [&str; 5] = ["B1", "B2", "B3", "B4", "B5"];

/// The scheduler's step table: which module completes which state, in order.
const SEQUENCE: [(&str, &str); 10] = [
    ("A", "A1"),
    ("A", "A2"),
    ("B", "B1"),
    ("B", "B2"),
    ("B", "B3"),
    ("B", "B4"),
    ("A", "A3"),
    ("A", "A4"),
    ("B", "B5"),
    ("A", "A5"),
];

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "cross-module-flow", version, about = "Cross-module flow scheduling demo")]
struct Args {
    /// Optional configuration file path (overrides discovery of `demos.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

#[derive(Default)]
struct FlowState {
    mod_a_ready: bool,
    mod_b_ready: bool,
    completed: usize,
}

fn register_module(module: &Machine, label: &'static str, states: &[&'static str], step: Duration) {
    for state in states {
        module.register(*state, move |m, state, ev| match ev.kind() {
            EventKind::Entry => {
                println!("[{label}] entered state {state}");
                // The first state doubles as the module's ready signal.
                if state.ends_with('1') {
                    if let Some(parent) = m.parent() {
                        parent.post(
                            Event::new(EventKind::Step)
                                .with_name("module_ready")
                                .with_source(label),
                        );
                        println!("[{label}] ready, notified scheduler");
                    }
                }
                true
            }
            EventKind::Start => {
                println!("[{label}] working on {state}");
                // Simulated asynchronous work.
                m.schedule_timer(step);
                true
            }
            EventKind::Timeout => {
                println!("[{label}] finished {state}");
                if let Some(parent) = m.parent() {
                    parent.post(
                        Event::new(EventKind::ResultOk)
                            .with_name(state)
                            .with_source(label),
                    );
                }
                true
            }
            _ => false,
        });
    }
}

fn kick_step(mod_a: &Machine, mod_b: &Machine, idx: usize) {
    let (label, state) = SEQUENCE[idx];
    let target = if label == "A" { mod_a } else { mod_b };
    println!("[scheduler] starting {state}");
    target.change_state(state);
    target.post(
        Event::new(EventKind::Start)
            .with_name(state)
            .with_source("scheduler"),
    );
}

fn main() -> Result<()> {
    let _log_guard = hsm_demos::init_logging("cross-module-flow.log");
    hsm_demos::install_panic_hook();
    let args = Args::parse();
    let cfg = hsm_demos::load_from(args.config)?;
    let step = Duration::from_millis(cfg.flow.step_duration_ms);
    info!(target: "demo.flow", step_ms = cfg.flow.step_duration_ms, "starting");

    println!("=== cross-module flow scheduling demo ===\n");

    let mod_a = Machine::new("modA");
    let mod_b = Machine::new("modB");
    register_module(&mod_a, "A", &A_STATES, step);
    register_module(&mod_b, "B", &B_STATES, step);
    mod_a.change_state("A1");
    mod_b.change_state("B1");

    // The scheduler shares the main-thread context; this demo drives it with
    // `run` below.
    let main_ctx = ExecContext::new();
    let scheduler = Machine::with_context("scheduler", Arc::clone(&main_ctx));
    mod_a.set_parent(&scheduler);
    mod_b.set_parent(&scheduler);

    {
        let flow = Mutex::new(FlowState::default());
        let mod_a = mod_a.clone();
        let mod_b = mod_b.clone();
        scheduler.register("flow", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                println!("[scheduler] waiting for modules to come up...");
                true
            }
            EventKind::Step if ev.name() == Some("module_ready") => {
                let mut flow = flow.lock().expect("flow state poisoned");
                match ev.source() {
                    Some("A") => flow.mod_a_ready = true,
                    Some("B") => flow.mod_b_ready = true,
                    _ => {}
                }
                if flow.mod_a_ready && flow.mod_b_ready && flow.completed == 0 {
                    println!("[scheduler] all modules ready, starting the flow");
                    kick_step(&mod_a, &mod_b, 0);
                }
                true
            }
            EventKind::ResultOk => {
                println!(
                    "[scheduler] completed: {} (from {})",
                    ev.name().unwrap_or_default(),
                    ev.source().unwrap_or_default()
                );
                let mut flow = flow.lock().expect("flow state poisoned");
                flow.completed += 1;
                let next = flow.completed;
                drop(flow);
                if next < SEQUENCE.len() {
                    kick_step(&mod_a, &mod_b, next);
                } else {
                    println!("\n[scheduler] flow complete");
                    m.stop();
                }
                true
            }
            _ => false,
        });
    }
    scheduler.change_state("flow");

    mod_a.start(true)?;
    mod_b.start(true)?;
    scheduler.start(false)?;
    scheduler.run()?;

    mod_a.stop();
    mod_b.stop();
    info!(target: "demo.flow", "finished");
    Ok(())
}
