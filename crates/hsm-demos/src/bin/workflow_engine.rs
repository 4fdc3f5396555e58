//! Multi-step workflow engine demo.
//!
//! One machine walks a data-processing pipeline:
//! idle → initializing → loading → validating → processing → saving →
//! cleanup, with an error state reachable from failed steps. The loading
//! step races a hard deadline against a simulated completion and retries up
//! to a cap; the processing step advances 25% per tick and honors
//! pause/resume commands delivered as STEP payloads from another thread.

use anyhow::Result;
use clap::Parser;
use hsm_core::{Event, EventKind, Machine};
use rand::Rng;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "workflow-engine", version, about = "Multi-step workflow engine demo")]
struct Args {
    /// Optional configuration file path (overrides discovery of `demos.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Skip the pause/resume poke during the processing step.
    #[arg(long)]
    no_pause_resume: bool,
}

const TOTAL_STEPS: u32 = 6;

#[derive(Default)]
struct Workflow {
    current_step: u32,
    retry_count: u32,
    paused: bool,
    data: Option<String>,
    started: Option<Instant>,
    /// Loading: hard deadline and simulated completion, told apart by seq.
    timeout_timer: i64,
    success_timer: i64,
    /// Processing.
    progress: u32,
    progress_timer: i64,
}

fn banner(step: u32, title: &str) {
    println!("\n[step {step}/{TOTAL_STEPS}] {title}");
}

fn register_states(machine: &Machine, wf: Arc<Mutex<Workflow>>, cfg: hsm_demos::config::WorkflowConfig) {
    let load_timeout = Duration::from_millis(cfg.load_timeout_ms);
    let load_duration = Duration::from_millis(cfg.load_duration_ms);

    {
        let wf = Arc::clone(&wf);
        machine.register("idle", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                println!("[workflow] idle, waiting for a start command");
                true
            }
            EventKind::Start => {
                println!("[workflow] start received");
                let mut wf = wf.lock().expect("workflow poisoned");
                wf.current_step = 0;
                wf.retry_count = 0;
                wf.started = Some(Instant::now());
                drop(wf);
                m.change_state("initializing");
                true
            }
            _ => false,
        });
    }

    {
        let wf = Arc::clone(&wf);
        let init = Duration::from_millis(cfg.init_ms);
        machine.register("initializing", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                wf.lock().expect("workflow poisoned").current_step = 1;
                banner(1, "initializing");
                println!("  -> allocating resources");
                m.schedule_timer(init);
                true
            }
            EventKind::Timeout => {
                println!("  initialization done");
                m.change_state("loading");
                true
            }
            EventKind::Cancel => {
                println!("  initialization cancelled");
                m.change_state("cleanup");
                true
            }
            _ => false,
        });
    }

    {
        let wf = Arc::clone(&wf);
        let success_pct = cfg.load_success_pct;
        let max_retries = cfg.max_retries;
        machine.register("loading", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                let mut w = wf.lock().expect("workflow poisoned");
                w.current_step = 2;
                banner(2, "loading data");
                println!("  -> contacting data source");
                w.timeout_timer = m.schedule_timer(load_timeout);
                if rand::thread_rng().gen_range(0..100) < success_pct {
                    w.success_timer = m.schedule_timer(load_duration);
                    println!(
                        "  -> loading ({}ms expected)",
                        load_duration.as_millis()
                    );
                } else {
                    println!("  !! simulated network stall, this may time out");
                }
                true
            }
            EventKind::Timeout => {
                let mut w = wf.lock().expect("workflow poisoned");
                if ev.seq() == w.success_timer {
                    // Simulated completion won the race; hand the result to
                    // ourselves as a proper event.
                    w.success_timer = 0;
                    drop(w);
                    m.post(
                        Event::new(EventKind::ResultOk)
                            .with_name("load_complete")
                            .with_source("loader"),
                    );
                    return true;
                }
                if ev.seq() != w.timeout_timer {
                    // Stray timer from an earlier incarnation of this state.
                    return true;
                }
                w.timeout_timer = 0;
                println!("  !! load timed out");
                if w.retry_count < max_retries {
                    w.retry_count += 1;
                    println!("  retry {}/{}", w.retry_count, max_retries);
                    drop(w);
                    // Leave and re-enter to restart the load from scratch.
                    m.change_state("reloading");
                } else {
                    println!("  !! retry limit reached");
                    drop(w);
                    m.change_state("error");
                }
                true
            }
            EventKind::ResultOk => {
                let mut w = wf.lock().expect("workflow poisoned");
                if w.timeout_timer > 0 {
                    m.cancel_timer(w.timeout_timer);
                    w.timeout_timer = 0;
                }
                if w.success_timer > 0 {
                    m.cancel_timer(w.success_timer);
                    w.success_timer = 0;
                }
                w.data = Some(String::from("sample data [1234567890]"));
                w.retry_count = 0;
                println!("  loaded: {}", w.data.as_deref().unwrap_or_default());
                drop(w);
                m.change_state("validating");
                true
            }
            EventKind::Exit => {
                let mut w = wf.lock().expect("workflow poisoned");
                if w.timeout_timer > 0 {
                    m.cancel_timer(w.timeout_timer);
                    w.timeout_timer = 0;
                }
                if w.success_timer > 0 {
                    m.cancel_timer(w.success_timer);
                    w.success_timer = 0;
                }
                true
            }
            _ => false,
        });
    }

    // Trampoline state: re-entering `loading` requires leaving it first,
    // since same-state transitions are a no-op.
    machine.register("reloading", move |m, _, ev| {
        if ev.kind() == EventKind::Entry {
            m.change_state("loading");
        }
        true
    });

    {
        let wf = Arc::clone(&wf);
        let validate = Duration::from_millis(cfg.validate_ms);
        machine.register("validating", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                wf.lock().expect("workflow poisoned").current_step = 3;
                banner(3, "validating data");
                m.schedule_timer(validate);
                true
            }
            EventKind::Timeout => {
                let ok = wf
                    .lock()
                    .expect("workflow poisoned")
                    .data
                    .as_deref()
                    .is_some_and(|d| !d.is_empty());
                if ok {
                    println!("  validation passed");
                    m.change_state("processing");
                } else {
                    println!("  !! validation failed");
                    m.change_state("error");
                }
                true
            }
            _ => false,
        });
    }

    {
        let wf = Arc::clone(&wf);
        let tick = Duration::from_millis(cfg.progress_tick_ms);
        machine.register("processing", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                let mut w = wf.lock().expect("workflow poisoned");
                w.current_step = 4;
                w.progress = 0;
                banner(4, "processing data");
                w.progress_timer = m.schedule_timer(tick);
                true
            }
            EventKind::Timeout => {
                let mut w = wf.lock().expect("workflow poisoned");
                if w.paused {
                    // Stray tick from a timer that raced the pause.
                    return true;
                }
                w.progress += 25;
                println!("  -> progress: {}%", w.progress);
                if w.progress >= 100 {
                    println!("  processing done");
                    drop(w);
                    m.change_state("saving");
                } else {
                    w.progress_timer = m.schedule_timer(tick);
                }
                true
            }
            EventKind::Step => {
                let Some(cmd) = ev.payload_as::<String>() else {
                    return false;
                };
                let mut w = wf.lock().expect("workflow poisoned");
                match cmd.as_str() {
                    "pause" => {
                        println!("  || processing paused");
                        if w.progress_timer > 0 {
                            m.cancel_timer(w.progress_timer);
                            w.progress_timer = 0;
                        }
                        w.paused = true;
                        true
                    }
                    "resume" => {
                        println!("  >> processing resumed");
                        w.paused = false;
                        w.progress_timer = m.schedule_timer(tick);
                        true
                    }
                    _ => false,
                }
            }
            EventKind::Exit => {
                let mut w = wf.lock().expect("workflow poisoned");
                if w.progress_timer > 0 {
                    m.cancel_timer(w.progress_timer);
                    w.progress_timer = 0;
                }
                true
            }
            _ => false,
        });
    }

    {
        let wf = Arc::clone(&wf);
        let save = Duration::from_millis(cfg.save_ms);
        machine.register("saving", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                wf.lock().expect("workflow poisoned").current_step = 5;
                banner(5, "saving results");
                m.schedule_timer(save);
                true
            }
            EventKind::Timeout => {
                println!("  results saved");
                m.change_state("cleanup");
                true
            }
            _ => false,
        });
    }

    {
        let wf = Arc::clone(&wf);
        let cleanup = Duration::from_millis(cfg.cleanup_ms);
        machine.register("cleanup", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                wf.lock().expect("workflow poisoned").current_step = 6;
                banner(6, "cleaning up");
                m.schedule_timer(cleanup);
                true
            }
            EventKind::Timeout => {
                let elapsed = wf
                    .lock()
                    .expect("workflow poisoned")
                    .started
                    .map(|t| t.elapsed().as_secs())
                    .unwrap_or_default();
                println!("  cleanup done");
                println!("\n=== workflow finished in {elapsed}s ===");
                m.stop();
                true
            }
            _ => false,
        });
    }

    {
        let wf = Arc::clone(&wf);
        machine.register("error", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                let w = wf.lock().expect("workflow poisoned");
                println!(
                    "\n!!! workflow failed at step {}/{TOTAL_STEPS} after {} retries",
                    w.current_step, w.retry_count
                );
                drop(w);
                m.schedule_timer(Duration::from_millis(1000));
                true
            }
            EventKind::Timeout => {
                m.change_state("cleanup");
                true
            }
            _ => false,
        });
    }
}

fn main() -> Result<()> {
    let _log_guard = hsm_demos::init_logging("workflow-engine.log");
    hsm_demos::install_panic_hook();
    let args = Args::parse();
    let cfg = hsm_demos::load_from(args.config)?;
    info!(target: "demo.workflow", "starting");

    println!("=== multi-step workflow engine demo ===");

    let workflow = Machine::new("workflow");
    let wf = Arc::new(Mutex::new(Workflow::default()));
    register_states(&workflow, Arc::clone(&wf), cfg.workflow.clone());
    workflow.change_state("idle");
    workflow.start(false)?;
    workflow.post(
        Event::new(EventKind::Start)
            .with_name("workflow_start")
            .with_source("main"),
    );

    // Poke the processing step from another thread to show cross-thread
    // command delivery; if the workflow is in a different state when these
    // land, they are simply refused and dropped.
    if !args.no_pause_resume {
        let driver = workflow.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(3600));
            driver.post(
                Event::new(EventKind::Step)
                    .with_name("command")
                    .with_source("operator")
                    .with_payload(Arc::new(String::from("pause"))),
            );
            std::thread::sleep(Duration::from_millis(700));
            driver.post(
                Event::new(EventKind::Step)
                    .with_name("command")
                    .with_source("operator")
                    .with_payload(Arc::new(String::from("resume"))),
            );
        });
    }

    workflow.run()?;
    info!(target: "demo.workflow", "finished");
    Ok(())
}
