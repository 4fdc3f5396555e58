//! IoT device connection manager demo.
//!
//! Three simulated devices each run their own state machine on a dedicated
//! worker thread: disconnected → connecting → connected, with heartbeat
//! monitoring, automatic reconnects, and an error state after too many
//! failed attempts. A controller machine on the main thread observes status
//! reports and error bubbles from all devices; a scheduler machine sharing
//! the controller's context staggers the connect requests and ends the demo
//! after a configured window.

use anyhow::Result;
use clap::Parser;
use hsm_core::{Event, EventKind, ExecContext, Machine};
use rand::Rng;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "device-manager", version, about = "Multi-device connection management demo")]
struct Args {
    /// Optional configuration file path (overrides discovery of `demos.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Number of simulated devices.
    #[arg(long, default_value_t = 3)]
    devices: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Reconnecting => "reconnecting",
            DeviceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

struct DeviceRuntime {
    status: DeviceStatus,
    retry_count: u32,
    heartbeat_timer: i64,
    heartbeat_fails: u32,
    connected_at: Option<Instant>,
}

/// Per-device context shared by all of the device's state handlers.
struct Device {
    id: String,
    address: String,
    runtime: Mutex<DeviceRuntime>,
}

impl Device {
    fn new(id: String, address: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            address,
            runtime: Mutex::new(DeviceRuntime {
                status: DeviceStatus::Disconnected,
                retry_count: 0,
                heartbeat_timer: 0,
                heartbeat_fails: 0,
                connected_at: None,
            }),
        })
    }

    fn set_status(&self, status: DeviceStatus) {
        self.runtime.lock().expect("device runtime poisoned").status = status;
    }

    /// Post a status report to the controller; the payload carries the
    /// status so the controller never peeks at device internals.
    fn report_status(&self, m: &Machine) {
        let status = self.runtime.lock().expect("device runtime poisoned").status;
        if let Some(parent) = m.parent() {
            parent.post(
                Event::new(EventKind::Step)
                    .with_name("device_status")
                    .with_source(&self.id)
                    .with_payload(Arc::new(status)),
            );
        }
    }

    fn report_error(&self, m: &Machine) {
        if let Some(parent) = m.parent() {
            parent.post(
                Event::new(EventKind::ResultError)
                    .with_name("device_error")
                    .with_source(&self.id),
            );
        }
    }
}

fn chance(pct: u32) -> bool {
    rand::thread_rng().gen_range(0..100) < pct
}

fn register_device_states(machine: &Machine, device: &Arc<Device>, cfg: &hsm_demos::config::DeviceConfig) {
    let heartbeat = Duration::from_millis(cfg.heartbeat_interval_ms);
    let connect = Duration::from_millis(cfg.connect_duration_ms);
    let max_retries = cfg.max_retries;
    let fail_streak = cfg.heartbeat_fail_streak;
    let connect_pct = cfg.connect_success_pct;
    let heartbeat_pct = cfg.heartbeat_success_pct;

    {
        let device = Arc::clone(device);
        machine.register("disconnected", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                device.set_status(DeviceStatus::Disconnected);
                println!("[{}] status: disconnected", device.id);
                let mut rt = device.runtime.lock().expect("device runtime poisoned");
                if rt.heartbeat_timer > 0 {
                    m.cancel_timer(rt.heartbeat_timer);
                    rt.heartbeat_timer = 0;
                }
                drop(rt);
                device.report_status(m);
                true
            }
            EventKind::Start => {
                println!("[{}] connect requested", device.id);
                device.runtime.lock().expect("device runtime poisoned").retry_count = 0;
                m.change_state("connecting");
                true
            }
            _ => false,
        });
    }

    {
        let device = Arc::clone(device);
        machine.register("connecting", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                device.set_status(DeviceStatus::Connecting);
                println!("[{}] connecting to {}...", device.id, device.address);
                // Simulated asynchronous connect attempt.
                m.schedule_timer(connect);
                true
            }
            EventKind::Timeout => {
                if chance(connect_pct) {
                    println!("[{}] connect ok", device.id);
                    device
                        .runtime
                        .lock()
                        .expect("device runtime poisoned")
                        .connected_at = Some(Instant::now());
                    m.change_state("connected");
                } else {
                    println!("[{}] connect failed", device.id);
                    let mut rt = device.runtime.lock().expect("device runtime poisoned");
                    if rt.retry_count < max_retries {
                        rt.retry_count += 1;
                        println!(
                            "[{}] retry {}/{}",
                            device.id, rt.retry_count, max_retries
                        );
                        drop(rt);
                        m.change_state("reconnecting");
                    } else {
                        println!("[{}] retry limit reached", device.id);
                        drop(rt);
                        m.change_state("error");
                    }
                }
                true
            }
            EventKind::Cancel => {
                println!("[{}] connect cancelled", device.id);
                m.change_state("disconnected");
                true
            }
            _ => false,
        });
    }

    {
        let device = Arc::clone(device);
        machine.register("connected", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                device.set_status(DeviceStatus::Connected);
                println!(
                    "[{}] status: connected, heartbeat every {}ms",
                    device.id,
                    heartbeat.as_millis()
                );
                let mut rt = device.runtime.lock().expect("device runtime poisoned");
                rt.retry_count = 0;
                rt.heartbeat_fails = 0;
                rt.heartbeat_timer = m.schedule_timer(heartbeat);
                drop(rt);
                device.report_status(m);
                true
            }
            EventKind::Timeout => {
                let mut rt = device.runtime.lock().expect("device runtime poisoned");
                if chance(heartbeat_pct) {
                    let uptime = rt
                        .connected_at
                        .map(|t| t.elapsed().as_secs())
                        .unwrap_or_default();
                    println!("[{}] heartbeat ok (up {}s)", device.id, uptime);
                    rt.heartbeat_fails = 0;
                    rt.heartbeat_timer = m.schedule_timer(heartbeat);
                } else {
                    rt.heartbeat_fails += 1;
                    println!(
                        "[{}] heartbeat missed ({}x)",
                        device.id, rt.heartbeat_fails
                    );
                    if rt.heartbeat_fails >= fail_streak {
                        println!("[{}] connection lost, reconnecting...", device.id);
                        rt.heartbeat_timer = 0;
                        drop(rt);
                        m.change_state("reconnecting");
                    } else {
                        rt.heartbeat_timer = m.schedule_timer(heartbeat);
                    }
                }
                true
            }
            EventKind::Cancel => {
                println!("[{}] disconnect requested", device.id);
                m.change_state("disconnected");
                true
            }
            EventKind::Exit => {
                let mut rt = device.runtime.lock().expect("device runtime poisoned");
                if rt.heartbeat_timer > 0 {
                    m.cancel_timer(rt.heartbeat_timer);
                    rt.heartbeat_timer = 0;
                }
                true
            }
            _ => false,
        });
    }

    {
        let device = Arc::clone(device);
        machine.register("reconnecting", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                device.set_status(DeviceStatus::Reconnecting);
                let rt = device.runtime.lock().expect("device runtime poisoned");
                println!(
                    "[{}] status: reconnecting (attempt {}/{})",
                    device.id, rt.retry_count, max_retries
                );
                drop(rt);
                m.schedule_timer(Duration::from_millis(1000));
                true
            }
            EventKind::Timeout => {
                m.change_state("connecting");
                true
            }
            EventKind::Cancel => {
                println!("[{}] reconnect cancelled", device.id);
                m.change_state("disconnected");
                true
            }
            _ => false,
        });
    }

    {
        let device = Arc::clone(device);
        machine.register("error", move |m, _, ev| match ev.kind() {
            EventKind::Entry => {
                device.set_status(DeviceStatus::Error);
                println!("[{}] status: error, giving up", device.id);
                device.report_error(m);
                true
            }
            EventKind::Start => {
                println!("[{}] restarting from error state", device.id);
                device.runtime.lock().expect("device runtime poisoned").retry_count = 0;
                m.change_state("connecting");
                true
            }
            _ => false,
        });
    }
}

fn register_controller(controller: &Machine) {
    controller.register("monitoring", |_, _, ev| match ev.kind() {
        EventKind::Entry => {
            println!("[controller] device management controller up\n");
            true
        }
        EventKind::Step if ev.name() == Some("device_status") => {
            let status = ev
                .payload_as::<DeviceStatus>()
                .copied()
                .unwrap_or(DeviceStatus::Error);
            println!(
                "[controller] device {} now {}",
                ev.source().unwrap_or_default(),
                status
            );
            true
        }
        EventKind::ResultError => {
            println!(
                "[controller] device {} reported an error",
                ev.source().unwrap_or_default()
            );
            true
        }
        EventKind::Timeout => {
            println!("[controller] periodic check: all quiet");
            true
        }
        _ => false,
    });
}

fn register_scheduler(scheduler: &Machine, controller: Machine, devices: Vec<Machine>, run: Duration) {
    let stagger = Duration::from_millis(500);
    let step = Mutex::new(0usize);
    scheduler.register("running", move |m, _, ev| match ev.kind() {
        EventKind::Entry => {
            *step.lock().expect("scheduler step poisoned") = 0;
            println!("[scheduler] staging connect requests...");
            m.schedule_timer(stagger);
            true
        }
        EventKind::Timeout => {
            let mut step = step.lock().expect("scheduler step poisoned");
            *step += 1;
            let idx = *step;
            drop(step);
            if idx <= devices.len() {
                let device = &devices[idx - 1];
                println!("[scheduler] connect request -> {}", device.name());
                device.post(
                    Event::new(EventKind::Start)
                        .with_name("connect")
                        .with_source("scheduler"),
                );
                let remaining = if idx == devices.len() {
                    run.saturating_sub(stagger * (idx as u32 + 1))
                } else {
                    stagger
                };
                m.schedule_timer(remaining);
            } else {
                println!("[scheduler] demo window over, stopping controller");
                controller.stop();
            }
            true
        }
        _ => false,
    });
}

fn main() -> Result<()> {
    let _log_guard = hsm_demos::init_logging("device-manager.log");
    hsm_demos::install_panic_hook();
    let args = Args::parse();
    let cfg = hsm_demos::load_from(args.config)?;
    info!(target: "demo.device", devices = args.devices, run_secs = cfg.device.run_secs, "starting");

    println!("=== multi-device connection management demo ===\n");

    // Controller and scheduler share the main-thread context.
    let main_ctx = ExecContext::new();
    let controller = Machine::with_context("controller", Arc::clone(&main_ctx));
    register_controller(&controller);
    controller.change_state("monitoring");

    let mut machines = Vec::with_capacity(args.devices);
    for i in 0..args.devices {
        let device = Device::new(
            format!("device-{:03}", i + 1),
            format!("192.168.1.{}:8080", 101 + i),
        );
        let machine = Machine::new(device.id.clone());
        machine.set_parent(&controller);
        register_device_states(&machine, &device, &cfg.device);
        machine.change_state("disconnected");
        machine.start(true)?;
        machines.push(machine);
    }

    let scheduler = Machine::with_context("scheduler", Arc::clone(&main_ctx));
    register_scheduler(
        &scheduler,
        controller.clone(),
        machines.clone(),
        Duration::from_secs(cfg.device.run_secs),
    );
    scheduler.change_state("running");

    println!(
        "running the demo for {} seconds...\n",
        cfg.device.run_secs
    );
    controller.start(false)?;
    controller.run()?;

    for machine in &machines {
        machine.stop();
    }
    println!("\n=== demo over ===");
    info!(target: "demo.device", "finished");
    Ok(())
}
