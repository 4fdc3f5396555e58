//! Shared bootstrap for the demo binaries: file logging and TOML config.
//!
//! Demo output goes to stdout with `println!`; diagnostics go through
//! `tracing` into a per-demo log file so the console trace stays readable.

use std::path::Path;
use std::sync::Once;

use tracing_appender::non_blocking::WorkerGuard;

pub mod config;

pub use config::{load_from, Config};

/// Install a non-blocking file subscriber filtered by `RUST_LOG`. The
/// returned guard must stay alive for the duration of the process so buffered
/// log lines are flushed on exit.
pub fn init_logging(log_name: &str) -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join(log_name);
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(log_dir, log_name.to_string());
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(_) => Some(guard),
        Err(_err) => {
            // Global subscriber already installed; drop the guard so the
            // writer shuts down.
            None
        }
    }
}

/// Route panics through tracing before the default hook aborts the demo.
pub fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "demo.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}
