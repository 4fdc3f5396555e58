//! Demo tunables parsed from `demos.toml`.
//!
//! Discovery prefers a `demos.toml` in the working directory; a missing file
//! or a parse error falls back to defaults so the demos always run. Unknown
//! fields are ignored to allow forward evolution.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct FlowConfig {
    /// Simulated duration of one module step.
    #[serde(default = "FlowConfig::default_step_duration_ms")]
    pub step_duration_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            step_duration_ms: Self::default_step_duration_ms(),
        }
    }
}

impl FlowConfig {
    const fn default_step_duration_ms() -> u64 {
        500
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "DeviceConfig::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "DeviceConfig::default_connect_duration_ms")]
    pub connect_duration_ms: u64,
    #[serde(default = "DeviceConfig::default_max_retries")]
    pub max_retries: u32,
    /// Consecutive missed heartbeats before a reconnect.
    #[serde(default = "DeviceConfig::default_heartbeat_fail_streak")]
    pub heartbeat_fail_streak: u32,
    /// Simulated connect success rate, percent.
    #[serde(default = "DeviceConfig::default_connect_success_pct")]
    pub connect_success_pct: u32,
    /// Simulated heartbeat answer rate, percent.
    #[serde(default = "DeviceConfig::default_heartbeat_success_pct")]
    pub heartbeat_success_pct: u32,
    /// Total demo runtime.
    #[serde(default = "DeviceConfig::default_run_secs")]
    pub run_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            connect_duration_ms: Self::default_connect_duration_ms(),
            max_retries: Self::default_max_retries(),
            heartbeat_fail_streak: Self::default_heartbeat_fail_streak(),
            connect_success_pct: Self::default_connect_success_pct(),
            heartbeat_success_pct: Self::default_heartbeat_success_pct(),
            run_secs: Self::default_run_secs(),
        }
    }
}

impl DeviceConfig {
    const fn default_heartbeat_interval_ms() -> u64 {
        3000
    }
    const fn default_connect_duration_ms() -> u64 {
        2000
    }
    const fn default_max_retries() -> u32 {
        5
    }
    const fn default_heartbeat_fail_streak() -> u32 {
        3
    }
    const fn default_connect_success_pct() -> u32 {
        80
    }
    const fn default_heartbeat_success_pct() -> u32 {
        90
    }
    const fn default_run_secs() -> u64 {
        15
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "WorkflowConfig::default_init_ms")]
    pub init_ms: u64,
    /// Hard deadline for the load step.
    #[serde(default = "WorkflowConfig::default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// Simulated load duration when the load succeeds.
    #[serde(default = "WorkflowConfig::default_load_duration_ms")]
    pub load_duration_ms: u64,
    /// Simulated load success rate, percent.
    #[serde(default = "WorkflowConfig::default_load_success_pct")]
    pub load_success_pct: u32,
    #[serde(default = "WorkflowConfig::default_validate_ms")]
    pub validate_ms: u64,
    /// Interval between processing progress ticks (25% each).
    #[serde(default = "WorkflowConfig::default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    #[serde(default = "WorkflowConfig::default_save_ms")]
    pub save_ms: u64,
    #[serde(default = "WorkflowConfig::default_cleanup_ms")]
    pub cleanup_ms: u64,
    #[serde(default = "WorkflowConfig::default_max_retries")]
    pub max_retries: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            init_ms: Self::default_init_ms(),
            load_timeout_ms: Self::default_load_timeout_ms(),
            load_duration_ms: Self::default_load_duration_ms(),
            load_success_pct: Self::default_load_success_pct(),
            validate_ms: Self::default_validate_ms(),
            progress_tick_ms: Self::default_progress_tick_ms(),
            save_ms: Self::default_save_ms(),
            cleanup_ms: Self::default_cleanup_ms(),
            max_retries: Self::default_max_retries(),
        }
    }
}

impl WorkflowConfig {
    const fn default_init_ms() -> u64 {
        1000
    }
    const fn default_load_timeout_ms() -> u64 {
        3000
    }
    const fn default_load_duration_ms() -> u64 {
        1500
    }
    const fn default_load_success_pct() -> u32 {
        70
    }
    const fn default_validate_ms() -> u64 {
        500
    }
    const fn default_progress_tick_ms() -> u64 {
        500
    }
    const fn default_save_ms() -> u64 {
        1000
    }
    const fn default_cleanup_ms() -> u64 {
        500
    }
    const fn default_max_retries() -> u32 {
        3
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Config path: `demos.toml` next to the binary's working directory.
pub fn discover() -> PathBuf {
    PathBuf::from("demos.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<Config>(&content) {
            Ok(cfg) => Ok(cfg),
            Err(_e) => {
                // On parse error fall back to defaults; the demos should
                // never refuse to run over a typo in a tunables file.
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}
