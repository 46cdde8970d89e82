// src/config/mod.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::channels::stim::StimParams;
use crate::clock::WaitStrategy;
use crate::error::Error;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub marker_stream: MarkerStreamConfig,
    pub stimulator: StimulatorConfig,
    pub trigger_box: TriggerBoxConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MarkerStreamConfig {
    /// Address of the marker stream endpoint, e.g. "127.0.0.1:8080".
    pub addr: String,
    /// How many recent samples the ingest adapter keeps buffered.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StimulatorConfig {
    /// Address of the stimulator command API, e.g. "192.168.100.10:10000".
    pub addr: String,
    /// Pulse parameters rendered into the STARTSTIM payload.
    #[serde(default)]
    pub params: StimParams,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TriggerBoxConfig {
    /// Serial port of the hardware trigger box, e.g. "COM4" or "/dev/ttyACM0".
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuditConfig {
    /// Optional TCP outlet the audit publisher connects to.
    pub outlet_addr: Option<String>,
    /// Optional CSV file recording every accepted event.
    pub csv_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: f64,
    #[serde(default)]
    pub wait_strategy: WaitStrategy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: default_poll_interval_us(),
            grace_period_ms: default_grace_period_ms(),
            wait_strategy: WaitStrategy::default(),
        }
    }
}

fn default_buffer_size() -> usize {
    1024
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_poll_interval_us() -> u64 {
    100
}

fn default_grace_period_ms() -> f64 {
    200.0
}

impl DispatchConfig {
    pub fn grace_period_us(&self) -> u64 {
        (self.grace_period_ms * 1e3) as u64
    }
}

impl Config {
    /// Reject values that would silently misbehave downstream (a negative
    /// grace period casts to 0 in `grace_period_us`).
    pub fn validate(&self, path: &str) -> Result<(), Error> {
        if self.dispatch.grace_period_ms < 0.0 {
            return Err(Error::Config {
                path: path.to_string(),
                reason: format!(
                    "grace_period_ms must be non-negative, got {}",
                    self.dispatch.grace_period_ms
                ),
            });
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
    let path_str = path.as_ref().display().to_string();
    let config_str = fs::read_to_string(&path).map_err(|e| Error::Config {
        path: path_str.clone(),
        reason: format!("failed to read config file: {}", e),
    })?;

    let config: Config = serde_yaml::from_str(&config_str).map_err(|e| Error::Config {
        path: path_str.clone(),
        reason: format!("failed to parse config file: {}", e),
    })?;
    config.validate(&path_str)?;
    Ok(config)
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<(), Error> {
    let path_str = path.as_ref().display().to_string();
    let yaml = serde_yaml::to_string(config).map_err(|e| Error::Config {
        path: path_str.clone(),
        reason: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&path, yaml).map_err(|e| Error::Config {
        path: path_str,
        reason: format!("failed to write config file: {}", e),
    })
}
