//! Configuration management for the MCU link
//!
//! Handles loading, parsing, and validating the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi: Option<MidiOutConfig>,
}

/// How the board is attached
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Fifo,
    Serial,
}

/// Controller link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default = "default_device")]
    pub device: PathBuf,
    /// Separate node for LED frames. Needed when `device` is a plain named
    /// pipe rather than a bidirectional character device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<PathBuf>,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Turn playable keys into MIDI notes instead of internal key events.
    /// Fixed for the lifetime of the controller.
    #[serde(default = "default_true")]
    pub send_midi: bool,
    /// MIDI channel for generated notes (1-16)
    #[serde(default = "default_midi_channel")]
    pub midi_channel: u8,

    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_error_backoff_step_ms")]
    pub error_backoff_step_ms: u64,
    #[serde(default = "default_error_backoff_max_ms")]
    pub error_backoff_max_ms: u64,

    #[serde(default = "default_led_flush_interval_ms")]
    pub led_flush_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            output_device: None,
            transport: default_transport(),
            baud_rate: default_baud_rate(),
            send_midi: default_true(),
            midi_channel: default_midi_channel(),
            idle_poll_ms: default_idle_poll_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            error_backoff_step_ms: default_error_backoff_step_ms(),
            error_backoff_max_ms: default_error_backoff_max_ms(),
            led_flush_interval_ms: default_led_flush_interval_ms(),
        }
    }
}

impl ControllerConfig {
    /// Zero-based MIDI channel for the wire
    pub fn midi_channel_index(&self) -> u8 {
        self.midi_channel.saturating_sub(1) & 0x0F
    }
}

/// MIDI output for notes generated in MIDI mode
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiOutConfig {
    /// Output port name pattern (case-insensitive substring)
    pub output_port: String,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;

        if c.device.as_os_str().is_empty() {
            anyhow::bail!("controller.device cannot be empty");
        }
        if c.midi_channel == 0 || c.midi_channel > 16 {
            anyhow::bail!(
                "controller.midi_channel {} is invalid (must be 1-16)",
                c.midi_channel
            );
        }
        if c.transport == Transport::Serial && c.output_device.is_some() {
            anyhow::bail!("controller.output_device is only supported for fifo transport");
        }
        if c.transport == Transport::Serial && c.baud_rate == 0 {
            anyhow::bail!("controller.baud_rate must be positive for serial transport");
        }
        if c.error_backoff_step_ms > c.error_backoff_max_ms {
            anyhow::bail!(
                "controller.error_backoff_step_ms ({}) exceeds error_backoff_max_ms ({})",
                c.error_backoff_step_ms,
                c.error_backoff_max_ms
            );
        }
        if c.led_flush_interval_ms == 0 {
            anyhow::bail!("controller.led_flush_interval_ms must be positive");
        }

        if let Some(midi) = &self.midi {
            if midi.output_port.trim().is_empty() {
                anyhow::bail!("midi.output_port cannot be empty");
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_device() -> PathBuf { PathBuf::from("/dev/mcu_fifo") }
fn default_transport() -> Transport { Transport::Fifo }
fn default_baud_rate() -> u32 { 115_200 }
fn default_true() -> bool { true }
fn default_midi_channel() -> u8 { 1 }
fn default_idle_poll_ms() -> u64 { 1 }
fn default_read_timeout_ms() -> u64 { 50 }
fn default_error_backoff_step_ms() -> u64 { 50 }
fn default_error_backoff_max_ms() -> u64 { 1000 }
fn default_led_flush_interval_ms() -> u64 { 16 }
