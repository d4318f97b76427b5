//! Controller configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::tickable::Ticks;

/// Board-level settings of the I/O processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// SCSI id of the initiator, reported through SCID when the guest
    /// has not programmed one
    pub host_id: u8,

    /// Ticks between reselection attempts while an interrupt is pending
    pub reselect_retry_delay: Ticks,

    /// Run of zero instruction words after which the processor gives up
    /// with an illegal instruction
    pub max_nop_words: usize,

    /// Instructions executed per service call before yielding to the
    /// next tick
    pub max_insns_per_run: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host_id: 7,
            reselect_retry_delay: 1000,
            max_nop_words: 4096,
            max_insns_per_run: 10000,
        }
    }
}

impl ControllerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Failed to parse controller configuration")?;
        if config.host_id > 7 {
            anyhow::bail!("Invalid host id {}", config.host_id);
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
