use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use srq::DeviceConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SrqSpec {
    pub max_wr: u32,
    pub max_sge: u32,
    /// Low watermark armed after creation. 0 disables the limit event.
    #[serde(default)]
    pub srq_limit: u32,
}

const fn default_batch() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    pub posters: usize,
    pub poppers: usize,
    pub wrs_per_poster: u64,
    #[serde(default = "default_batch")]
    pub batch: usize,
    /// Refill the SRQ and rearm the limit whenever the limit event fires.
    #[serde(default)]
    pub refill_on_limit: bool,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub log_level: String,
    #[serde(default)]
    pub device: DeviceConfig,
    pub srq: SrqSpec,
    pub workload: WorkloadConfig,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sample_config() {
        let config: Config = toml::from_str(include_str!("../srqctl.toml")).unwrap();
        assert_eq!(config.srq.max_wr, 256);
        assert!(config.srq.srq_limit <= config.srq.max_wr);
        assert!(config.workload.refill_on_limit);
        assert!(!config.device.srq_shuffle);
    }
}
