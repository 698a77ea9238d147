use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::{Behavior, DeviceAttr};

/// Capabilities and behaviour switches of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub max_srq_wr: u32,
    pub max_srq_sge: u32,
    /// Count a zero-length SGE as a `MAX_PAYLOAD_LEN` buffer.
    pub zero_len_sge_as_max_len: bool,
    /// Perturb the order of posted receive WQEs. For protocol testing only.
    pub srq_shuffle: bool,
    /// Reject receive requests whose total length exceeds `MAX_PAYLOAD_LEN`.
    pub enforce_max_payload: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            max_srq_wr: 16384,
            max_srq_sge: 32,
            zero_len_sge_as_max_len: false,
            srq_shuffle: false,
            enforce_max_payload: false,
        }
    }
}

impl DeviceConfig {
    pub fn new(config: Option<&str>) -> anyhow::Result<Self> {
        let config = toml::from_str(config.unwrap_or(""))?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::new(Some(&content))
    }

    pub fn attr(&self) -> DeviceAttr {
        DeviceAttr {
            max_srq_wr: self.max_srq_wr,
            max_srq_sge: self.max_srq_sge,
        }
    }

    pub fn behavior(&self) -> Behavior {
        let mut behavior = Behavior::empty();
        behavior.set(Behavior::ZERO_LEN_SGE_AS_MAX_LEN, self.zero_len_sge_as_max_len);
        behavior.set(Behavior::SRQ_SHUFFLE, self.srq_shuffle);
        behavior.set(Behavior::ENFORCE_MAX_PAYLOAD, self.enforce_max_payload);
        behavior
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = DeviceConfig::new(None).unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.behavior(), Behavior::empty());
    }

    #[test]
    fn parse_partial_config() {
        let config = DeviceConfig::new(Some(
            r#"
            max_srq_wr = 8
            srq_shuffle = true
            "#,
        ))
        .unwrap();
        assert_eq!(config.max_srq_wr, 8);
        assert_eq!(config.max_srq_sge, DeviceConfig::default().max_srq_sge);
        assert_eq!(config.behavior(), Behavior::SRQ_SHUFFLE);
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(DeviceConfig::new(Some("max_qp = 4")).is_err());
    }
}
