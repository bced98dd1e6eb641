// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Jonas Keller

//! YAML configuration parser with strict schema validation.
//!
//! Channel endpoints on both sides of the boundary need to agree on the
//! region name and size; loading both from one file is the usual way to keep
//! them agreeing. Any invalid field is rejected at load time.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, PipeError, PipeResult};
use crate::types::{ChannelName, RegionSize};

/// Raw channel section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawChannelConfig {
    name: String,
    #[serde(default = "default_region_size")]
    region_size: usize,
}

fn default_region_size() -> usize {
    64 * 1024 // 64 KiB
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    channel: RawChannelConfig,
}

/// Validated channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: ChannelName,
    pub region_size: RegionSize,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> PipeResult<ChannelConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| PipeError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> PipeResult<ChannelConfig> {
        let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            message: format!("YAML parse error: {e}"),
        })?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> PipeResult<ChannelConfig> {
        let name = ChannelName::new(raw.channel.name)?;
        let region_size = RegionSize::new(raw.channel.region_size)?;

        tracing::debug!(name = %name, region_size = %region_size, "loaded channel configuration");

        Ok(ChannelConfig { name, region_size })
    }
}
