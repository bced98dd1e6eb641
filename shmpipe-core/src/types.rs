// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Jonas Keller

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by
//! construction: a `ChannelName` is always a usable shm object name, a
//! `RegionSize` always leaves room for the control block and a usable data
//! area.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::index::MIN_REGION_SIZE;
use crate::region::SharedMemoryRegion;

/// Validated shared memory object name.
/// Non-empty, alphanumeric with hyphens/underscores/dots, max 64 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Create a new ChannelName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "name",
                value: name,
                reason: "channel name cannot be empty".to_string(),
            });
        }

        if name.len() > 64 {
            return Err(ConfigError::InvalidField {
                field: "name",
                value: name.clone(),
                reason: format!("channel name too long: {} chars (max 64)", name.len()),
            });
        }

        // The name becomes a POSIX shm object name; keep it to characters
        // every libc accepts there.
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ConfigError::InvalidField {
                field: "name",
                value: name,
                reason:
                    "channel name must contain only ASCII alphanumerics, hyphens, underscores, and dots"
                        .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

/// Validated region size in bytes.
/// Must fit the two-word control block plus the minimum data area, and stay
/// within what the mapping collaborator will map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct RegionSize(usize);

impl RegionSize {
    /// Create a new RegionSize with validation.
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size < MIN_REGION_SIZE {
            return Err(ConfigError::InvalidField {
                field: "region_size",
                value: size.to_string(),
                reason: format!("below the ring minimum of {MIN_REGION_SIZE} bytes"),
            });
        }
        if size > SharedMemoryRegion::MAX_SIZE {
            return Err(ConfigError::InvalidField {
                field: "region_size",
                value: size.to_string(),
                reason: format!(
                    "exceeds the region maximum of {} bytes",
                    SharedMemoryRegion::MAX_SIZE
                ),
            });
        }
        Ok(Self(size))
    }

    /// Get the inner byte count.
    pub fn value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RegionSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for RegionSize {
    type Error = ConfigError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RegionSize> for usize {
    fn from(size: RegionSize) -> Self {
        size.0
    }
}
