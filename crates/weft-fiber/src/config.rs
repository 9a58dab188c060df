// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fiber runtime configuration from environment variables.

/// The minimum allowable fiber stack reservation in bytes.
pub const STACK_SIZE_MIN: usize = 16 * 1024;

/// Default fiber stack reservation in bytes.
pub const STACK_SIZE_DEFAULT: usize = 512 * 1024;

/// Stack watermark in bytes. A recycled fiber that stayed at or below
/// the watermark keeps its region chunks for the next owner.
pub const STACK_WATERMARK_DEFAULT: usize = 64 * 1024;

/// Per-cord fiber runtime configuration.
#[derive(Debug, Clone)]
pub struct FiberConfig {
    /// Region reservation for fibers created without an explicit
    /// stack size. Fibers created with this size are pooled on death.
    pub stack_size: usize,
    /// Lower bound accepted for custom stack sizes.
    pub stack_size_min: usize,
    /// High-water threshold above which a recycled fiber's region
    /// chunks are released instead of kept for reuse.
    pub stack_watermark: usize,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            stack_size: STACK_SIZE_DEFAULT,
            stack_size_min: STACK_SIZE_MIN,
            stack_watermark: STACK_WATERMARK_DEFAULT,
        }
    }
}

impl FiberConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `WEFT_FIBER_STACK_SIZE`: default region reservation (524288)
    /// - `WEFT_FIBER_STACK_SIZE_MIN`: custom-size lower bound (16384)
    /// - `WEFT_FIBER_STACK_WATERMARK`: recycle release threshold (65536)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.stack_size = read_env("WEFT_FIBER_STACK_SIZE", config.stack_size)?;
        config.stack_size_min = read_env("WEFT_FIBER_STACK_SIZE_MIN", config.stack_size_min)?;
        config.stack_watermark = read_env("WEFT_FIBER_STACK_WATERMARK", config.stack_watermark)?;
        if config.stack_size < config.stack_size_min {
            return Err(ConfigError::Invalid(
                "WEFT_FIBER_STACK_SIZE",
                "must not be below WEFT_FIBER_STACK_SIZE_MIN",
            ));
        }
        Ok(config)
    }
}

fn read_env(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a positive byte count")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
