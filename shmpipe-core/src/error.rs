//! Custom error types for shmpipe.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.
//!
//! Note that a full or empty ring is NOT an error: `write` and `read` report
//! those steady-state conditions by returning `Ok(0)`, and retry/backoff
//! policy belongs entirely to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the shmpipe channel.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("ring buffer error: {0}")]
    Ring(#[from] RingError),

    #[error("shared memory region error: {0}")]
    Region(#[from] RegionError),

    #[error("wake signal error: {0}")]
    Notify(#[from] NotifyError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Ring buffer errors.
///
/// Construction failures (`RegionTooSmall`, `IncompatibleControlBlock`) mean
/// no descriptor is handed out at all. Corruption failures poison the handle
/// they occur on: the first operation that decodes an out-of-range index
/// reports `IndexCorrupted`, every operation after that reports `Poisoned`.
#[derive(Debug, Error)]
pub enum RingError {
    #[error("region too small for a ring: {size} bytes (minimum {min})")]
    RegionTooSmall { size: usize, min: usize },

    /// The existing control block does not decode with the local word width.
    /// The on-region layout carries no width field, so a peer that
    /// initialized the block with a different word width is detected by its
    /// index words decoding to offsets outside the data area.
    #[error(
        "control block does not decode as {word_bits}-bit index words: \
         write={write_word:#x}, read={read_word:#x}, capacity={capacity}"
    )]
    IncompatibleControlBlock {
        word_bits: u32,
        write_word: usize,
        read_word: usize,
        capacity: usize,
    },

    #[error("corrupted {which} index: decoded offset {offset} not below capacity {capacity}")]
    IndexCorrupted {
        which: &'static str,
        offset: usize,
        capacity: usize,
    },

    #[error("handle poisoned by earlier index corruption; refusing further operations")]
    Poisoned,
}

/// Shared memory region errors - critical failures with no fallback.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("failed to create shared memory region '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("failed to open shared memory region '{name}': {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("invalid region size {size}: {reason}")]
    InvalidSize { size: usize, reason: String },
}

/// Wake signal errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to create eventfd: {reason}")]
    CreateFailed { reason: String },

    #[error("failed to signal peer: {reason}")]
    SignalFailed { reason: String },

    #[error("failed to wait for signal: {reason}")]
    WaitFailed { reason: String },
}

/// Configuration errors - fail-fast on invalid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("configuration parse error: {message}")]
    Parse { message: String },

    #[error("invalid field value: {field} = {value} - {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Result type alias using PipeError.
pub type PipeResult<T> = Result<T, PipeError>;
