//! Allocator configuration.
//!
//! Every tunable has a compiled-in default and can be overridden through the
//! environment when the configuration is built with [`AllocatorConfig::from_env`]:
//! - `SEGALLOC_CHUNK_SIZE`: minimum heap-growth request in bytes (default 256).
//! - `SEGALLOC_MAX_HEAP`: capacity of the reserved region in bytes (default 20 MiB).
//! - `SEGALLOC_CHECK`: `off` (default), `verify`, or `abort`.
//! - `SEGALLOC_LOG`: minimum lifecycle log level (`trace` .. `error`) or `off`
//!   (default `warn`).
//!
//! Sizes accept a decimal or `0x` prefixed number with an optional `k`/`m`/`g`
//! suffix.

use crate::malloc::block::{ALIGNMENT, MIN_BLOCK_SIZE};
use crate::malloc::lifecycle::AllocatorLogLevel;

/// Default heap-growth chunk in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 8;

/// Default reserved region capacity in bytes.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Largest region an arena can address with 32-bit offsets.
pub const MAX_REGION_BYTES: usize = u32::MAX as usize;

pub const ENV_CHUNK_SIZE: &str = "SEGALLOC_CHUNK_SIZE";
pub const ENV_MAX_HEAP: &str = "SEGALLOC_MAX_HEAP";
pub const ENV_CHECK: &str = "SEGALLOC_CHECK";
pub const ENV_LOG: &str = "SEGALLOC_LOG";

/// How eagerly the validator runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckMode {
    /// Never run the validator implicitly.
    #[default]
    Off,
    /// Validate after every public operation; violations become `Error`
    /// lifecycle records.
    Verify,
    /// As `Verify`, and panic on the first failed check in debug builds.
    /// Release builds behave exactly like `Verify`.
    Abort,
}

impl CheckMode {
    /// Parse from string (case-insensitive). Unknown values select `Off`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "verify" | "check" | "on" | "1" => Self::Verify,
            "abort" | "strict" | "debug" | "2" => Self::Abort,
            _ => Self::Off,
        }
    }

    /// Returns true if the validator runs after each public operation.
    #[must_use]
    pub const fn checks_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns true if a failed check terminates the process in this build.
    #[must_use]
    pub const fn aborts(self) -> bool {
        matches!(self, Self::Abort) && cfg!(debug_assertions)
    }
}

/// Tunables for one allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Minimum number of bytes requested from the region on a miss.
    pub chunk_size: usize,
    /// Capacity reserved for the region.
    pub max_heap: usize,
    pub check_mode: CheckMode,
    /// Minimum level of lifecycle records kept; `None` disables recording.
    pub log_level: Option<AllocatorLogLevel>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_heap: DEFAULT_MAX_HEAP,
            check_mode: CheckMode::Off,
            log_level: Some(AllocatorLogLevel::Warn),
        }
    }
}

impl AllocatorConfig {
    /// Defaults overridden by the `SEGALLOC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unparseable
    /// values fall back to the default for that key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let chunk_size = lookup(ENV_CHUNK_SIZE)
            .and_then(|raw| parse_size(&raw))
            .unwrap_or(defaults.chunk_size);
        let max_heap = lookup(ENV_MAX_HEAP)
            .and_then(|raw| parse_size(&raw))
            .unwrap_or(defaults.max_heap);
        let check_mode = lookup(ENV_CHECK)
            .map(|raw| CheckMode::from_str_loose(&raw))
            .unwrap_or(defaults.check_mode);
        let log_level = match lookup(ENV_LOG) {
            Some(raw) => AllocatorLogLevel::parse_threshold(&raw),
            None => defaults.log_level,
        };
        Self {
            chunk_size,
            max_heap,
            check_mode,
            log_level,
        }
        .normalized()
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    #[must_use]
    pub fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self.normalized()
    }

    #[must_use]
    pub fn with_check_mode(mut self, check_mode: CheckMode) -> Self {
        self.check_mode = check_mode;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, log_level: Option<AllocatorLogLevel>) -> Self {
        self.log_level = log_level;
        self
    }

    /// Round the chunk up to the block alignment (at least one minimum block)
    /// and cap the region at what 32-bit offsets can address.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let chunk = self.chunk_size.max(MIN_BLOCK_SIZE as usize);
        self.chunk_size = chunk
            .checked_next_multiple_of(ALIGNMENT)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        self.max_heap = self.max_heap.min(MAX_REGION_BYTES);
        self
    }
}

/// Parse `256`, `0x100`, `4k`, `20m`, `1g`.
pub fn parse_size(raw: &str) -> Option<usize> {
    let s = raw.trim().to_ascii_lowercase();
    let (digits, shift) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 10),
        'm' => (&s[..s.len() - 1], 20),
        'g' => (&s[..s.len() - 1], 30),
        _ => (s.as_str(), 0),
    };
    let digits = digits.replace('_', "");
    let value = match digits.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<usize>().ok()?,
    };
    value.checked_mul(1usize << shift)
}
