//! Tracing configuration with environment overrides.
//!
//! Settings resolve programmatic values first, then `CAUSETRACE_*`
//! environment variables, then built-in defaults.

use std::path::{Path, PathBuf};

/// Environment variable naming the dump output directory.
pub const ENV_TRACE_DIR: &str = "CAUSETRACE_DIR";
/// Environment variable overriding the drain threshold, in chunks.
pub const ENV_MIN_CHUNKS: &str = "CAUSETRACE_MIN_CHUNKS";

/// Default drain threshold: 64 chunks of 4 KiB, i.e. 256 KiB.
pub const DEFAULT_MIN_CHUNK_COUNT: usize = 64;

/// Configuration for the per-thread tracers.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Directory dump files are created in.
    pub dir: PathBuf,
    /// Buffered chunks required before the drain task is woken.
    pub min_chunk_count: usize,
}

impl TraceConfig {
    /// Creates a configuration with built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: PathBuf::from("."),
            min_chunk_count: DEFAULT_MIN_CHUNK_COUNT,
        }
    }

    /// Creates a configuration from defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(dir) = std::env::var(ENV_TRACE_DIR) {
            if !dir.is_empty() {
                config.dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var(ENV_MIN_CHUNKS) {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.min_chunk_count = n,
                _ => {
                    tracing::warn!(
                        target: "causetrace::config",
                        value = %raw,
                        "ignoring unparseable {ENV_MIN_CHUNKS}"
                    );
                }
            }
        }
        config
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets the drain threshold in chunks.
    #[must_use]
    pub fn with_min_chunk_count(mut self, chunks: usize) -> Self {
        assert!(chunks > 0, "drain threshold must be at least one chunk");
        self.min_chunk_count = chunks;
        self
    }

    /// The dump file path for a thread named by `tid`.
    #[must_use]
    pub fn dump_path(&self, tid: u64) -> PathBuf {
        self.dir
            .join(format!("deadlock_detection_graphdump.{tid}.json"))
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TraceConfig::new();
        assert_eq!(config.min_chunk_count, DEFAULT_MIN_CHUNK_COUNT);
        assert_eq!(
            config.dump_path(42),
            PathBuf::from("./deadlock_detection_graphdump.42.json")
        );
    }

    #[test]
    fn builder_overrides_apply() {
        let config = TraceConfig::new().with_dir("/tmp/traces").with_min_chunk_count(8);
        assert_eq!(config.min_chunk_count, 8);
        assert_eq!(
            config.dump_path(7),
            PathBuf::from("/tmp/traces/deadlock_detection_graphdump.7.json")
        );
    }
}
