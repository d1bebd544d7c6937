//! Shared helpers for unit and integration tests.
//!
//! - Consistent tracing-based logging initialization
//! - A self-cleaning temporary directory fixture
//! - A global lock serializing tests that arm the process-wide trace flags

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, Once};
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();
static TRACE_LOCK: Mutex<()> = Mutex::new(());
static NEXT_DIR: AtomicU64 = AtomicU64::new(0);

/// Initialize test logging with debug-level output.
///
/// Safe to call multiple times; only initializes once. `RUST_LOG`
/// overrides the default filter.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("causetrace=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Serializes tests that toggle the process-wide tracing flags.
///
/// Tests that call `init_tracing`/`delete_tracing` run concurrently inside
/// one test binary; holding this guard keeps their sessions from
/// interleaving. Poisoning is ignored; a failed sibling must not cascade.
pub fn trace_test_lock() -> MutexGuard<'static, ()> {
    match TRACE_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A process-unique temporary directory, removed on drop.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    /// Creates `"<tmp>/causetrace_<prefix>_<pid>_<seq>"`.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let seq = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "causetrace_{prefix}_{}_{seq}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("failed to create temp dir");
        Self { path }
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
