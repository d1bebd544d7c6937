//! Direct-I/O file used by the tracer's drain loop.
//!
//! All writes are positioned and must cover a whole number of 4 KiB chunks
//! from page-aligned memory; the only unaligned operation is the final
//! truncate that drops pad bytes. On filesystems that refuse `O_DIRECT`
//! (tmpfs, some network mounts) the open falls back to a buffered
//! descriptor; the alignment discipline is kept either way and the chosen
//! mode is logged.

use crate::runtime::Eventual;
use crate::trace::CHUNK_SIZE;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A write-only file for aligned direct I/O.
#[derive(Debug)]
pub struct DmaFile {
    file: Option<File>,
    direct: bool,
    path: PathBuf,
}

impl DmaFile {
    /// Opens `path` for writing with create + truncate semantics,
    /// preferring `O_DIRECT`.
    pub fn open_dma(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match Self::open_direct(&path) {
            Ok(file) => {
                tracing::debug!(target: "causetrace::io", path = %path.display(), "opened dump file with O_DIRECT");
                Ok(Self {
                    file: Some(file),
                    direct: true,
                    path,
                })
            }
            Err(err) => {
                tracing::debug!(
                    target: "causetrace::io",
                    path = %path.display(),
                    error = %err,
                    "direct I/O unavailable, falling back to buffered writes"
                );
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                Ok(Self {
                    file: Some(file),
                    direct: false,
                    path,
                })
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn open_direct(path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
    }

    #[cfg(not(target_os = "linux"))]
    fn open_direct(_path: &Path) -> io::Result<File> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "O_DIRECT is only available on Linux",
        ))
    }

    /// True when the descriptor was opened with `O_DIRECT`.
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.direct
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `bytes` at `offset`.
    ///
    /// Both the offset and the length must be multiples of [`CHUNK_SIZE`];
    /// the buffer is expected to be page-aligned (the tracer's chunk buffer
    /// guarantees this). Returns the number of bytes the kernel accepted;
    /// the caller decides whether a short write is fatal.
    pub fn write_dma(&self, offset: u64, bytes: &[u8]) -> Eventual<io::Result<usize>> {
        debug_assert_eq!(offset % CHUNK_SIZE as u64, 0, "unaligned write offset");
        debug_assert_eq!(bytes.len() % CHUNK_SIZE, 0, "unaligned write length");
        let result = self.write_at(offset, bytes);
        Eventual::ready(result)
    }

    #[cfg(unix)]
    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.handle()?.write_at(bytes, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.handle()?.seek_write(bytes, offset)
    }

    /// Truncates (or extends) the file to exactly `len` bytes.
    pub fn truncate(&self, len: u64) -> Eventual<io::Result<()>> {
        let result = self.handle().and_then(|f| f.set_len(len));
        Eventual::ready(result)
    }

    /// Flushes file data and metadata to stable storage.
    pub fn flush(&self) -> Eventual<io::Result<()>> {
        let result = self.handle().and_then(File::sync_all);
        Eventual::ready(result)
    }

    /// Closes the file, releasing the descriptor.
    pub fn close(mut self) -> Eventual<io::Result<()>> {
        drop(self.file.take());
        Eventual::ready(Ok(()))
    }

    fn handle(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file already closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, TempDir};
    use crate::Shard;

    #[test]
    fn aligned_write_then_truncate() {
        init_test_logging();
        let dir = TempDir::new("dma_write");
        let path = dir.path().join("out.bin");
        let logical = CHUNK_SIZE + 100;

        Shard::run(|| {
            let file = DmaFile::open_dma(&path).expect("open");
            let buf = {
                let mut b = crate::trace::ChunkBuffer::new();
                b.extend_from_slice(&vec![0x5A; logical]);
                b
            };
            file.write_dma(0, buf.padded_bytes()).then(move |res| {
                let written = res.expect("write");
                assert_eq!(written, 2 * CHUNK_SIZE);
                file.truncate(logical as u64).then(move |res| {
                    res.expect("truncate");
                    file.flush().then(move |res| {
                        res.expect("flush");
                        file.close()
                    })
                })
            })
        })
        .expect("close");

        let meta = std::fs::metadata(&path).expect("stat");
        assert_eq!(meta.len(), logical as u64);
    }

    #[test]
    fn write_after_close_fails() {
        init_test_logging();
        let dir = TempDir::new("dma_closed");
        let path = dir.path().join("out.bin");
        Shard::run(|| {
            let file = DmaFile::open_dma(&path).expect("open");
            let probe = DmaFile {
                file: None,
                direct: false,
                path: path.clone(),
            };
            probe.write_dma(0, &[]).then(move |res| {
                assert!(res.is_err());
                file.close()
            })
        })
        .expect("close");
    }
}
