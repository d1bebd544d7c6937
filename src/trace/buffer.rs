//! Page-aligned chunked byte accumulator for the tracer.
//!
//! The buffer is a single contiguous allocation of 4 KiB chunks, grown
//! geometrically. Alignment comes from the chunk type itself, so the backing
//! store always satisfies direct-I/O alignment requirements; the unit of
//! drain writes is a whole number of chunks.

#![allow(unsafe_code)]

/// The direct-I/O chunk size in bytes (one page).
pub const CHUNK_SIZE: usize = 4096;

#[derive(Clone)]
#[repr(C, align(4096))]
struct Chunk([u8; CHUNK_SIZE]);

impl Chunk {
    const ZERO: Self = Self([0; CHUNK_SIZE]);
}

/// A growable byte accumulator backed by page-aligned chunks.
///
/// `reset` drops the logical length but keeps the capacity, so a tracer
/// reaches steady state with no further allocation.
pub struct ChunkBuffer {
    chunks: Vec<Chunk>,
    len: usize,
}

impl std::fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl ChunkBuffer {
    /// Creates an empty buffer with no allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
        }
    }

    /// Logical length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when no bytes have been written since the last reset.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    /// Number of complete chunks currently filled.
    #[must_use]
    pub const fn full_chunks(&self) -> usize {
        self.len / CHUNK_SIZE
    }

    /// Logical length rounded up to the next chunk boundary.
    #[must_use]
    pub const fn padded_len(&self) -> usize {
        self.len.div_ceil(CHUNK_SIZE) * CHUNK_SIZE
    }

    /// Ensures room for `additional` more bytes, growing geometrically.
    pub fn reserve(&mut self, additional: usize) {
        let needed = (self.len + additional).div_ceil(CHUNK_SIZE);
        if needed > self.chunks.len() {
            let target = needed.max(self.chunks.len() * 2).max(1);
            self.chunks.resize(target, Chunk::ZERO);
        }
    }

    /// Appends raw bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        let len = self.len;
        self.as_mut_bytes_full()[len..len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// The written bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.as_bytes_full()[..self.len]
    }

    /// The written bytes padded out to a whole number of chunks.
    ///
    /// Pad bytes carry whatever the backing store holds; callers that write
    /// them must truncate the destination back to the logical length.
    #[must_use]
    pub fn padded_bytes(&self) -> &[u8] {
        &self.as_bytes_full()[..self.padded_len()]
    }

    /// Drops the contents but keeps the capacity.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    fn as_bytes_full(&self) -> &[u8] {
        // SAFETY: `Chunk` is a repr(C) wrapper around `[u8; CHUNK_SIZE]`, so
        // the chunk vector is one contiguous run of initialized bytes.
        unsafe {
            std::slice::from_raw_parts(
                self.chunks.as_ptr().cast::<u8>(),
                self.chunks.len() * CHUNK_SIZE,
            )
        }
    }

    fn as_mut_bytes_full(&mut self) -> &mut [u8] {
        // SAFETY: as above, plus exclusive access through `&mut self`.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.chunks.as_mut_ptr().cast::<u8>(),
                self.chunks.len() * CHUNK_SIZE,
            )
        }
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_with_no_allocation() {
        let buf = ChunkBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.padded_len(), 0);
    }

    #[test]
    fn append_and_read_back() {
        let mut buf = ChunkBuffer::new();
        buf.extend_from_slice(b"hello ");
        buf.extend_from_slice(b"world");
        assert_eq!(buf.as_bytes(), b"hello world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.full_chunks(), 0);
        assert_eq!(buf.padded_len(), CHUNK_SIZE);
    }

    #[test]
    fn growth_is_geometric_and_preserves_contents() {
        let mut buf = ChunkBuffer::new();
        let payload = vec![0xAB_u8; CHUNK_SIZE + 17];
        buf.extend_from_slice(&payload);
        let cap_after_first = buf.capacity();
        buf.extend_from_slice(&payload);
        assert!(buf.capacity() >= cap_after_first);
        assert_eq!(buf.len(), payload.len() * 2);
        assert!(buf.as_bytes().iter().all(|&b| b == 0xAB));
        assert_eq!(buf.full_chunks(), (payload.len() * 2) / CHUNK_SIZE);
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut buf = ChunkBuffer::new();
        buf.extend_from_slice(&[1; 3 * CHUNK_SIZE]);
        let cap = buf.capacity();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn backing_store_is_page_aligned() {
        let mut buf = ChunkBuffer::new();
        buf.extend_from_slice(&[0; 1]);
        let addr = buf.as_bytes().as_ptr() as usize;
        assert_eq!(addr % CHUNK_SIZE, 0);
    }

    #[test]
    fn padded_bytes_cover_whole_chunks() {
        let mut buf = ChunkBuffer::new();
        buf.extend_from_slice(&[7; CHUNK_SIZE + 100]);
        assert_eq!(buf.padded_bytes().len(), 2 * CHUNK_SIZE);
    }
}
