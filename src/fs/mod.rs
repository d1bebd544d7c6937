//! File-system support for the tracer.
//!
//! One type lives here: the [`DmaFile`] the per-thread drain loop writes
//! page-aligned chunks into.

pub mod dma;

pub use dma::DmaFile;
