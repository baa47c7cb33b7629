//! The capability contract every storage backend implements.

pub mod disk;
pub mod memory;

use crate::block::{Block, BlockError};
use crate::dtype::DType;
use crate::labels::Labels;
use crate::viewport::Viewport;
use std::fmt::Debug;

pub use disk::DiskSeed;
pub use memory::MemorySeed;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Viewport {viewport} is outside shape {shape:?}")]
    OutOfRange { viewport: Viewport, shape: Vec<usize> },
    #[error("Dtype {0} is not supported by backend {1}")]
    UnsupportedDType(DType, &'static str),
    #[error("Backend I/O failed: {0}")]
    BackendIO(#[from] std::io::Error),
    #[error("Invalid backend metadata: {0}")]
    Metadata(String),
    #[error(transparent)]
    MetadataJson(#[from] serde_json::Error),
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// A fixed-shape array held by some backend.
///
/// `extract` may be called concurrently from several threads and must not
/// rely on any shared cursor.
pub trait Seed: Send + Sync + Debug {
    fn shape(&self) -> &[usize];

    fn labels(&self) -> Option<&Labels> {
        None
    }

    fn dtype(&self) -> DType;

    /// Read the region selected by `viewport` into a dense block.
    ///
    /// # Errors
    /// - `OutOfRange` if `viewport` is not contained in `shape()`
    /// - `BackendIO` if the backend could not be read
    fn extract(&self, viewport: &Viewport) -> Result<Block, SeedError>;

    /// The physical chunking of the backend, if it has one.
    fn native_chunk_shape(&self) -> Option<Vec<usize>> {
        None
    }

    /// The pedigree tag of handles rooted at this seed.
    fn backend_name(&self) -> &'static str;
}

/// A chunk shape must match the array's rank and have no zero lengths.
pub(crate) fn check_chunk_shape(shape: &[usize], chunk_shape: &[usize]) -> Result<(), SeedError> {
    if chunk_shape.len() != shape.len() || chunk_shape.contains(&0) {
        return Err(SeedError::Metadata(format!(
            "chunk shape {chunk_shape:?} does not fit shape {shape:?}"
        )));
    }
    Ok(())
}

pub(crate) fn check_in_range(seed: &dyn Seed, viewport: &Viewport) -> Result<(), SeedError> {
    if viewport.is_within(seed.shape()) {
        Ok(())
    } else {
        Err(SeedError::OutOfRange {
            viewport: viewport.clone(),
            shape: seed.shape().to_vec(),
        })
    }
}
