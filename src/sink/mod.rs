//! Write-only realization targets and the `realize` driver.

pub mod disk;
pub mod memory;

use crate::array::DelayedArray;
use crate::block::{Block, BlockError};
use crate::dtype::DType;
use crate::exec::{par_for_each_indexed_block, BlockIter, ExecError, ExecutionContext};
use crate::grid::Grid;
use crate::labels::Labels;
use crate::seed::{Seed, SeedError};
use crate::viewport::Viewport;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

pub use disk::DiskSink;
pub use memory::MemorySink;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Viewport {viewport} overlaps already written region {existing}")]
    RegionConflict { viewport: Viewport, existing: Viewport },
    #[error("Only {written} of {expected} elements were written")]
    IncompleteCoverage { written: usize, expected: usize },
    #[error("Viewport {viewport} is outside target shape {shape:?}")]
    OutOfRange { viewport: Viewport, shape: Vec<usize> },
    #[error("Block of shape {block:?} does not fit viewport {viewport}")]
    ShapeMismatch { viewport: Viewport, block: Vec<usize> },
    #[error("Block of dtype {found} written to a {expected} target")]
    TypeMismatch { expected: DType, found: DType },
    #[error("Dtype {0} is not supported by backend {1}")]
    UnsupportedDType(DType, &'static str),
    #[error("Unknown realization backend {0:?}")]
    UnknownBackend(String),
    #[error("Backend I/O failed: {0}")]
    BackendIO(#[from] std::io::Error),
    #[error(transparent)]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Seed(#[from] SeedError),
}

/// An exclusive accumulator that finalizes into a new seed.
pub trait RealizationSink: Send {
    fn shape(&self) -> &[usize];

    fn dtype(&self) -> DType;

    /// Store `block` at `viewport`. Each region may be written once.
    ///
    /// # Errors
    /// - `OutOfRange` if `viewport` leaves the target
    /// - `ShapeMismatch`/`TypeMismatch` if `block` does not fit `viewport`
    /// - `RegionConflict` if `viewport` overlaps a region already written
    /// - `BackendIO` if the backend write fails
    fn write_block(&mut self, viewport: &Viewport, block: &Block) -> Result<(), SinkError>;

    /// # Errors
    /// - `IncompleteCoverage` unless every element has been written
    fn finalize(self: Box<Self>) -> Result<Arc<dyn Seed>, SinkError>;
}

/// Opens sinks for a realization target.
pub trait SinkFactory {
    fn open(
        &self,
        shape: &[usize],
        dtype: DType,
        labels: Option<Labels>,
    ) -> Result<Box<dyn RealizationSink>, SinkError>;
}

/// Bookkeeping shared by sinks: which regions have been written.
#[derive(Debug, Clone)]
pub(crate) struct Coverage {
    shape: Vec<usize>,
    dtype: DType,
    written: Vec<Viewport>,
    elements: usize,
}

impl Coverage {
    pub(crate) fn new(shape: &[usize], dtype: DType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            written: vec![],
            elements: 0,
        }
    }

    /// Check that `block` may be written at `viewport`. Nothing is recorded
    /// until [`Coverage::commit`].
    pub(crate) fn check(&self, viewport: &Viewport, block: &Block) -> Result<(), SinkError> {
        if !viewport.is_within(&self.shape) {
            return Err(SinkError::OutOfRange {
                viewport: viewport.clone(),
                shape: self.shape.clone(),
            });
        }
        if block.shape() != viewport.shape() {
            return Err(SinkError::ShapeMismatch {
                viewport: viewport.clone(),
                block: block.shape().to_vec(),
            });
        }
        if block.dtype() != self.dtype {
            return Err(SinkError::TypeMismatch {
                expected: self.dtype,
                found: block.dtype(),
            });
        }
        if let Some(existing) = self.written.iter().find(|w| w.overlaps(viewport)) {
            return Err(SinkError::RegionConflict {
                viewport: viewport.clone(),
                existing: existing.clone(),
            });
        }
        Ok(())
    }

    /// Mark a checked viewport as written, once the backend holds its data.
    pub(crate) fn commit(&mut self, viewport: &Viewport) {
        if !viewport.is_empty() {
            self.written.push(viewport.clone());
            self.elements += viewport.num_elements();
        }
    }

    /// Written regions never overlap, so counting elements decides coverage.
    pub(crate) fn ensure_complete(&self) -> Result<(), SinkError> {
        let expected = self.shape.iter().product();
        if self.elements != expected {
            return Err(SinkError::IncompleteCoverage {
                written: self.elements,
                expected,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSinkConfig {
    pub path: PathBuf,
    /// Chunk shape reported by the finalized seed.
    #[serde(default)]
    pub chunk_shape: Option<Vec<usize>>,
}

impl DiskSinkConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_shape: None,
        }
    }

    pub fn with_chunk_shape(mut self, chunk_shape: Vec<usize>) -> Self {
        self.chunk_shape = Some(chunk_shape);
        self
    }
}

/// Which backend a realization writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealizationBackend {
    InMemory,
    OnDisk(DiskSinkConfig),
}

impl Display for RealizationBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RealizationBackend::InMemory => write!(f, "in-memory"),
            RealizationBackend::OnDisk(config) => write!(f, "on-disk:{}", config.path.display()),
        }
    }
}

impl FromStr for RealizationBackend {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "in-memory" => Ok(RealizationBackend::InMemory),
            Some(("on-disk", path)) if !path.is_empty() => {
                Ok(RealizationBackend::OnDisk(DiskSinkConfig::new(path)))
            }
            _ => Err(SinkError::UnknownBackend(s.to_string())),
        }
    }
}

impl SinkFactory for RealizationBackend {
    fn open(
        &self,
        shape: &[usize],
        dtype: DType,
        labels: Option<Labels>,
    ) -> Result<Box<dyn RealizationSink>, SinkError> {
        let sink: Box<dyn RealizationSink> = match self {
            RealizationBackend::InMemory => Box::new(MemorySink::new(shape, dtype, labels)),
            RealizationBackend::OnDisk(config) => {
                Box::new(DiskSink::create(config.clone(), shape, dtype, labels)?)
            }
        };
        Ok(sink)
    }
}

/// Evaluate `array` block by block on its default grid and write it to a
/// sink from `factory`.
pub fn realize(
    array: &DelayedArray,
    factory: &dyn SinkFactory,
    ctx: &ExecutionContext,
) -> Result<DelayedArray, ExecError> {
    let grid = ctx.default_grid(array)?;
    realize_with_grid(array, &grid, factory, ctx)
}

/// Evaluate `array` on `grid` and write every block to a sink from
/// `factory`. Returns a pristine handle over the new seed.
///
/// # Errors
/// The first resolution or sink error. A sink left behind by a failure is
/// not cleaned up.
pub fn realize_with_grid(
    array: &DelayedArray,
    grid: &Grid,
    factory: &dyn SinkFactory,
    ctx: &ExecutionContext,
) -> Result<DelayedArray, ExecError> {
    let mut sink = factory.open(array.shape(), array.dtype(), array.labels().cloned())?;

    if ctx.config().concurrency_degree > 1 {
        let shared = Mutex::new(sink);
        par_for_each_indexed_block::<_, ExecError, _>(array, grid, ctx, |index, viewport, block| {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_block(viewport, &block)?;
            ctx.observer().on_block_written(index, viewport);
            Ok(ControlFlow::Continue(()))
        })?;
        sink = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
    } else {
        for item in BlockIter::new(array, grid, ctx)? {
            let (index, viewport, block) = item?;
            sink.write_block(&viewport, &block)?;
            ctx.observer().on_block_written(index, &viewport);
        }
    }

    let seed = sink.finalize()?;
    log::info!(
        "realized {:?} {} array into {} backend ({} blocks)",
        array.shape(),
        array.dtype(),
        seed.backend_name(),
        grid.len()
    );
    Ok(DelayedArray::from_seed(seed).with_elision_table(array.elision_table().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!(
            "in-memory".parse::<RealizationBackend>().unwrap(),
            RealizationBackend::InMemory
        );
        let disk: RealizationBackend = "on-disk:/tmp/out.bin".parse().unwrap();
        assert_eq!(disk.to_string(), "on-disk:/tmp/out.bin");
        assert!("on-disk:".parse::<RealizationBackend>().is_err());
        assert!("hdf5".parse::<RealizationBackend>().is_err());
    }

    #[test]
    fn test_coverage() {
        let mut c = Coverage::new(&[2, 2], DType::Integer);
        let row = Block::zeros(DType::Integer, &[1, 2]);
        let top = Viewport::from_ranges(&[0..1, 0..2]);
        c.check(&top, &row).unwrap();
        c.check(&top, &row).unwrap();
        c.commit(&top);
        assert!(matches!(
            c.check(&top, &row),
            Err(SinkError::RegionConflict { .. })
        ));
        assert!(matches!(
            c.ensure_complete(),
            Err(SinkError::IncompleteCoverage {
                written: 2,
                expected: 4
            })
        ));
        let bottom = Viewport::from_ranges(&[1..2, 0..2]);
        assert!(matches!(
            c.check(&bottom, &Block::zeros(DType::Real, &[1, 2])),
            Err(SinkError::TypeMismatch { .. })
        ));
        c.check(&bottom, &row).unwrap();
        c.commit(&bottom);
        c.ensure_complete().unwrap();
    }
}
