use crate::block::Block;
use crate::dtype::DType;
use crate::labels::Labels;
use crate::seed::{MemorySeed, Seed};
use crate::sink::{Coverage, RealizationSink, SinkError};
use crate::viewport::Viewport;
use std::sync::Arc;

/// Accumulates blocks into one preallocated buffer.
#[derive(Debug)]
pub struct MemorySink {
    buffer: Block,
    labels: Option<Labels>,
    coverage: Coverage,
}

impl MemorySink {
    pub fn new(shape: &[usize], dtype: DType, labels: Option<Labels>) -> Self {
        Self {
            buffer: Block::zeros(dtype, shape),
            labels,
            coverage: Coverage::new(shape, dtype),
        }
    }
}

impl RealizationSink for MemorySink {
    fn shape(&self) -> &[usize] {
        self.buffer.shape()
    }

    fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    fn write_block(&mut self, viewport: &Viewport, block: &Block) -> Result<(), SinkError> {
        self.coverage.check(viewport, block)?;
        self.buffer.assign(viewport, block)?;
        self.coverage.commit(viewport);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Arc<dyn Seed>, SinkError> {
        self.coverage.ensure_complete()?;
        let mut seed = MemorySeed::new(self.buffer);
        if let Some(labels) = self.labels {
            seed = seed.with_labels(labels)?;
        }
        Ok(Arc::new(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_finalize() {
        let mut sink = Box::new(MemorySink::new(&[2, 2], DType::Real, None));
        sink.write_block(
            &Viewport::from_ranges(&[0..2, 0..1]),
            &Block::from_vec_shape(vec![1.0, 3.0], &[2, 1]).unwrap(),
        )
        .unwrap();
        sink.write_block(
            &Viewport::from_ranges(&[0..2, 1..2]),
            &Block::from_vec_shape(vec![2.0, 4.0], &[2, 1]).unwrap(),
        )
        .unwrap();
        let seed = sink.finalize().unwrap();
        assert_eq!(seed.backend_name(), "in-memory");
        assert_eq!(seed.native_chunk_shape(), None);
        let all = seed.extract(&Viewport::full(&[2, 2])).unwrap();
        assert_eq!(all.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_out_of_range_and_shape() {
        let mut sink = MemorySink::new(&[2, 2], DType::Integer, None);
        assert!(matches!(
            sink.write_block(
                &Viewport::from_ranges(&[1..3, 0..1]),
                &Block::zeros(DType::Integer, &[2, 1])
            ),
            Err(SinkError::OutOfRange { .. })
        ));
        assert!(matches!(
            sink.write_block(
                &Viewport::from_ranges(&[0..1, 0..1]),
                &Block::zeros(DType::Integer, &[2, 1])
            ),
            Err(SinkError::ShapeMismatch { .. })
        ));
    }
}
