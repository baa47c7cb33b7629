use crate::block::{Block, BlockElement};
use crate::dtype::DType;
use crate::labels::Labels;
use crate::seed::{check_chunk_shape, check_in_range, Seed, SeedError};
use crate::viewport::Viewport;

pub const IN_MEMORY_BACKEND: &str = "in-memory";

/// A seed over a block that is already resident.
#[derive(Debug, Clone)]
pub struct MemorySeed {
    block: Block,
    labels: Option<Labels>,
    chunk_shape: Option<Vec<usize>>,
}

impl MemorySeed {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            labels: None,
            chunk_shape: None,
        }
    }

    pub fn from_vec_shape<T: BlockElement>(v: Vec<T>, shape: &[usize]) -> Result<Self, SeedError> {
        Ok(Self::new(Block::from_vec_shape(v, shape)?))
    }

    pub fn with_labels(mut self, labels: Labels) -> Result<Self, SeedError> {
        labels
            .validate(self.block.shape())
            .map_err(|e| SeedError::Metadata(e.to_string()))?;
        self.labels = Some(labels);
        Ok(self)
    }

    /// Declare a chunking so grids built over this seed align with it.
    pub fn with_chunk_shape(mut self, chunk_shape: Vec<usize>) -> Result<Self, SeedError> {
        check_chunk_shape(self.block.shape(), &chunk_shape)?;
        self.chunk_shape = Some(chunk_shape);
        Ok(self)
    }

    pub fn block(&self) -> &Block {
        &self.block
    }
}

impl Seed for MemorySeed {
    fn shape(&self) -> &[usize] {
        self.block.shape()
    }

    fn labels(&self) -> Option<&Labels> {
        self.labels.as_ref()
    }

    fn dtype(&self) -> DType {
        self.block.dtype()
    }

    fn extract(&self, viewport: &Viewport) -> Result<Block, SeedError> {
        check_in_range(self, viewport)?;
        Ok(self.block.slice(viewport)?)
    }

    fn native_chunk_shape(&self) -> Option<Vec<usize>> {
        self.chunk_shape.clone()
    }

    fn backend_name(&self) -> &'static str {
        IN_MEMORY_BACKEND
    }
}
