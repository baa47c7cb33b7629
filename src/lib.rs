pub mod array;
pub mod block;
pub mod config;
pub mod dtype;
pub mod exec;
pub mod graph;
pub mod grid;
pub mod labels;
pub mod observer;
pub mod scalar;
pub mod seed;
pub mod sink;
pub mod viewport;

pub use array::{DelayedArray, ElisionRule, ElisionTable, Pedigree};
pub use block::Block;
pub use config::ExecutionConfig;
pub use dtype::DType;
pub use exec::{
    for_each_block, par_for_each_block, par_reduce_blocks, reduce_blocks, BlockIter, ExecError,
    ExecutionContext,
};
pub use grid::{compatible_grid, BlockShapePolicy, Grid};
pub use labels::Labels;
pub use scalar::Scalar;
pub use seed::{DiskSeed, MemorySeed, Seed};
pub use sink::{realize, realize_with_grid, RealizationBackend, RealizationSink, SinkFactory};
pub use viewport::Viewport;
