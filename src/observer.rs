use crate::block::Block;
use crate::viewport::Viewport;
use std::time::Instant;

/// Hooks called by the executor as blocks move through it. Parallel
/// execution calls them from worker threads, in no particular order.
pub trait BlockObserver: Send + Sync {
    fn on_block_resolved(
        &self,
        index: usize,
        viewport: &Viewport,
        block: &Block,
        start_instant: Instant,
        end_instant: Instant,
    );
    fn on_block_written(&self, index: usize, viewport: &Viewport);
}

impl BlockObserver for () {
    fn on_block_resolved(
        &self,
        _index: usize,
        _viewport: &Viewport,
        _block: &Block,
        _start_instant: Instant,
        _end_instant: Instant,
    ) {
    }
    fn on_block_written(&self, _index: usize, _viewport: &Viewport) {}
}

/// Reports every block through the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl BlockObserver for LoggingObserver {
    fn on_block_resolved(
        &self,
        index: usize,
        viewport: &Viewport,
        block: &Block,
        start_instant: Instant,
        end_instant: Instant,
    ) {
        log::debug!(
            "block {index} {viewport}: {} {} elements in {:?}",
            block.dtype(),
            block.len(),
            end_instant - start_instant
        );
    }

    fn on_block_written(&self, index: usize, viewport: &Viewport) {
        log::debug!("block {index} {viewport} written");
    }
}
