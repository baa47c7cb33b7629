//! Block-wise evaluation of delayed arrays.
//!
//! [`BlockIter`] only walks a grid and resolves blocks; the drivers below
//! decide whether blocks are consumed in grid order on the calling thread or
//! dispatched on a rayon pool.

use crate::array::DelayedArray;
use crate::block::Block;
use crate::config::ExecutionConfig;
use crate::graph::GraphError;
use crate::grid::{compatible_grid, BlockShapePolicy, Grid, GridError};
use crate::observer::BlockObserver;
use crate::sink::SinkError;
use crate::viewport::Viewport;
use rayon::prelude::*;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Grid over {grid:?} does not cover array of shape {array:?}")]
    GridMismatch { grid: Vec<usize>, array: Vec<usize> },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Configuration plus observer for one run of block processing.
#[derive(Clone)]
pub struct ExecutionContext {
    config: ExecutionConfig,
    observer: Arc<dyn BlockObserver>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(ExecutionConfig::default())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            observer: Arc::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BlockObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn observer(&self) -> &dyn BlockObserver {
        self.observer.as_ref()
    }

    /// The grid `array` is processed on when the caller does not pick one:
    /// chunk aligned, within the configured element budget.
    pub fn default_grid(&self, array: &DelayedArray) -> Result<Grid, GridError> {
        compatible_grid(
            array.shape(),
            array.native_chunk_shape().as_deref(),
            self.config.max_block_elements_for(array.dtype()),
            self.config.block_shape_policy,
        )
    }

    fn thread_pool(&self) -> Result<rayon::ThreadPool, ExecError> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency_degree)
            .thread_name(|i| format!("delayed-array-{i}"))
            .build()?)
    }
}

fn check_grid(array: &DelayedArray, grid: &Grid) -> Result<(), ExecError> {
    if grid.reference_shape() != array.shape() {
        return Err(ExecError::GridMismatch {
            grid: grid.reference_shape().to_vec(),
            array: array.shape().to_vec(),
        });
    }
    Ok(())
}

fn resolve_block(
    array: &DelayedArray,
    ctx: &ExecutionContext,
    index: usize,
    viewport: &Viewport,
) -> Result<Block, ExecError> {
    let start_instant = Instant::now();
    let block = array.resolve(viewport)?;
    let end_instant = Instant::now();
    ctx.observer()
        .on_block_resolved(index, viewport, &block, start_instant, end_instant);
    Ok(block)
}

/// Lazily resolves the blocks of a grid in the grid's iteration order.
///
/// After the first error the iterator yields nothing more until
/// [`BlockIter::restart`] is called.
pub struct BlockIter<'a> {
    array: &'a DelayedArray,
    grid: &'a Grid,
    ctx: &'a ExecutionContext,
    policy: BlockShapePolicy,
    next: usize,
    len: usize,
    failed: bool,
}

impl<'a> BlockIter<'a> {
    pub fn new(
        array: &'a DelayedArray,
        grid: &'a Grid,
        ctx: &'a ExecutionContext,
    ) -> Result<Self, ExecError> {
        check_grid(array, grid)?;
        Ok(Self {
            array,
            grid,
            ctx,
            policy: grid.policy(),
            next: 0,
            len: grid.len(),
            failed: false,
        })
    }

    /// Walk the grid in `policy` order instead of the grid's own.
    pub fn with_policy(mut self, policy: BlockShapePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start again from the first block.
    pub fn restart(&mut self) {
        self.next = 0;
        self.failed = false;
    }
}

impl Iterator for BlockIter<'_> {
    type Item = Result<(usize, Viewport, Block), ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.len {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let result = self
            .grid
            .viewport_at(index, self.policy)
            .map_err(ExecError::from)
            .and_then(|viewport| {
                let block = resolve_block(self.array, self.ctx, index, &viewport)?;
                Ok((index, viewport, block))
            });
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.len - self.next))
        }
    }
}

/// Visit every block in grid order, collecting the values the visitor
/// returns. A `Break` from the visitor stops iteration; nothing is resolved
/// after it.
///
/// # Errors
/// The first error from resolution or from the visitor.
pub fn for_each_block<T, E, F>(
    array: &DelayedArray,
    grid: &Grid,
    ctx: &ExecutionContext,
    mut visitor: F,
) -> Result<Vec<T>, E>
where
    E: From<ExecError>,
    F: FnMut(&Viewport, Block) -> Result<ControlFlow<(), T>, E>,
{
    let mut out = Vec::with_capacity(grid.len());
    for item in BlockIter::new(array, grid, ctx)? {
        let (index, viewport, block) = item?;
        match visitor(&viewport, block)? {
            ControlFlow::Continue(value) => out.push(value),
            ControlFlow::Break(()) => {
                log::debug!("visitor stopped at block {index}");
                break;
            }
        }
    }
    Ok(out)
}

/// Fold every block into an accumulator in grid order.
/// `ControlFlow::Break(acc)` ends the fold early with `acc`.
///
/// # Errors
/// The first error from resolution or from `combine`.
pub fn reduce_blocks<A, E, F>(
    array: &DelayedArray,
    grid: &Grid,
    ctx: &ExecutionContext,
    init: A,
    mut combine: F,
) -> Result<A, E>
where
    E: From<ExecError>,
    F: FnMut(A, &Viewport, Block) -> Result<ControlFlow<A, A>, E>,
{
    let mut acc = init;
    for item in BlockIter::new(array, grid, ctx)? {
        let (index, viewport, block) = item?;
        acc = match combine(acc, &viewport, block)? {
            ControlFlow::Continue(acc) => acc,
            ControlFlow::Break(acc) => {
                log::debug!("reduction stopped at block {index}");
                return Ok(acc);
            }
        };
    }
    Ok(acc)
}

enum Outcome<T> {
    Value(T),
    Last(Option<T>),
    Skipped,
}

/// Resolve and process the blocks of `grid` on a pool of
/// `concurrency_degree` threads. Once a block asks to stop or fails, blocks
/// after it in grid order are skipped if they have not started yet; their
/// outcomes are discarded either way. Outcomes come back in grid order, and
/// the error returned is that of the earliest failing block before the cut.
fn par_process<T, E, F>(
    array: &DelayedArray,
    grid: &Grid,
    ctx: &ExecutionContext,
    process: F,
) -> Result<Vec<Outcome<T>>, E>
where
    T: Send,
    E: From<ExecError> + Send,
    F: Fn(usize, &Viewport, Block) -> Result<Outcome<T>, E> + Sync,
{
    check_grid(array, grid)?;
    let pool = ctx.thread_pool()?;
    let policy = grid.policy();
    let viewports = (0..grid.len())
        .map(|i| grid.viewport_at(i, policy))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ExecError::from)?;
    let stop_at = AtomicUsize::new(usize::MAX);

    log::debug!(
        "dispatching {} blocks on {} threads",
        viewports.len(),
        ctx.config().concurrency_degree
    );
    let outcomes: Vec<Result<Outcome<T>, E>> = pool.install(|| {
        viewports
            .par_iter()
            .enumerate()
            .map(|(index, viewport)| {
                if index > stop_at.load(Ordering::Acquire) {
                    return Ok(Outcome::Skipped);
                }
                let outcome = resolve_block(array, ctx, index, viewport)
                    .map_err(E::from)
                    .and_then(|block| process(index, viewport, block));
                if matches!(outcome, Ok(Outcome::Last(_)) | Err(_)) {
                    stop_at.fetch_min(index, Ordering::AcqRel);
                }
                outcome
            })
            .collect()
    });

    let cut = stop_at.load(Ordering::Acquire);
    outcomes
        .into_iter()
        .enumerate()
        .take_while(|(index, _)| *index <= cut)
        .map(|(_, outcome)| outcome)
        .collect()
}

/// Parallel [`for_each_block`]. The visitor may run on several threads at
/// once; the collected values are in grid order and match the sequential
/// result, including where a `Break` cuts it short.
///
/// # Errors
/// The error of the first failing block in grid order, as the sequential
/// driver would report it.
pub fn par_for_each_block<T, E, F>(
    array: &DelayedArray,
    grid: &Grid,
    ctx: &ExecutionContext,
    visitor: F,
) -> Result<Vec<T>, E>
where
    T: Send,
    E: From<ExecError> + Send,
    F: Fn(&Viewport, Block) -> Result<ControlFlow<(), T>, E> + Sync,
{
    par_for_each_indexed_block(array, grid, ctx, |_, viewport, block| {
        visitor(viewport, block)
    })
}

/// [`par_for_each_block`] with the block index passed to the visitor.
pub(crate) fn par_for_each_indexed_block<T, E, F>(
    array: &DelayedArray,
    grid: &Grid,
    ctx: &ExecutionContext,
    visitor: F,
) -> Result<Vec<T>, E>
where
    T: Send,
    E: From<ExecError> + Send,
    F: Fn(usize, &Viewport, Block) -> Result<ControlFlow<(), T>, E> + Sync,
{
    let outcomes = par_process::<_, E, _>(array, grid, ctx, |index, viewport, block| {
        Ok(match visitor(index, viewport, block)? {
            ControlFlow::Continue(value) => Outcome::Value(value),
            ControlFlow::Break(()) => Outcome::Last(None),
        })
    })?;
    Ok(outcomes
        .into_iter()
        .filter_map(|outcome| match outcome {
            Outcome::Value(value) | Outcome::Last(Some(value)) => Some(value),
            Outcome::Last(None) | Outcome::Skipped => None,
        })
        .collect())
}

/// Parallel reduction. `map` turns each block into a partial result on the
/// pool; the partials are then folded into `init` with `combine` in grid
/// order, so `combine` need only be associative. `ControlFlow::Break(p)`
/// from `map` includes `p` and ends the reduction after that block.
///
/// # Errors
/// The error of the first failing block in grid order.
pub fn par_reduce_blocks<A, P, E, M, C>(
    array: &DelayedArray,
    grid: &Grid,
    ctx: &ExecutionContext,
    init: A,
    map: M,
    mut combine: C,
) -> Result<A, E>
where
    P: Send,
    E: From<ExecError> + Send,
    M: Fn(&Viewport, Block) -> Result<ControlFlow<P, P>, E> + Sync,
    C: FnMut(A, P) -> A,
{
    let outcomes = par_process::<_, E, _>(array, grid, ctx, |_, viewport, block| {
        Ok(match map(viewport, block)? {
            ControlFlow::Continue(partial) => Outcome::Value(partial),
            ControlFlow::Break(partial) => Outcome::Last(Some(partial)),
        })
    })?;
    Ok(outcomes.into_iter().fold(init, |acc, outcome| match outcome {
        Outcome::Value(partial) | Outcome::Last(Some(partial)) => combine(acc, partial),
        Outcome::Last(None) | Outcome::Skipped => acc,
    }))
}
