use crate::delayed_array_tests::{names, test_eq_i32, Fixture};
use delayed_array::graph::IndexSelector;
use delayed_array::observer::BlockObserver;
use delayed_array::sink::SinkError;
use delayed_array::{
    for_each_block, par_for_each_block, par_reduce_blocks, realize, realize_with_grid,
    reduce_blocks, Block, DType, ExecError, ExecutionConfig, ExecutionContext, Grid, Labels,
    Pedigree, SinkFactory, Viewport,
};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct CountingObserver {
    resolved: AtomicUsize,
    written: AtomicUsize,
}

impl BlockObserver for CountingObserver {
    fn on_block_resolved(
        &self,
        _index: usize,
        _viewport: &Viewport,
        _block: &Block,
        _start_instant: Instant,
        _end_instant: Instant,
    ) {
        self.resolved.fetch_add(1, Ordering::SeqCst);
    }

    fn on_block_written(&self, _index: usize, _viewport: &Viewport) {
        self.written.fetch_add(1, Ordering::SeqCst);
    }
}

fn parallel(threads: usize) -> ExecutionConfig {
    ExecutionConfig {
        concurrency_degree: threads,
        ..ExecutionConfig::default()
    }
}

fn block_sum(block: &Block) -> i64 {
    block
        .to_vec::<i32>()
        .unwrap()
        .into_iter()
        .map(i64::from)
        .sum()
}

pub fn test_overlapping_writes_conflict(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let mut sink = fixture
        .target(None)
        .open(x.shape(), x.dtype(), None)
        .unwrap();
    let first = Viewport::from_ranges(&[0..2, 0..2]);
    sink.write_block(&first, &x.resolve(&first).unwrap()).unwrap();
    let overlapping = Viewport::from_ranges(&[1..3, 0..2]);
    let err = sink
        .write_block(&overlapping, &x.resolve(&overlapping).unwrap())
        .unwrap_err();
    assert!(matches!(err, SinkError::RegionConflict { .. }));
}

pub fn test_missing_block_is_incomplete(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let grid = Grid::regular(vec![6, 4], vec![2, 2]).unwrap();
    let mut sink = fixture
        .target(None)
        .open(x.shape(), x.dtype(), None)
        .unwrap();
    for viewport in grid.iter(grid.policy()).take(5) {
        sink.write_block(&viewport, &x.resolve(&viewport).unwrap())
            .unwrap();
    }
    assert!(matches!(
        sink.finalize(),
        Err(SinkError::IncompleteCoverage {
            written: 20,
            expected: 24
        })
    ));
}

pub fn test_realize_round_trip(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let y = x
        .transpose()
        .unwrap()
        .add_scalar(1)
        .unwrap()
        .slice(&[1..3, 0..6])
        .unwrap();
    let grid = Grid::regular(y.shape().to_vec(), vec![1, 4]).unwrap();
    let target = fixture.target(Some(vec![1, 4]));
    let realized = realize_with_grid(&y, &grid, &target, &ExecutionContext::default()).unwrap();

    assert!(realized.is_pristine());
    assert_eq!(realized.pedigree(), Pedigree::Backend(fixture.backend_name()));
    assert_eq!(realized.shape(), &[2, 6]);
    assert_eq!(realized.dtype(), DType::Integer);
    test_eq_i32(
        &realized.to_block().unwrap(),
        &[2, 6],
        &[2, 12, 22, 32, 42, 52, 3, 13, 23, 33, 43, 53],
    );
    assert_eq!(
        realized.to_block().unwrap().to_vec::<i32>().unwrap(),
        y.to_block().unwrap().to_vec::<i32>().unwrap()
    );
}

pub fn test_parallel_matches_sequential(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let grid = Grid::regular(vec![6, 4], vec![1, 2]).unwrap();
    let sequential = ExecutionContext::default();
    let pool = ExecutionContext::new(parallel(4));

    let expected = reduce_blocks::<_, ExecError, _>(&x, &grid, &sequential, 0i64, |acc, _, b| {
        Ok(ControlFlow::Continue(acc + block_sum(&b)))
    })
    .unwrap();
    let actual = par_reduce_blocks::<_, _, ExecError, _, _>(
        &x,
        &grid,
        &pool,
        0i64,
        |_, b| Ok(ControlFlow::Continue(block_sum(&b))),
        |acc, part| acc + part,
    )
    .unwrap();
    assert_eq!(expected, 636);
    assert_eq!(actual, expected);

    let firsts = par_for_each_block::<_, ExecError, _>(&x, &grid, &pool, |_, b| {
        Ok(ControlFlow::Continue(b.to_vec::<i32>().unwrap()[0]))
    })
    .unwrap();
    assert_eq!(firsts, vec![0, 2, 10, 12, 20, 22, 30, 32, 40, 42, 50, 52]);

    let realized = realize_with_grid(&x, &grid, &fixture.target(None), &pool).unwrap();
    test_eq_i32(
        &realized.resolve(&Viewport::from_ranges(&[5..6, 0..4])).unwrap(),
        &[1, 4],
        &[50, 51, 52, 53],
    );
}

pub fn test_early_termination(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let grid = Grid::regular(vec![6, 4], vec![1, 4]).unwrap();
    let observer = Arc::new(CountingObserver::default());
    let ctx = ExecutionContext::default().with_observer(observer.clone());

    let seen = for_each_block::<_, ExecError, _>(&x, &grid, &ctx, |viewport, _| {
        if viewport.offsets()[0] == 2 {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(viewport.offsets()[0]))
        }
    })
    .unwrap();
    assert_eq!(seen, vec![0, 1]);
    assert_eq!(observer.resolved.load(Ordering::SeqCst), 3);

    let pool = ExecutionContext::new(parallel(3));
    let seen = par_for_each_block::<_, ExecError, _>(&x, &grid, &pool, |viewport, _| {
        if viewport.offsets()[0] == 2 {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(viewport.offsets()[0]))
        }
    })
    .unwrap();
    assert_eq!(seen, vec![0, 1]);
}

pub fn test_labels_survive(fixture: &mut Fixture) {
    let labels = Labels::new(vec![
        names(&["a", "b", "c"]),
        names(&["u", "v"]),
    ]);
    let x = fixture.seed(
        Block::from_vec_shape(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap(),
        None,
        Some(labels.clone()),
    );
    assert_eq!(x.labels(), Some(&labels));

    let picked = x
        .subset(vec![IndexSelector::Indices(vec![2, 0]), IndexSelector::All])
        .unwrap();
    assert_eq!(picked.labels().unwrap().dim(0), names(&["c", "a"]).as_deref());

    let flipped = picked.transpose().unwrap();
    assert_eq!(flipped.labels().unwrap().dim(0), names(&["u", "v"]).as_deref());
    assert_eq!(flipped.labels().unwrap().dim(1), names(&["c", "a"]).as_deref());

    let bound = x.rbind(&[&picked]).unwrap();
    assert_eq!(
        bound.labels().unwrap().dim(0),
        names(&["a", "b", "c", "c", "a"]).as_deref()
    );

    let observer = Arc::new(CountingObserver::default());
    let ctx = ExecutionContext::default().with_observer(observer.clone());
    let realized = realize(&flipped, &fixture.target(None), &ctx).unwrap();
    assert_eq!(realized.labels(), flipped.labels());
    assert_eq!(
        observer.written.load(Ordering::SeqCst),
        observer.resolved.load(Ordering::SeqCst)
    );
}
