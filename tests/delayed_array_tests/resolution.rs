use crate::delayed_array_tests::{test_eq_f64, test_eq_i32, Fixture};
use delayed_array::block::ops::{arith, ArithOp, CompareOp};
use delayed_array::graph::{IndexSelector, MapFn};
use delayed_array::{
    for_each_block, BlockShapePolicy, DType, ExecError, ExecutionConfig, ExecutionContext, Grid,
    Pedigree, Viewport,
};
use std::ops::ControlFlow;

pub fn test_regular_grid_viewports(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let grid = Grid::regular(x.shape().to_vec(), vec![2, 2]).unwrap();
    assert_eq!(grid.len(), 6);
    assert_eq!(grid.grid_shape(), vec![3, 2]);

    let viewports = grid.viewports(BlockShapePolicy::LastDimensionFastest);
    assert_eq!(viewports[0], Viewport::from_ranges(&[0..2, 0..2]));
    assert_eq!(viewports[1], Viewport::from_ranges(&[0..2, 2..4]));
    assert_eq!(viewports[5], Viewport::from_ranges(&[4..6, 2..4]));
    let by_rows = grid.viewports(BlockShapePolicy::FirstDimensionFastest);
    assert_eq!(by_rows[1], Viewport::from_ranges(&[2..4, 0..2]));

    let covered: usize = viewports.iter().map(|v| v.num_elements()).sum();
    assert_eq!(covered, x.len());
}

pub fn test_resolve_viewport(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    assert_eq!(x.pedigree(), Pedigree::Backend(fixture.backend_name()));
    let block = x.resolve(&Viewport::from_ranges(&[2..4, 2..4])).unwrap();
    test_eq_i32(&block, &[2, 2], &[22, 23, 32, 33]);
}

pub fn test_add_scalar_then_resolve(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let y = x.add_scalar(100).unwrap();
    assert_eq!(y.pedigree(), Pedigree::Generic);
    assert!(x.is_pristine());
    let block = y.resolve(&Viewport::from_ranges(&[0..1, 0..1])).unwrap();
    test_eq_i32(&block, &[1, 1], &[100]);
}

pub fn test_subset_gather_and_transpose(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let y = x
        .subset(vec![
            IndexSelector::Indices(vec![5, 0, 5]),
            IndexSelector::Range(1..3),
        ])
        .unwrap();
    assert_eq!(y.shape(), &[3, 2]);
    test_eq_i32(&y.to_block().unwrap(), &[3, 2], &[51, 52, 1, 2, 51, 52]);

    let t = y.transpose().unwrap();
    test_eq_i32(&t.to_block().unwrap(), &[2, 3], &[51, 1, 51, 52, 2, 52]);
    let corner = t.resolve(&Viewport::from_ranges(&[1..2, 1..3])).unwrap();
    test_eq_i32(&corner, &[1, 2], &[2, 52]);
}

pub fn test_noops_keep_pedigree(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let backend = Pedigree::Backend(fixture.backend_name());
    assert_eq!(x.slice(&[0..6, 0..4]).unwrap().pedigree(), backend);
    assert_eq!(x.transpose().unwrap().transpose().unwrap().pedigree(), backend);
    assert_eq!(x.cast(DType::Integer).unwrap().pedigree(), backend);
    assert_eq!(x.mul_scalar(1).unwrap().pedigree(), backend);
    assert_eq!(x.add_scalar(0).unwrap().pedigree(), backend);

    // Neutral in value but not in type.
    assert_eq!(x.mul_scalar(1.0).unwrap().pedigree(), Pedigree::Generic);
    assert_eq!(x.slice(&[0..6, 0..3]).unwrap().pedigree(), Pedigree::Generic);
}

pub fn test_combine_and_compare(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let doubled = x.add(&x).unwrap();
    let row = doubled.resolve(&Viewport::from_ranges(&[3..4, 0..4])).unwrap();
    test_eq_i32(&row, &[1, 4], &[60, 62, 64, 66]);

    let ratio = x.div(&x).unwrap();
    assert_eq!(ratio.dtype(), DType::Real);
    let row = ratio.resolve(&Viewport::from_ranges(&[1..2, 0..4])).unwrap();
    test_eq_f64(&row, &[1, 4], &[1.0, 1.0, 1.0, 1.0]);

    let big = x.compare_scalar(CompareOp::Gt, 30).unwrap();
    assert_eq!(big.dtype(), DType::Logical);
    let col = big.resolve(&Viewport::from_ranges(&[0..6, 0..1])).unwrap();
    assert_eq!(
        col.to_vec::<bool>().unwrap(),
        vec![false, false, false, false, true, true]
    );
}

pub fn test_map_function(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let squared = x
        .map(MapFn::new("square", DType::Integer, |b| {
            arith(ArithOp::Mul, b, b)
        }))
        .unwrap();
    let block = squared.resolve(&Viewport::from_ranges(&[1..2, 1..3])).unwrap();
    test_eq_i32(&block, &[1, 2], &[121, 144]);
}

pub fn test_abind_parts(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let top = x.slice(&[0..2, 0..4]).unwrap();
    let bottom = x.slice(&[4..6, 0..4]).unwrap();
    let both = top.rbind(&[&bottom]).unwrap();
    assert_eq!(both.shape(), &[4, 4]);
    let middle = both.resolve(&Viewport::from_ranges(&[1..3, 0..2])).unwrap();
    test_eq_i32(&middle, &[2, 2], &[10, 11, 40, 41]);

    let wide = x.cbind(&[&x.cast(DType::Real).unwrap()]).unwrap();
    assert_eq!(wide.shape(), &[6, 8]);
    assert_eq!(wide.dtype(), DType::Real);
}

pub fn test_native_chunks_drive_default_grid(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(Some(vec![2, 2]));
    assert_eq!(x.native_chunk_shape(), Some(vec![2, 2]));
    let ctx = ExecutionContext::new(ExecutionConfig {
        max_block_elements: Some(8),
        ..ExecutionConfig::default()
    });
    let grid = ctx.default_grid(&x).unwrap();
    assert_eq!(grid.grid_shape(), vec![3, 1]);

    let rows = for_each_block::<_, ExecError, _>(&x, &grid, &ctx, |viewport, block| {
        assert_eq!(block.shape(), viewport.shape());
        Ok(ControlFlow::Continue(block.to_vec::<i32>().unwrap()[0]))
    })
    .unwrap();
    assert_eq!(rows, vec![0, 20, 40]);
}

pub fn test_arbitrary_grid_blocks(fixture: &mut Fixture) {
    let x = fixture.grid_6x4(None);
    let grid = Grid::arbitrary(vec![6, 4], vec![vec![1, 6], vec![3, 4]]).unwrap();
    assert_eq!(grid.len(), 4);
    let ctx = ExecutionContext::default();
    let shapes = for_each_block::<_, ExecError, _>(&x, &grid, &ctx, |_, block| {
        Ok(ControlFlow::Continue(block.shape().to_vec()))
    })
    .unwrap();
    assert_eq!(shapes, vec![vec![1, 3], vec![1, 1], vec![5, 3], vec![5, 1]]);
}
