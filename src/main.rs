use delayed_array::grid::compatible_grid;
use delayed_array::sink::RealizationBackend;
use delayed_array::{
    reduce_blocks, realize, DelayedArray, ExecError, ExecutionConfig, ExecutionContext, Labels,
    MemorySeed,
};
use std::ops::ControlFlow;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => ExecutionConfig::from_path(path)?,
        None => ExecutionConfig::default(),
    }
    .with_env_overrides()?;
    let ctx = ExecutionContext::new(config)
        .with_observer(Arc::new(delayed_array::observer::LoggingObserver));

    let values: Vec<f64> = (0..24).map(f64::from).collect();
    let seed = MemorySeed::from_vec_shape(values, &[4, 6])?
        .with_chunk_shape(vec![2, 3])?
        .with_labels(Labels::new(vec![
            Some(vec!["a".into(), "b".into(), "c".into(), "d".into()]),
            None,
        ]))?;
    let x = DelayedArray::new(seed);

    let y = x
        .slice(&[1..4, 0..6])?
        .mul_scalar(2.0)?
        .add_scalar(1.0)?
        .transpose()?;
    println!("{}", y.describe());

    let realized = realize(&y, &RealizationBackend::InMemory, &ctx)?;
    println!("{}", realized.describe());

    let grid = compatible_grid(
        realized.shape(),
        realized.native_chunk_shape().as_deref(),
        6,
        ctx.config().block_shape_policy,
    )?;
    let total = reduce_blocks::<_, ExecError, _>(&realized, &grid, &ctx, 0.0, |acc, _, block| {
        let values = block
            .to_vec::<f64>()
            .map_err(|e| ExecError::Graph(e.into()))?;
        Ok(ControlFlow::Continue(acc + values.iter().sum::<f64>()))
    })?;
    println!("sum over {} blocks: {total}", grid.len());
    Ok(())
}
