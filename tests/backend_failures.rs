use delayed_array::config::{ConfigError, ENV_BLOCK_SHAPE_POLICY, ENV_CONCURRENCY, ENV_MAX_BLOCK_ELEMENTS};
use delayed_array::graph::GraphError;
use delayed_array::seed::SeedError;
use delayed_array::sink::RealizationBackend;
use delayed_array::{
    realize, Block, BlockShapePolicy, DType, DelayedArray, DiskSeed, ExecError, ExecutionConfig,
    ExecutionContext, Grid, MemorySeed, Seed, Viewport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Serves the first `healthy` extractions, then fails.
#[derive(Debug)]
struct FlakySeed {
    shape: Vec<usize>,
    healthy: usize,
    calls: AtomicUsize,
}

impl Seed for FlakySeed {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        DType::Real
    }

    fn extract(&self, viewport: &Viewport) -> Result<Block, SeedError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy {
            return Err(std::io::Error::other("device unplugged").into());
        }
        Ok(Block::zeros(DType::Real, viewport.shape()))
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

fn flaky(healthy: usize) -> DelayedArray {
    DelayedArray::new(FlakySeed {
        shape: vec![4, 4],
        healthy,
        calls: AtomicUsize::new(0),
    })
}

#[test]
fn test_backend_failure_aborts_realization() {
    let x = flaky(2).add_scalar(1.0).unwrap();
    let grid = Grid::regular(vec![4, 4], vec![1, 4]).unwrap();
    let err = delayed_array::realize_with_grid(
        &x,
        &grid,
        &RealizationBackend::InMemory,
        &ExecutionContext::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ExecError::Graph(GraphError::Seed(SeedError::BackendIO(_)))
    ));
}

#[test]
fn test_backend_failure_in_parallel() {
    let x = flaky(0);
    let ctx = ExecutionContext::new(ExecutionConfig {
        concurrency_degree: 2,
        max_block_elements: Some(4),
        ..ExecutionConfig::default()
    });
    let err = realize(&x, &RealizationBackend::InMemory, &ctx).unwrap_err();
    assert!(matches!(
        err,
        ExecError::Graph(GraphError::Seed(SeedError::BackendIO(_)))
    ));
}

#[test]
fn test_block_iter_fuses_after_error() {
    let x = flaky(1);
    let grid = Grid::regular(vec![4, 4], vec![2, 4]).unwrap();
    let ctx = ExecutionContext::default();
    let mut iter = delayed_array::BlockIter::new(&x, &grid, &ctx).unwrap();
    assert!(iter.next().unwrap().is_ok());
    assert!(iter.next().unwrap().is_err());
    assert!(iter.next().is_none());
}

#[test]
fn test_out_of_range_viewport() {
    let x = DelayedArray::new(MemorySeed::from_vec_shape(vec![1, 2, 3], &[3]).unwrap());
    let err = x.resolve(&Viewport::from_ranges(&[2..4])).unwrap_err();
    assert!(matches!(err, GraphError::OutOfRange { .. }));
}

#[test]
fn test_missing_disk_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.bin");
    assert!(matches!(
        DiskSeed::open(&path),
        Err(SeedError::BackendIO(_))
    ));
}

#[test]
fn test_config_overrides() {
    let json = r#"{ "block_size_bytes": 800, "concurrency_degree": 2 }"#;
    let config = ExecutionConfig::from_json_str(json).unwrap();
    assert_eq!(config.max_block_elements_for(DType::Real), 100);
    assert_eq!(config.block_shape_policy, BlockShapePolicy::LastDimensionFastest);

    let env: HashMap<&str, &str> = HashMap::from([
        (ENV_MAX_BLOCK_ELEMENTS, "12"),
        (ENV_BLOCK_SHAPE_POLICY, "first-dimension-fastest"),
        (ENV_CONCURRENCY, "3"),
    ]);
    let config = config
        .with_overrides(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(config.max_block_elements_for(DType::Real), 12);
    assert_eq!(config.block_shape_policy, BlockShapePolicy::FirstDimensionFastest);
    assert_eq!(config.concurrency_degree, 3);

    let bad = config.with_overrides(|key| (key == ENV_CONCURRENCY).then(|| "0".to_string()));
    assert!(matches!(bad, Err(ConfigError::Zero("concurrency_degree"))));
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "block_shape_policy": "first-dimension-fastest" }"#).unwrap();
    let config = ExecutionConfig::from_path(&path).unwrap();
    assert_eq!(config, ExecutionConfig {
        block_shape_policy: BlockShapePolicy::FirstDimensionFastest,
        ..ExecutionConfig::default()
    });
    assert!(ExecutionConfig::from_json_str(r#"{ "block_size_bytes": 0 }"#).is_err());
}
