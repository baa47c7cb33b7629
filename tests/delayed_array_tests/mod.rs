pub mod realization;
pub mod resolution;

use delayed_array::sink::{DiskSinkConfig, RealizationBackend};
use delayed_array::{realize, Block, DelayedArray, ExecutionContext, Labels, MemorySeed};
use tempfile::TempDir;

/// Where test arrays live and where realizations go.
pub struct Fixture {
    dir: Option<TempDir>,
    next: usize,
}

impl Fixture {
    pub fn memory() -> Self {
        Self {
            dir: None,
            next: 0,
        }
    }

    pub fn disk() -> Self {
        Self {
            dir: Some(tempfile::tempdir().unwrap()),
            next: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        if self.dir.is_some() {
            "on-disk"
        } else {
            "in-memory"
        }
    }

    /// A fresh realization target; disk targets get a new file each call.
    pub fn target(&mut self, chunk_shape: Option<Vec<usize>>) -> RealizationBackend {
        match &self.dir {
            None => RealizationBackend::InMemory,
            Some(dir) => {
                self.next += 1;
                let mut config = DiskSinkConfig::new(dir.path().join(format!("array{}.bin", self.next)));
                config.chunk_shape = chunk_shape;
                RealizationBackend::OnDisk(config)
            }
        }
    }

    /// Put `block` into this fixture's backend and return a pristine handle.
    pub fn seed(
        &mut self,
        block: Block,
        chunk_shape: Option<Vec<usize>>,
        labels: Option<Labels>,
    ) -> DelayedArray {
        let mut seed = MemorySeed::new(block);
        if let Some(chunk_shape) = chunk_shape.clone() {
            seed = seed.with_chunk_shape(chunk_shape).unwrap();
        }
        if let Some(labels) = labels {
            seed = seed.with_labels(labels).unwrap();
        }
        let array = DelayedArray::new(seed);
        match self.target(chunk_shape) {
            RealizationBackend::InMemory => array,
            target => realize(&array, &target, &ExecutionContext::default()).unwrap(),
        }
    }

    /// The (6, 4) Integer array with `row * 10 + col` at every position.
    pub fn grid_6x4(&mut self, chunk_shape: Option<Vec<usize>>) -> DelayedArray {
        let values: Vec<i32> = (0..6)
            .flat_map(|r| (0..4).map(move |c| r * 10 + c))
            .collect();
        self.seed(
            Block::from_vec_shape(values, &[6, 4]).unwrap(),
            chunk_shape,
            None,
        )
    }
}

pub fn names(v: &[&str]) -> Option<Vec<String>> {
    Some(v.iter().map(|s| s.to_string()).collect())
}

pub fn test_eq_i32(block: &Block, shape: &[usize], expected: &[i32]) {
    assert_eq!(block.shape(), shape);
    assert_eq!(block.to_vec::<i32>().unwrap(), expected);
}

pub fn test_eq_f64(block: &Block, shape: &[usize], expected: &[f64]) {
    assert_eq!(block.shape(), shape);
    let actual = block.to_vec::<f64>().unwrap();
    assert_eq!(actual.len(), expected.len());
    for (a, b) in actual.iter().zip(expected) {
        assert!((a - b).abs() < 1e-9, "{actual:?} != {expected:?}");
    }
}
