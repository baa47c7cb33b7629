//! Partitions of an index space into rectangular blocks.

use crate::viewport::Viewport;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("Spacing along dimension {0} is zero")]
    ZeroSpacing(usize),
    #[error("Grid rank {0} does not match reference rank {1}")]
    RankMismatch(usize, usize),
    #[error("Invalid boundaries along dimension {axis}: {reason}")]
    InvalidBoundaries { axis: usize, reason: String },
    #[error("Block coordinates {coords:?} outside grid shape {grid_shape:?}")]
    CoordsOutOfRange {
        coords: Vec<usize>,
        grid_shape: Vec<usize>,
    },
}

/// Nesting order of block iteration. The partition itself is unaffected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BlockShapePolicy {
    FirstDimensionFastest,
    #[default]
    LastDimensionFastest,
}

impl BlockShapePolicy {
    /// Block coordinates of the `index`-th block of a grid of `grid_shape`.
    pub fn unravel(&self, mut index: usize, grid_shape: &[usize]) -> Vec<usize> {
        let mut coords = vec![0; grid_shape.len()];
        let mut place = |d: usize| {
            coords[d] = index % grid_shape[d];
            index /= grid_shape[d];
        };
        match self {
            BlockShapePolicy::FirstDimensionFastest => (0..grid_shape.len()).for_each(&mut place),
            BlockShapePolicy::LastDimensionFastest => {
                (0..grid_shape.len()).rev().for_each(&mut place)
            }
        }
        coords
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegularGridParts")]
pub struct RegularGrid {
    reference_shape: Vec<usize>,
    spacing: Vec<usize>,
    #[serde(default)]
    policy: BlockShapePolicy,
}

impl RegularGrid {
    pub fn new(reference_shape: Vec<usize>, spacing: Vec<usize>) -> Result<Self, GridError> {
        if spacing.len() != reference_shape.len() {
            return Err(GridError::RankMismatch(spacing.len(), reference_shape.len()));
        }
        if let Some(axis) = spacing.iter().position(|&s| s == 0) {
            return Err(GridError::ZeroSpacing(axis));
        }
        Ok(Self {
            reference_shape,
            spacing,
            policy: BlockShapePolicy::default(),
        })
    }

    pub fn spacing(&self) -> &[usize] {
        &self.spacing
    }
}

/// Per-dimension tick marks: strictly increasing block end positions whose
/// last value equals the extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArbitraryGridParts")]
pub struct ArbitraryGrid {
    reference_shape: Vec<usize>,
    boundaries: Vec<Vec<usize>>,
    #[serde(default)]
    policy: BlockShapePolicy,
}

impl ArbitraryGrid {
    pub fn new(reference_shape: Vec<usize>, boundaries: Vec<Vec<usize>>) -> Result<Self, GridError> {
        if boundaries.len() != reference_shape.len() {
            return Err(GridError::RankMismatch(
                boundaries.len(),
                reference_shape.len(),
            ));
        }
        for (axis, (ticks, &extent)) in boundaries.iter().zip(&reference_shape).enumerate() {
            let invalid = |reason: String| GridError::InvalidBoundaries { axis, reason };
            if ticks.last().copied().unwrap_or(0) != extent {
                return Err(invalid(format!("last boundary must equal extent {extent}")));
            }
            let mut prev = 0;
            for &t in ticks {
                if t <= prev {
                    return Err(invalid(format!("{ticks:?} is not strictly increasing from 0")));
                }
                prev = t;
            }
        }
        Ok(Self {
            reference_shape,
            boundaries,
            policy: BlockShapePolicy::default(),
        })
    }

    pub fn boundaries(&self) -> &[Vec<usize>] {
        &self.boundaries
    }
}

// Deserialized grids go through the same validation as `new`.
#[derive(Deserialize)]
struct RegularGridParts {
    reference_shape: Vec<usize>,
    spacing: Vec<usize>,
    #[serde(default)]
    policy: BlockShapePolicy,
}

impl TryFrom<RegularGridParts> for RegularGrid {
    type Error = GridError;

    fn try_from(parts: RegularGridParts) -> Result<Self, Self::Error> {
        let mut grid = RegularGrid::new(parts.reference_shape, parts.spacing)?;
        grid.policy = parts.policy;
        Ok(grid)
    }
}

#[derive(Deserialize)]
struct ArbitraryGridParts {
    reference_shape: Vec<usize>,
    boundaries: Vec<Vec<usize>>,
    #[serde(default)]
    policy: BlockShapePolicy,
}

impl TryFrom<ArbitraryGridParts> for ArbitraryGrid {
    type Error = GridError;

    fn try_from(parts: ArbitraryGridParts) -> Result<Self, Self::Error> {
        let mut grid = ArbitraryGrid::new(parts.reference_shape, parts.boundaries)?;
        grid.policy = parts.policy;
        Ok(grid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grid {
    Regular(RegularGrid),
    Arbitrary(ArbitraryGrid),
}

impl From<RegularGrid> for Grid {
    fn from(value: RegularGrid) -> Self {
        Grid::Regular(value)
    }
}

impl From<ArbitraryGrid> for Grid {
    fn from(value: ArbitraryGrid) -> Self {
        Grid::Arbitrary(value)
    }
}

impl Grid {
    pub fn regular(reference_shape: Vec<usize>, spacing: Vec<usize>) -> Result<Self, GridError> {
        Ok(RegularGrid::new(reference_shape, spacing)?.into())
    }

    pub fn arbitrary(
        reference_shape: Vec<usize>,
        boundaries: Vec<Vec<usize>>,
    ) -> Result<Self, GridError> {
        Ok(ArbitraryGrid::new(reference_shape, boundaries)?.into())
    }

    /// The iteration order this grid was built for.
    pub fn policy(&self) -> BlockShapePolicy {
        match self {
            Grid::Regular(g) => g.policy,
            Grid::Arbitrary(g) => g.policy,
        }
    }

    pub fn with_policy(mut self, policy: BlockShapePolicy) -> Self {
        match &mut self {
            Grid::Regular(g) => g.policy = policy,
            Grid::Arbitrary(g) => g.policy = policy,
        }
        self
    }

    pub fn reference_shape(&self) -> &[usize] {
        match self {
            Grid::Regular(g) => &g.reference_shape,
            Grid::Arbitrary(g) => &g.reference_shape,
        }
    }

    /// Number of blocks along each dimension.
    pub fn grid_shape(&self) -> Vec<usize> {
        match self {
            Grid::Regular(g) => g
                .reference_shape
                .iter()
                .zip(&g.spacing)
                .map(|(&extent, &s)| extent.div_ceil(s))
                .collect(),
            Grid::Arbitrary(g) => g.boundaries.iter().map(Vec::len).collect(),
        }
    }

    /// Total number of blocks.
    pub fn len(&self) -> usize {
        self.grid_shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest number of elements any block of this grid holds.
    pub fn max_block_elements(&self) -> usize {
        match self {
            Grid::Regular(g) => g
                .reference_shape
                .iter()
                .zip(&g.spacing)
                .map(|(&extent, &s)| extent.min(s))
                .product(),
            Grid::Arbitrary(g) => g
                .boundaries
                .iter()
                .map(|ticks| {
                    let mut prev = 0;
                    ticks
                        .iter()
                        .map(|&t| {
                            let len = t - prev;
                            prev = t;
                            len
                        })
                        .max()
                        .unwrap_or(0)
                })
                .product(),
        }
    }

    /// The block at `coords` (one block index per dimension).
    pub fn viewport(&self, coords: &[usize]) -> Result<Viewport, GridError> {
        let grid_shape = self.grid_shape();
        if coords.len() != grid_shape.len() || coords.iter().zip(&grid_shape).any(|(c, n)| c >= n) {
            return Err(GridError::CoordsOutOfRange {
                coords: coords.to_vec(),
                grid_shape,
            });
        }
        let (offsets, lengths) = match self {
            Grid::Regular(g) => coords
                .iter()
                .enumerate()
                .map(|(d, &c)| {
                    let offset = c * g.spacing[d];
                    (offset, g.spacing[d].min(g.reference_shape[d] - offset))
                })
                .unzip(),
            Grid::Arbitrary(g) => coords
                .iter()
                .enumerate()
                .map(|(d, &c)| {
                    let start = if c == 0 { 0 } else { g.boundaries[d][c - 1] };
                    (start, g.boundaries[d][c] - start)
                })
                .unzip(),
        };
        Ok(Viewport::new(offsets, lengths))
    }

    /// The `index`-th block in `policy` order.
    pub fn viewport_at(&self, index: usize, policy: BlockShapePolicy) -> Result<Viewport, GridError> {
        let grid_shape = self.grid_shape();
        if index >= self.len() {
            return Err(GridError::CoordsOutOfRange {
                coords: vec![index],
                grid_shape,
            });
        }
        self.viewport(&policy.unravel(index, &grid_shape))
    }

    pub fn viewports(&self, policy: BlockShapePolicy) -> Vec<Viewport> {
        self.iter(policy).collect()
    }

    /// Lazily walk the blocks in `policy` order.
    pub fn iter(&self, policy: BlockShapePolicy) -> GridIter<'_> {
        GridIter {
            grid: self,
            grid_shape: self.grid_shape(),
            policy,
            next: 0,
            len: self.len(),
        }
    }
}

pub struct GridIter<'a> {
    grid: &'a Grid,
    grid_shape: Vec<usize>,
    policy: BlockShapePolicy,
    next: usize,
    len: usize,
}

impl Iterator for GridIter<'_> {
    type Item = Viewport;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let coords = self.policy.unravel(self.next, &self.grid_shape);
        self.next += 1;
        self.grid.viewport(&coords).ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.len - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for GridIter<'_> {}

/// Pick the coarsest regular grid whose spacing is a whole multiple of the
/// native chunk shape and whose blocks hold at most `max_block_elements`.
///
/// Spacing starts at one chunk per dimension, clamped to the extent. A chunk
/// larger than the budget is kept whole. Otherwise dimensions grow from the
/// last to the first; a dimension that cannot reach its full extent stops the
/// growth. Without a chunk shape every dimension uses unit chunks.
///
/// # Errors
/// - `RankMismatch` if the chunk shape rank differs from the reference rank
/// - `ZeroSpacing` if a chunk length is zero
pub fn compatible_grid(
    reference_shape: &[usize],
    native_chunk_shape: Option<&[usize]>,
    max_block_elements: usize,
    policy: BlockShapePolicy,
) -> Result<Grid, GridError> {
    let rank = reference_shape.len();
    let chunk: Vec<usize> = match native_chunk_shape {
        Some(c) if c.len() != rank => return Err(GridError::RankMismatch(c.len(), rank)),
        Some(c) => {
            if let Some(axis) = c.iter().position(|&x| x == 0) {
                return Err(GridError::ZeroSpacing(axis));
            }
            c.to_vec()
        }
        None => vec![1; rank],
    };
    let budget = max_block_elements.max(1);

    // 1) One chunk per dimension, clamped to the extent
    let mut spacing: Vec<usize> = chunk
        .iter()
        .zip(reference_shape)
        .map(|(&c, &extent)| c.min(extent).max(1))
        .collect();

    // 2) Grow whole-chunk multiples from the last dimension to the first
    if spacing.iter().product::<usize>() < budget {
        for d in (0..rank).rev() {
            let extent = reference_shape[d].max(1);
            let others: usize = (0..rank).filter(|&i| i != d).map(|i| spacing[i]).product();
            let multiples = (budget / others.max(1)) / chunk[d];
            let grown = (multiples * chunk[d]).min(extent);
            if grown > spacing[d] {
                spacing[d] = grown;
            }
            if spacing[d] < extent {
                break;
            }
        }
    }

    log::debug!(
        "compatible grid for {reference_shape:?} (chunks {chunk:?}, budget {budget}): spacing {spacing:?}"
    );
    Ok(Grid::regular(reference_shape.to_vec(), spacing)?.with_policy(policy))
}
