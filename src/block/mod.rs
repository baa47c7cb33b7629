//! Dense in-memory buffers.
//!
//! A [`Block`] is what every seed extraction and every graph resolution
//! produces: one `ndarray` buffer per element kind, always n-dimensional.

pub mod conversions;
pub mod ops;

use crate::dtype::{DType, DTypeError};
use crate::viewport::Viewport;
use ndarray::{ArcArray, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub use conversions::BlockElement;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("Requested dtype {0}, but had dtype {1}")]
    WrongDType(DType, DType),
    #[error("Cannot cast {value:?} from {from} to {to}")]
    InvalidCast {
        from: DType,
        to: DType,
        value: String,
    },
    #[error("Incompatible shapes {0:?} and {1:?}")]
    IncompatibleShapes(Vec<usize>, Vec<usize>),
    #[error("Unsupported operation {0} for dtypes {1:?}")]
    UnsupportedOperationForDTypes(String, Vec<DType>),
    #[error("Integer overflow in {0}")]
    IntegerOverflow(String),
    #[error("Axis {0} is out of bounds for rank {1}")]
    AxisOutOfBounds(usize, usize),
    #[error("Cannot concatenate an empty list of blocks")]
    EmptyConcat,
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
    #[error(transparent)]
    DTypeError(#[from] DTypeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Logical(ArcArray<bool, IxDyn>),
    Integer(ArcArray<i32, IxDyn>),
    Real(ArcArray<f64, IxDyn>),
    Text(ArcArray<String, IxDyn>),
}

/// Apply an expression to the inner array of every variant, rewrapping the
/// result in the same variant.
macro_rules! block_map {
    ($this:expr, $x:ident => $call:expr) => {
        match $this {
            Block::Logical($x) => Block::Logical($call),
            Block::Integer($x) => Block::Integer($call),
            Block::Real($x) => Block::Real($call),
            Block::Text($x) => Block::Text($call),
        }
    };
}

/// Apply an expression to the inner array of every variant.
macro_rules! block_dispatch {
    ($this:expr, $x:ident => $call:expr) => {
        match $this {
            Block::Logical($x) => $call,
            Block::Integer($x) => $call,
            Block::Real($x) => $call,
            Block::Text($x) => $call,
        }
    };
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        block_dispatch!(self, x => x.fmt(f))
    }
}

impl Block {
    pub fn dtype(&self) -> DType {
        match self {
            Block::Logical(_) => DType::Logical,
            Block::Integer(_) => DType::Integer,
            Block::Real(_) => DType::Real,
            Block::Text(_) => DType::Text,
        }
    }

    pub fn shape(&self) -> &[usize] {
        block_dispatch!(self, x => x.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        block_dispatch!(self, x => x.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A block of `shape` filled with the zero value of `dtype`
    /// (`false`, `0`, `0.0`, or the empty string).
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        let dim = IxDyn(shape);
        match dtype {
            DType::Logical => Block::Logical(ArcArray::from_elem(dim, false)),
            DType::Integer => Block::Integer(ArcArray::from_elem(dim, 0)),
            DType::Real => Block::Real(ArcArray::from_elem(dim, 0.0)),
            DType::Text => Block::Text(ArcArray::from_elem(dim, String::new())),
        }
    }

    /// Copy out the region selected by `viewport`.
    pub fn slice(&self, viewport: &Viewport) -> Result<Self, BlockError> {
        if !viewport.is_within(self.shape()) {
            return Err(BlockError::IncompatibleShapes(
                self.shape().to_vec(),
                viewport.lengths().to_vec(),
            ));
        }
        let ranges = viewport.ranges();
        Ok(block_map!(self, x => x
            .slice_each_axis(|ax| Slice::from(ranges[ax.axis.index()].clone()))
            .to_shared()))
    }

    /// Gather `indices` along `axis`; indices may repeat or be unordered.
    pub fn select(&self, axis: usize, indices: &[usize]) -> Result<Self, BlockError> {
        if axis >= self.ndim() {
            return Err(BlockError::AxisOutOfBounds(axis, self.ndim()));
        }
        let extent = self.shape()[axis];
        if let Some(&bad) = indices.iter().find(|&&i| i >= extent) {
            return Err(BlockError::IncompatibleShapes(
                self.shape().to_vec(),
                vec![bad],
            ));
        }
        Ok(block_map!(self, x => x.select(Axis(axis), indices).into_shared()))
    }

    /// Remove axes of extent 1.
    pub fn remove_axes(&self, axes: &[usize]) -> Result<Self, BlockError> {
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut out = self.clone();
        for &axis in sorted.iter().rev() {
            if axis >= out.ndim() {
                return Err(BlockError::AxisOutOfBounds(axis, out.ndim()));
            }
            if out.shape()[axis] != 1 {
                return Err(BlockError::IncompatibleShapes(
                    out.shape().to_vec(),
                    vec![axis],
                ));
            }
            out = block_map!(out, x => x.index_axis_move(Axis(axis), 0));
        }
        Ok(out)
    }

    /// Reorder axes so that output axis `i` is input axis `axes[i]`.
    /// The result is in standard (row-major) layout.
    pub fn permute(&self, axes: &[usize]) -> Result<Self, BlockError> {
        let rank = self.ndim();
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        if sorted != (0..rank).collect::<Vec<_>>() {
            return Err(BlockError::IncompatibleShapes(
                self.shape().to_vec(),
                axes.to_vec(),
            ));
        }
        Ok(block_map!(self, x => x
            .clone()
            .permuted_axes(axes.to_vec())
            .as_standard_layout()
            .into_owned()
            .into_shared()))
    }

    /// Repeat axes of extent 1 to reach `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self, BlockError> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        let incompatible =
            || BlockError::IncompatibleShapes(self.shape().to_vec(), shape.to_vec());
        Ok(match self {
            Block::Logical(x) => {
                Block::Logical(x.broadcast(IxDyn(shape)).ok_or_else(incompatible)?.to_shared())
            }
            Block::Integer(x) => {
                Block::Integer(x.broadcast(IxDyn(shape)).ok_or_else(incompatible)?.to_shared())
            }
            Block::Real(x) => {
                Block::Real(x.broadcast(IxDyn(shape)).ok_or_else(incompatible)?.to_shared())
            }
            Block::Text(x) => {
                Block::Text(x.broadcast(IxDyn(shape)).ok_or_else(incompatible)?.to_shared())
            }
        })
    }

    /// Concatenate blocks of a common dtype along `axis`.
    pub fn concat(blocks: &[Block], axis: usize) -> Result<Self, BlockError> {
        let first = blocks.first().ok_or(BlockError::EmptyConcat)?;
        if axis >= first.ndim() {
            return Err(BlockError::AxisOutOfBounds(axis, first.ndim()));
        }
        Ok(match first {
            Block::Logical(_) => Block::Logical(ops::concat(axis, &collect_inner(blocks)?)?),
            Block::Integer(_) => Block::Integer(ops::concat(axis, &collect_inner(blocks)?)?),
            Block::Real(_) => Block::Real(ops::concat(axis, &collect_inner(blocks)?)?),
            Block::Text(_) => Block::Text(ops::concat(axis, &collect_inner(blocks)?)?),
        })
    }

    /// Overwrite the region selected by `viewport` with `source`.
    pub fn assign(&mut self, viewport: &Viewport, source: &Block) -> Result<(), BlockError> {
        if !viewport.is_within(self.shape()) || viewport.shape() != source.shape() {
            return Err(BlockError::IncompatibleShapes(
                viewport.lengths().to_vec(),
                source.shape().to_vec(),
            ));
        }
        let ranges = viewport.ranges();
        match (self, source) {
            (Block::Logical(x), Block::Logical(y)) => x
                .slice_each_axis_mut(|ax| Slice::from(ranges[ax.axis.index()].clone()))
                .assign(y),
            (Block::Integer(x), Block::Integer(y)) => x
                .slice_each_axis_mut(|ax| Slice::from(ranges[ax.axis.index()].clone()))
                .assign(y),
            (Block::Real(x), Block::Real(y)) => x
                .slice_each_axis_mut(|ax| Slice::from(ranges[ax.axis.index()].clone()))
                .assign(y),
            (Block::Text(x), Block::Text(y)) => x
                .slice_each_axis_mut(|ax| Slice::from(ranges[ax.axis.index()].clone()))
                .assign(y),
            (x, y) => return Err(BlockError::WrongDType(x.dtype(), y.dtype())),
        }
        Ok(())
    }

    pub fn cast(&self, dtype: DType) -> Result<Self, BlockError> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let from = self.dtype();
        Ok(match (self, dtype) {
            (Block::Logical(x), DType::Integer) => Block::Integer(x.mapv(i32::from).into_shared()),
            (Block::Logical(x), DType::Real) => {
                Block::Real(x.mapv(|v| if v { 1.0 } else { 0.0 }).into_shared())
            }
            (Block::Integer(x), DType::Logical) => Block::Logical(x.mapv(|v| v != 0).into_shared()),
            (Block::Integer(x), DType::Real) => Block::Real(x.mapv(f64::from).into_shared()),
            (Block::Real(x), DType::Logical) => Block::Logical(x.mapv(|v| v != 0.0).into_shared()),
            (Block::Real(x), DType::Integer) => Block::Integer(ops::try_map(x, |&v| {
                let t = v.trunc();
                if t.is_finite() && t >= i32::MIN as f64 && t <= i32::MAX as f64 {
                    Ok(t as i32)
                } else {
                    Err(BlockError::InvalidCast {
                        from,
                        to: dtype,
                        value: v.to_string(),
                    })
                }
            })?),
            (Block::Logical(x), DType::Text) => Block::Text(
                x.map(|&v| if v { "TRUE" } else { "FALSE" }.to_string())
                    .into_shared(),
            ),
            (Block::Integer(x), DType::Text) => Block::Text(x.map(|v| v.to_string()).into_shared()),
            (Block::Real(x), DType::Text) => Block::Text(x.map(|v| v.to_string()).into_shared()),
            (Block::Text(x), DType::Logical) => Block::Logical(ops::try_map(x, |v| {
                match v.as_str() {
                    "TRUE" | "true" | "T" => Ok(true),
                    "FALSE" | "false" | "F" => Ok(false),
                    _ => Err(BlockError::InvalidCast {
                        from,
                        to: dtype,
                        value: v.clone(),
                    }),
                }
            })?),
            (Block::Text(x), DType::Integer) => Block::Integer(ops::try_map(x, |v| {
                v.trim().parse::<i32>().map_err(|_| BlockError::InvalidCast {
                    from,
                    to: dtype,
                    value: v.clone(),
                })
            })?),
            (Block::Text(x), DType::Real) => Block::Real(ops::try_map(x, |v| {
                v.trim().parse::<f64>().map_err(|_| BlockError::InvalidCast {
                    from,
                    to: dtype,
                    value: v.clone(),
                })
            })?),
            (x, _) => unreachable!("same-dtype cast of {} handled above", x.dtype()),
        })
    }
}

fn collect_inner<T: BlockElement>(
    blocks: &[Block],
) -> Result<Vec<ArcArray<T, IxDyn>>, BlockError> {
    blocks
        .iter()
        .map(|b| T::block_inner(b).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_6x4() -> Block {
        let v: Vec<i32> = (0..6)
            .flat_map(|r| (0..4).map(move |c| r * 10 + c))
            .collect();
        Block::from_vec_shape(v, &[6, 4]).unwrap()
    }

    #[test]
    fn test_slice() {
        let b = grid_6x4();
        let s = b
            .slice(&Viewport::from_ranges(&[2..4, 2..4]))
            .unwrap();
        assert_eq!(s.to_vec::<i32>().unwrap(), vec![22, 23, 32, 33]);
        assert_eq!(s.shape(), &[2, 2]);
    }

    #[test]
    fn test_select_repeats() {
        let b = grid_6x4();
        let s = b.select(1, &[3, 0, 0]).unwrap();
        assert_eq!(s.shape(), &[6, 3]);
        assert_eq!(&s.to_vec::<i32>().unwrap()[..3], &[3, 0, 0]);
    }

    #[test]
    fn test_permute_and_remove_axes() {
        let b = Block::from_vec_shape((0..6).collect::<Vec<i32>>(), &[2, 1, 3]).unwrap();
        let squeezed = b.remove_axes(&[1]).unwrap();
        assert_eq!(squeezed.shape(), &[2, 3]);
        let t = squeezed.permute(&[1, 0]).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.to_vec::<i32>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
        assert!(b.remove_axes(&[0]).is_err());
    }

    #[test]
    fn test_assign_region() {
        let mut target = Block::zeros(DType::Integer, &[2, 3]);
        let src = Block::from_vec_shape(vec![7, 8], &[1, 2]).unwrap();
        target
            .assign(&Viewport::from_ranges(&[1..2, 1..3]), &src)
            .unwrap();
        assert_eq!(target.to_vec::<i32>().unwrap(), vec![0, 0, 0, 0, 7, 8]);
        let wrong = Block::from_vec_shape(vec![1.0], &[1, 1]).unwrap();
        assert!(target
            .assign(&Viewport::from_ranges(&[0..1, 0..1]), &wrong)
            .is_err());
    }

    #[test]
    fn test_cast() {
        let b = Block::from_vec_shape(vec![1.9, -2.5], &[2]).unwrap();
        assert_eq!(
            b.cast(DType::Integer).unwrap().to_vec::<i32>().unwrap(),
            vec![1, -2]
        );
        let t = Block::from_vec_shape(vec!["3".to_string(), "x".to_string()], &[2]).unwrap();
        assert!(matches!(
            t.cast(DType::Integer),
            Err(BlockError::InvalidCast { .. })
        ));
        let nan = Block::from_vec_shape(vec![f64::NAN], &[1]).unwrap();
        assert!(nan.cast(DType::Integer).is_err());
    }

    #[test]
    fn test_broadcast_and_concat() {
        let row = Block::from_vec_shape(vec![1, 2, 3], &[1, 3]).unwrap();
        let b = row.broadcast_to(&[2, 3]).unwrap();
        assert_eq!(b.to_vec::<i32>().unwrap(), vec![1, 2, 3, 1, 2, 3]);
        let c = Block::concat(&[row.clone(), b], 0).unwrap();
        assert_eq!(c.shape(), &[3, 3]);
        let mixed = Block::from_vec_shape(vec![1.0, 2.0, 3.0], &[1, 3]).unwrap();
        assert!(Block::concat(&[row, mixed], 0).is_err());
    }
}
