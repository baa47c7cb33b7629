use crate::block::ops::{self as kernels, ArithOp, CompareOp, MathOp};
use crate::block::{Block, BlockError};
use crate::dtype::DType;
use crate::graph::GraphError;
use crate::scalar::Scalar;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Range;
use std::sync::Arc;

/// Selection along one dimension of a subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSelector {
    All,
    Range(Range<usize>),
    /// Arbitrary positions; may reorder or repeat.
    Indices(Vec<usize>),
}

/// Where an output range of a subset comes from in its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParentRange {
    Contiguous(Range<usize>),
    /// Fetch `bounds`, then gather `positions` (relative to `bounds.start`).
    Gather {
        bounds: Range<usize>,
        positions: Vec<usize>,
    },
}

impl IndexSelector {
    /// Output extent, checking every index against the parent extent.
    pub(crate) fn output_len(&self, axis: usize, extent: usize) -> Result<usize, GraphError> {
        match self {
            IndexSelector::All => Ok(extent),
            IndexSelector::Range(r) => {
                if r.start > r.end || r.end > extent {
                    return Err(GraphError::IndexOutOfBounds {
                        axis,
                        index: r.end.max(r.start),
                        extent,
                    });
                }
                Ok(r.end - r.start)
            }
            IndexSelector::Indices(idx) => {
                if let Some(&index) = idx.iter().find(|&&i| i >= extent) {
                    return Err(GraphError::IndexOutOfBounds {
                        axis,
                        index,
                        extent,
                    });
                }
                Ok(idx.len())
            }
        }
    }

    /// True when the selector picks every position in order.
    pub fn is_full(&self, extent: usize) -> bool {
        match self {
            IndexSelector::All => true,
            IndexSelector::Range(r) => r.start == 0 && r.end == extent,
            IndexSelector::Indices(idx) => {
                idx.len() == extent && idx.iter().enumerate().all(|(i, &x)| i == x)
            }
        }
    }

    /// Parent positions selected, in output order.
    pub(crate) fn positions(&self, extent: usize) -> Vec<usize> {
        match self {
            IndexSelector::All => (0..extent).collect(),
            IndexSelector::Range(r) => r.clone().collect(),
            IndexSelector::Indices(idx) => idx.clone(),
        }
    }

    /// Map the output range `offset..offset + length` back to the parent.
    pub(crate) fn parent_range(&self, offset: usize, length: usize) -> ParentRange {
        match self {
            IndexSelector::All => ParentRange::Contiguous(offset..offset + length),
            IndexSelector::Range(r) => {
                ParentRange::Contiguous(r.start + offset..r.start + offset + length)
            }
            IndexSelector::Indices(idx) => {
                let sel = &idx[offset..offset + length];
                let (Some(&lo), Some(&hi)) = (sel.iter().min(), sel.iter().max()) else {
                    return ParentRange::Contiguous(0..0);
                };
                if sel.windows(2).all(|w| w[1] == w[0] + 1) {
                    ParentRange::Contiguous(lo..hi + 1)
                } else {
                    ParentRange::Gather {
                        bounds: lo..hi + 1,
                        positions: sel.iter().map(|&i| i - lo).collect(),
                    }
                }
            }
        }
    }
}

impl Display for IndexSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexSelector::All => write!(f, ":"),
            IndexSelector::Range(r) => write!(f, "{}..{}", r.start, r.end),
            IndexSelector::Indices(idx) if idx.len() > 4 => {
                write!(f, "[{}, {}, ... {} indices]", idx[0], idx[1], idx.len())
            }
            IndexSelector::Indices(idx) => write!(f, "{idx:?}"),
        }
    }
}

/// A user supplied elementwise function with a declared output dtype.
#[derive(Clone)]
pub struct MapFn {
    pub name: String,
    pub output_dtype: DType,
    pub func: Arc<dyn Fn(&Block) -> Result<Block, BlockError> + Send + Sync>,
}

impl MapFn {
    pub fn new<F>(name: impl Into<String>, output_dtype: DType, func: F) -> Self
    where
        F: Fn(&Block) -> Result<Block, BlockError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            output_dtype,
            func: Arc::new(func),
        }
    }
}

impl Debug for MapFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapFn")
            .field("name", &self.name)
            .field("output_dtype", &self.output_dtype)
            .finish_non_exhaustive()
    }
}

/// Shape-preserving elementwise transform of one operand.
#[derive(Debug, Clone)]
pub enum UnaryOp {
    Arith {
        op: ArithOp,
        scalar: Scalar,
        scalar_first: bool,
    },
    Compare {
        op: CompareOp,
        scalar: Scalar,
    },
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Not,
    Cast(DType),
    Map(MapFn),
}

impl UnaryOp {
    fn math_op(&self) -> Option<MathOp> {
        match self {
            UnaryOp::Neg => Some(MathOp::Neg),
            UnaryOp::Abs => Some(MathOp::Abs),
            UnaryOp::Sqrt => Some(MathOp::Sqrt),
            UnaryOp::Exp => Some(MathOp::Exp),
            UnaryOp::Log => Some(MathOp::Log),
            _ => None,
        }
    }

    pub fn output_dtype(&self, input: DType) -> Result<DType, GraphError> {
        let mismatch = |types: Vec<DType>| GraphError::TypeMismatch(format!("{self} on {types:?}"));
        match self {
            UnaryOp::Arith { op, scalar, .. } => op
                .output_dtype(input, scalar.dtype())
                .map_err(|_| mismatch(vec![input, scalar.dtype()])),
            UnaryOp::Compare { scalar, .. } => DType::comparison_promotion(input, scalar.dtype())
                .map(|_| DType::Logical)
                .map_err(|_| mismatch(vec![input, scalar.dtype()])),
            UnaryOp::Not if input.is_numeric() => Ok(DType::Logical),
            UnaryOp::Not => Err(mismatch(vec![input])),
            UnaryOp::Cast(to) => Ok(*to),
            UnaryOp::Map(f) => Ok(f.output_dtype),
            _ => {
                let math = self.math_op().ok_or_else(|| mismatch(vec![input]))?;
                math.output_dtype(input).map_err(|_| mismatch(vec![input]))
            }
        }
    }

    pub fn apply(&self, block: &Block) -> Result<Block, BlockError> {
        match self {
            UnaryOp::Arith {
                op,
                scalar,
                scalar_first,
            } => kernels::arith_scalar(*op, block, scalar, *scalar_first),
            UnaryOp::Compare { op, scalar } => kernels::compare_scalar(*op, block, scalar),
            UnaryOp::Not => kernels::not(block),
            UnaryOp::Cast(to) => block.cast(*to),
            UnaryOp::Map(f) => (f.func)(block),
            _ => match self.math_op() {
                Some(math) => kernels::math(math, block),
                None => Err(BlockError::UnsupportedOperationForDTypes(
                    self.to_string(),
                    vec![block.dtype()],
                )),
            },
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Arith {
                op,
                scalar,
                scalar_first: true,
            } => write!(f, "{scalar} {} x", op.symbol()),
            UnaryOp::Arith { op, scalar, .. } => write!(f, "x {} {scalar}", op.symbol()),
            UnaryOp::Compare { op, scalar } => write!(f, "x {} {scalar}", op.symbol()),
            UnaryOp::Cast(to) => write!(f, "cast({to})"),
            UnaryOp::Map(m) => write!(f, "map({})", m.name),
            UnaryOp::Not => write!(f, "!x"),
            _ => match self.math_op() {
                Some(math) => write!(f, "{math}(x)"),
                None => write!(f, "{self:?}"),
            },
        }
    }
}

/// Elementwise combination of several operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaryOp {
    Arith(ArithOp),
    Compare(CompareOp),
    And,
    Or,
    Pmin,
    Pmax,
}

impl NaryOp {
    /// Operators that take exactly two operands.
    pub fn is_binary_only(&self) -> bool {
        matches!(
            self,
            NaryOp::Arith(ArithOp::Sub | ArithOp::Div | ArithOp::Pow) | NaryOp::Compare(_)
        )
    }

    pub(crate) fn check_arity(&self, n: usize) -> Result<(), GraphError> {
        let ok = if self.is_binary_only() { n == 2 } else { n >= 2 };
        if ok {
            Ok(())
        } else {
            Err(GraphError::ShapeMismatch(format!(
                "{self} cannot take {n} operands"
            )))
        }
    }

    fn step_dtype(&self, a: DType, b: DType) -> Result<DType, BlockError> {
        Ok(match self {
            NaryOp::Arith(op) => op.output_dtype(a, b)?,
            NaryOp::Compare(_) => {
                DType::comparison_promotion(a, b)?;
                DType::Logical
            }
            NaryOp::And | NaryOp::Or => {
                if !a.is_numeric() || !b.is_numeric() {
                    return Err(BlockError::UnsupportedOperationForDTypes(
                        self.to_string(),
                        vec![a, b],
                    ));
                }
                DType::Logical
            }
            NaryOp::Pmin | NaryOp::Pmax => DType::arithmetic_promotion(a, b)?,
        })
    }

    pub fn output_dtype(&self, inputs: &[DType]) -> Result<DType, GraphError> {
        let (first, rest) = inputs
            .split_first()
            .ok_or_else(|| GraphError::ShapeMismatch(format!("{self} without operands")))?;
        rest.iter().try_fold(*first, |acc, &d| {
            self.step_dtype(acc, d)
                .map_err(|_| GraphError::TypeMismatch(format!("{self} on {inputs:?}")))
        })
    }

    fn step(&self, a: &Block, b: &Block) -> Result<Block, BlockError> {
        match self {
            NaryOp::Arith(op) => kernels::arith(*op, a, b),
            NaryOp::Compare(op) => kernels::compare(*op, a, b),
            NaryOp::And => kernels::logical(true, a, b),
            NaryOp::Or => kernels::logical(false, a, b),
            NaryOp::Pmin => kernels::extremum(false, a, b),
            NaryOp::Pmax => kernels::extremum(true, a, b),
        }
    }

    /// Fold the operands left to right. All blocks must share one shape.
    pub fn apply(&self, blocks: &[Block]) -> Result<Block, BlockError> {
        let (first, rest) = blocks.split_first().ok_or(BlockError::EmptyConcat)?;
        rest.iter()
            .try_fold(first.clone(), |acc, b| self.step(&acc, b))
    }
}

impl Display for NaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NaryOp::Arith(op) => write!(f, "{}", op.symbol()),
            NaryOp::Compare(op) => write!(f, "{}", op.symbol()),
            NaryOp::And => write!(f, "&"),
            NaryOp::Or => write!(f, "|"),
            NaryOp::Pmin => write!(f, "pmin"),
            NaryOp::Pmax => write!(f, "pmax"),
        }
    }
}
