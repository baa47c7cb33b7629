//! Elementwise kernels over [`Block`]s.
//!
//! Binary kernels expect operands of identical shape; broadcasting happens
//! before they are called.

use crate::block::{Block, BlockError};
use crate::dtype::DType;
use crate::scalar::Scalar;
use ndarray::{concatenate, ArcArray, ArrayD, ArrayViewD, Axis, IxDyn};
use num_traits::{Float, PrimInt};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Pow => "^",
        }
    }

    /// Result dtype for operands of dtype `a` and `b`.
    pub fn output_dtype(&self, a: DType, b: DType) -> Result<DType, BlockError> {
        let promoted = DType::arithmetic_promotion(a, b)?;
        Ok(match self {
            ArithOp::Div | ArithOp::Pow => DType::Real,
            _ => promoted,
        })
    }

    fn apply_real(&self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Pow => a.powf(b),
        }
    }

    fn apply_int<T: PrimInt>(&self, a: T, b: T) -> Option<T> {
        match self {
            ArithOp::Add => a.checked_add(&b),
            ArithOp::Sub => a.checked_sub(&b),
            ArithOp::Mul => a.checked_mul(&b),
            ArithOp::Div | ArithOp::Pow => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn apply<T: PartialOrd>(&self, a: &T, b: &T) -> bool {
        match self {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MathOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
}

impl MathOp {
    pub fn output_dtype(&self, input: DType) -> Result<DType, BlockError> {
        if !input.is_numeric() {
            return Err(BlockError::UnsupportedOperationForDTypes(
                self.to_string(),
                vec![input],
            ));
        }
        Ok(match self {
            MathOp::Neg | MathOp::Abs => input.max(DType::Integer),
            MathOp::Sqrt | MathOp::Exp | MathOp::Log => DType::Real,
        })
    }

    fn apply_real<T: Float>(&self, x: T) -> T {
        match self {
            MathOp::Neg => -x,
            MathOp::Abs => x.abs(),
            MathOp::Sqrt => x.sqrt(),
            MathOp::Exp => x.exp(),
            MathOp::Log => x.ln(),
        }
    }
}

/// Map `f` over every element, stopping at the first error.
pub(crate) fn try_map<A, B, F>(
    a: &ArcArray<A, IxDyn>,
    f: F,
) -> Result<ArcArray<B, IxDyn>, BlockError>
where
    F: FnMut(&A) -> Result<B, BlockError>,
{
    let v = a.iter().map(f).collect::<Result<Vec<_>, _>>()?;
    Ok(ArcArray::from_shape_vec(a.raw_dim(), v)?)
}

/// Combine two equally shaped arrays elementwise, stopping at the first error.
fn try_zip<A, B, O, F>(
    a: &ArcArray<A, IxDyn>,
    b: &ArcArray<B, IxDyn>,
    mut f: F,
) -> Result<ArcArray<O, IxDyn>, BlockError>
where
    F: FnMut(&A, &B) -> Result<O, BlockError>,
{
    if a.shape() != b.shape() {
        return Err(BlockError::IncompatibleShapes(
            a.shape().to_vec(),
            b.shape().to_vec(),
        ));
    }
    let v = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f(x, y))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ArcArray::from_shape_vec(a.raw_dim(), v)?)
}

/// Concatenate `inputs` along `dim`.
///
/// # Errors
/// - if `inputs` is empty
/// - if any input has a different rank or mismatched shape off `dim`
/// - if `dim` is out of bounds
pub fn concat<T: Clone>(
    dim: usize,
    inputs: &[ArcArray<T, IxDyn>],
) -> Result<ArcArray<T, IxDyn>, BlockError> {
    // 1) Must have at least one input
    let first = inputs.first().ok_or(BlockError::EmptyConcat)?;
    let rank = first.ndim();
    if dim >= rank {
        return Err(BlockError::AxisOutOfBounds(dim, rank));
    }

    // 2) Every input must agree off `dim`
    for arr in inputs {
        let agrees = arr.ndim() == rank
            && (0..rank).all(|d| d == dim || arr.shape()[d] == first.shape()[d]);
        if !agrees {
            return Err(BlockError::IncompatibleShapes(
                first.shape().to_vec(),
                arr.shape().to_vec(),
            ));
        }
    }

    // 3) Concatenate views
    let views: Vec<ArrayViewD<T>> = inputs.iter().map(|a| a.view()).collect();
    let concatenated: ArrayD<T> = concatenate(Axis(dim), &views)?;
    Ok(concatenated.into_shared())
}

/// Elementwise arithmetic between two blocks of identical shape.
///
/// # Errors
/// - `UnsupportedOperationForDTypes` if either operand is Text
/// - `IntegerOverflow` if an Integer result does not fit in `i32`
pub fn arith(op: ArithOp, a: &Block, b: &Block) -> Result<Block, BlockError> {
    let out = op.output_dtype(a.dtype(), b.dtype()).map_err(|_| {
        BlockError::UnsupportedOperationForDTypes(op.to_string(), vec![a.dtype(), b.dtype()])
    })?;
    let a = a.cast(out)?;
    let b = b.cast(out)?;
    Ok(match (&a, &b) {
        (Block::Real(x), Block::Real(y)) => {
            Block::Real(try_zip(x, y, |x, y| Ok(op.apply_real(*x, *y)))?)
        }
        (Block::Integer(x), Block::Integer(y)) => Block::Integer(try_zip(x, y, |x, y| {
            op.apply_int(*x, *y)
                .ok_or_else(|| BlockError::IntegerOverflow(format!("{x} {} {y}", op.symbol())))
        })?),
        _ => Err(BlockError::UnsupportedOperationForDTypes(
            op.to_string(),
            vec![a.dtype(), b.dtype()],
        ))?,
    })
}

/// Arithmetic between a block and a scalar; `scalar_first` puts the scalar on
/// the left of the operator.
pub fn arith_scalar(
    op: ArithOp,
    block: &Block,
    scalar: &Scalar,
    scalar_first: bool,
) -> Result<Block, BlockError> {
    let s = Block::filled(scalar, block.shape());
    if scalar_first {
        arith(op, &s, block)
    } else {
        arith(op, block, &s)
    }
}

/// Elementwise minimum or maximum of two blocks.
pub fn extremum(maximum: bool, a: &Block, b: &Block) -> Result<Block, BlockError> {
    let name = if maximum { "pmax" } else { "pmin" };
    let out = DType::arithmetic_promotion(a.dtype(), b.dtype()).map_err(|_| {
        BlockError::UnsupportedOperationForDTypes(name.to_string(), vec![a.dtype(), b.dtype()])
    })?;
    let a = a.cast(out)?;
    let b = b.cast(out)?;
    Ok(match (&a, &b) {
        (Block::Real(x), Block::Real(y)) => Block::Real(try_zip(x, y, |x, y| {
            Ok(if maximum { x.max(*y) } else { x.min(*y) })
        })?),
        (Block::Integer(x), Block::Integer(y)) => Block::Integer(try_zip(x, y, |x, y| {
            Ok(if maximum { *x.max(y) } else { *x.min(y) })
        })?),
        _ => Err(BlockError::UnsupportedOperationForDTypes(
            name.to_string(),
            vec![a.dtype(), b.dtype()],
        ))?,
    })
}

/// Elementwise comparison. Text compares lexically, everything else
/// numerically.
pub fn compare(op: CompareOp, a: &Block, b: &Block) -> Result<Block, BlockError> {
    let common = DType::comparison_promotion(a.dtype(), b.dtype()).map_err(|_| {
        BlockError::UnsupportedOperationForDTypes(op.to_string(), vec![a.dtype(), b.dtype()])
    })?;
    let out = match common {
        DType::Text => try_zip(a.as_inner::<String>()?, b.as_inner::<String>()?, |x, y| {
            Ok(op.apply(x, y))
        })?,
        _ => {
            let a = a.cast(DType::Real)?;
            let b = b.cast(DType::Real)?;
            try_zip(a.as_inner::<f64>()?, b.as_inner::<f64>()?, |x, y| Ok(op.apply(x, y)))?
        }
    };
    Ok(Block::Logical(out))
}

pub fn compare_scalar(op: CompareOp, block: &Block, scalar: &Scalar) -> Result<Block, BlockError> {
    compare(op, block, &Block::filled(scalar, block.shape()))
}

/// Elementwise `&&` or `||` over numeric operands, nonzero meaning true.
pub fn logical(and: bool, a: &Block, b: &Block) -> Result<Block, BlockError> {
    let name = if and { "and" } else { "or" };
    if !a.dtype().is_numeric() || !b.dtype().is_numeric() {
        return Err(BlockError::UnsupportedOperationForDTypes(
            name.to_string(),
            vec![a.dtype(), b.dtype()],
        ));
    }
    let a = a.cast(DType::Logical)?;
    let b = b.cast(DType::Logical)?;
    Ok(Block::Logical(try_zip(
        a.as_inner::<bool>()?,
        b.as_inner::<bool>()?,
        |x, y| Ok(if and { *x && *y } else { *x || *y }),
    )?))
}

pub fn not(a: &Block) -> Result<Block, BlockError> {
    if !a.dtype().is_numeric() {
        return Err(BlockError::UnsupportedOperationForDTypes(
            "not".to_string(),
            vec![a.dtype()],
        ));
    }
    let a = a.cast(DType::Logical)?;
    Ok(Block::Logical(a.as_inner::<bool>()?.mapv(|x| !x).into_shared()))
}

pub fn math(op: MathOp, a: &Block) -> Result<Block, BlockError> {
    let out = op.output_dtype(a.dtype())?;
    let a = a.cast(out)?;
    Ok(match &a {
        Block::Real(x) => Block::Real(x.mapv(|v| op.apply_real(v)).into_shared()),
        Block::Integer(x) => Block::Integer(try_map(x, |v| {
            let r = match op {
                MathOp::Neg => v.checked_neg(),
                _ => v.checked_abs(),
            };
            r.ok_or_else(|| BlockError::IntegerOverflow(format!("{op}({v})")))
        })?),
        _ => Err(BlockError::UnsupportedOperationForDTypes(
            op.to_string(),
            vec![a.dtype()],
        ))?,
    })
}
