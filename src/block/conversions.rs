use crate::block::{Block, BlockError};
use crate::dtype::DTypeOfPrimitive;
use crate::scalar::Scalar;
use ndarray::{ArcArray, IxDyn};

/// Element types a [`Block`] can hold.
pub trait BlockElement: Sized + DTypeOfPrimitive + Clone {
    fn block_from_vec_shape(v: Vec<Self>, shape: &[usize]) -> Result<Block, BlockError>;
    fn block_inner(block: &Block) -> Result<&ArcArray<Self, IxDyn>, BlockError>;
}

impl Block {
    pub fn from_vec_shape<T: BlockElement>(v: Vec<T>, shape: &[usize]) -> Result<Self, BlockError> {
        T::block_from_vec_shape(v, shape)
    }

    pub fn as_inner<T: BlockElement>(&self) -> Result<&ArcArray<T, IxDyn>, BlockError> {
        T::block_inner(self)
    }

    /// Elements in row-major order.
    pub fn to_vec<T: BlockElement>(&self) -> Result<Vec<T>, BlockError> {
        Ok(T::block_inner(self)?.iter().cloned().collect())
    }

    /// A block of `shape` with every element equal to `scalar`.
    pub fn filled(scalar: &Scalar, shape: &[usize]) -> Self {
        let dim = IxDyn(shape);
        match scalar {
            Scalar::Logical(x) => Block::Logical(ArcArray::from_elem(dim, *x)),
            Scalar::Integer(x) => Block::Integer(ArcArray::from_elem(dim, *x)),
            Scalar::Real(x) => Block::Real(ArcArray::from_elem(dim, *x)),
            Scalar::Text(x) => Block::Text(ArcArray::from_elem(dim, x.clone())),
        }
    }
}

macro_rules! impl_block_element {
    ($a:ident, $b:ident) => {
        impl BlockElement for $a {
            fn block_from_vec_shape(v: Vec<Self>, shape: &[usize]) -> Result<Block, BlockError> {
                Ok(Block::$b(ArcArray::from_shape_vec(IxDyn(shape), v)?))
            }

            fn block_inner(block: &Block) -> Result<&ArcArray<Self, IxDyn>, BlockError> {
                if let Block::$b(x) = block {
                    Ok(x)
                } else {
                    Err(BlockError::WrongDType(Self::DTYPE, block.dtype()))
                }
            }
        }
    };
}

impl_block_element!(bool, Logical);
impl_block_element!(i32, Integer);
impl_block_element!(f64, Real);
impl_block_element!(String, Text);
