use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DTypeError {
    #[error("Unknown dtype {0:?}")]
    UnknownDType(String),
    #[error("No common dtype for {0} and {1}")]
    NoCommonDType(DType, DType),
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Logical,
    Integer,
    Real,
    Text,
}

impl DType {
    /// Bytes per element held in memory. Text counts the `String` header only.
    pub fn size(&self) -> usize {
        match self {
            DType::Logical => size_of::<bool>(),
            DType::Integer => size_of::<i32>(),
            DType::Real => size_of::<f64>(),
            DType::Text => size_of::<String>(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Logical | DType::Integer | DType::Real)
    }

    /// The dtype both operands are promoted to by arithmetic.
    /// Logical operands are promoted to Integer.
    pub fn arithmetic_promotion(a: DType, b: DType) -> Result<DType, DTypeError> {
        if !a.is_numeric() || !b.is_numeric() {
            return Err(DTypeError::NoCommonDType(a, b));
        }
        Ok(a.max(b).max(DType::Integer))
    }

    /// The dtype both operands are promoted to before comparison.
    pub fn comparison_promotion(a: DType, b: DType) -> Result<DType, DTypeError> {
        match (a, b) {
            (DType::Text, DType::Text) => Ok(DType::Text),
            (DType::Text, _) | (_, DType::Text) => Err(DTypeError::NoCommonDType(a, b)),
            _ => Ok(a.max(b)),
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::Logical => write!(f, "Logical"),
            DType::Integer => write!(f, "Integer"),
            DType::Real => write!(f, "Real"),
            DType::Text => write!(f, "Text"),
        }
    }
}

impl std::str::FromStr for DType {
    type Err = DTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "logical" | "bool" => DType::Logical,
            "integer" | "int" | "i32" => DType::Integer,
            "real" | "double" | "f64" => DType::Real,
            "text" | "character" | "string" => DType::Text,
            _ => Err(DTypeError::UnknownDType(s.to_string()))?,
        })
    }
}

pub trait DTypeOfPrimitive {
    const DTYPE: DType;
}

impl DTypeOfPrimitive for bool {
    const DTYPE: DType = DType::Logical;
}
impl DTypeOfPrimitive for i32 {
    const DTYPE: DType = DType::Integer;
}
impl DTypeOfPrimitive for f64 {
    const DTYPE: DType = DType::Real;
}
impl DTypeOfPrimitive for String {
    const DTYPE: DType = DType::Text;
}
