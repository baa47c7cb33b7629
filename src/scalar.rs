use crate::dtype::DType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Logical(bool),
    Integer(i32),
    Real(f64),
    Text(String),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Logical(_) => DType::Logical,
            Scalar::Integer(_) => DType::Integer,
            Scalar::Real(_) => DType::Real,
            Scalar::Text(_) => DType::Text,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Scalar::Logical(x) => !*x,
            Scalar::Integer(x) => *x == 0,
            Scalar::Real(x) => *x == 0.0,
            Scalar::Text(_) => false,
        }
    }

    pub fn is_one(&self) -> bool {
        match self {
            Scalar::Logical(x) => *x,
            Scalar::Integer(x) => *x == 1,
            Scalar::Real(x) => *x == 1.0,
            Scalar::Text(_) => false,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Logical(x) => write!(f, "{}", if *x { "TRUE" } else { "FALSE" }),
            Scalar::Integer(x) => write!(f, "{x}L"),
            Scalar::Real(x) => write!(f, "{x}"),
            Scalar::Text(x) => write!(f, "{x:?}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Logical(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Real(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}
