use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LabelsError {
    #[error("Labels have rank {0} but the array has rank {1}")]
    RankMismatch(usize, usize),
    #[error("Dimension {axis} has {names} names but extent {extent}")]
    LengthMismatch {
        axis: usize,
        names: usize,
        extent: usize,
    },
}

/// Optional names along each dimension of an array.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Labels(pub Vec<Option<Vec<String>>>);

impl Labels {
    pub fn new(dims: Vec<Option<Vec<String>>>) -> Self {
        Self(dims)
    }

    /// Labels with no names on any of `rank` dimensions.
    pub fn unnamed(rank: usize) -> Self {
        Self(vec![None; rank])
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn dim(&self, axis: usize) -> Option<&[String]> {
        self.0.get(axis).and_then(|d| d.as_deref())
    }

    pub fn is_unnamed(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn validate(&self, shape: &[usize]) -> Result<(), LabelsError> {
        if self.ndim() != shape.len() {
            return Err(LabelsError::RankMismatch(self.ndim(), shape.len()));
        }
        for (axis, (names, &extent)) in self.0.iter().zip(shape).enumerate() {
            if let Some(names) = names {
                if names.len() != extent {
                    return Err(LabelsError::LengthMismatch {
                        axis,
                        names: names.len(),
                        extent,
                    });
                }
            }
        }
        Ok(())
    }

    /// Pick the names at `positions` along `axis`.
    pub fn select(&self, axis: usize, positions: &[usize]) -> Self {
        let mut out = self.clone();
        if let Some(Some(names)) = out.0.get_mut(axis) {
            *names = positions.iter().map(|&i| names[i].clone()).collect();
        }
        out
    }

    /// Output dimension `i` takes the names of input dimension `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Self {
        Self(perm.iter().map(|&i| self.0[i].clone()).collect())
    }

    /// Join labels along `axis`. Names along `axis` survive only when every
    /// part carries them; other dimensions take the first part that has names.
    pub fn bind(parts: &[&Labels], axis: usize) -> Option<Self> {
        let first = parts.first()?;
        let rank = first.ndim();
        let mut out = Vec::with_capacity(rank);
        for d in 0..rank {
            if d == axis {
                let joined: Option<Vec<Vec<String>>> =
                    parts.iter().map(|p| p.0[d].clone()).collect();
                out.push(joined.map(|v| v.concat()));
            } else {
                out.push(parts.iter().find_map(|p| p.0[d].clone()));
            }
        }
        let labels = Self(out);
        if labels.is_unnamed() { None } else { Some(labels) }
    }
}

impl From<Vec<Option<Vec<String>>>> for Labels {
    fn from(value: Vec<Option<Vec<String>>>) -> Self {
        Self(value)
    }
}
