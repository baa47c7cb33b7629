use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::Range;

/// A rectangular region of an index space, stored as one `(offset, length)`
/// pair per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ViewportParts")]
pub struct Viewport {
    offsets: Vec<usize>,
    lengths: Vec<usize>,
}

#[derive(Deserialize)]
struct ViewportParts {
    offsets: Vec<usize>,
    lengths: Vec<usize>,
}

impl TryFrom<ViewportParts> for Viewport {
    type Error = String;

    fn try_from(parts: ViewportParts) -> Result<Self, Self::Error> {
        if parts.offsets.len() != parts.lengths.len() {
            return Err(format!(
                "viewport has {} offsets but {} lengths",
                parts.offsets.len(),
                parts.lengths.len()
            ));
        }
        Ok(Self {
            offsets: parts.offsets,
            lengths: parts.lengths,
        })
    }
}

impl Viewport {
    pub(crate) fn new(offsets: Vec<usize>, lengths: Vec<usize>) -> Self {
        debug_assert_eq!(offsets.len(), lengths.len(), "viewport rank mismatch");
        Self { offsets, lengths }
    }

    pub fn from_ranges(ranges: &[Range<usize>]) -> Self {
        Self {
            offsets: ranges.iter().map(|r| r.start).collect(),
            lengths: ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect(),
        }
    }

    /// The viewport spanning all of `shape`.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            offsets: vec![0; shape.len()],
            lengths: shape.to_vec(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.offsets.len()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// The shape of the block this viewport selects.
    pub fn shape(&self) -> &[usize] {
        &self.lengths
    }

    pub fn offset(&self, axis: usize) -> usize {
        self.offsets[axis]
    }

    pub fn length(&self, axis: usize) -> usize {
        self.lengths[axis]
    }

    pub fn end(&self, axis: usize) -> usize {
        self.offsets[axis] + self.lengths[axis]
    }

    pub fn range(&self, axis: usize) -> Range<usize> {
        self.offsets[axis]..self.end(axis)
    }

    pub fn ranges(&self) -> Vec<Range<usize>> {
        (0..self.ndim()).map(|axis| self.range(axis)).collect()
    }

    pub fn num_elements(&self) -> usize {
        self.lengths.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }

    pub fn is_within(&self, shape: &[usize]) -> bool {
        shape.len() == self.ndim()
            && (0..self.ndim()).all(|axis| self.end(axis) <= shape[axis])
    }

    /// Two viewports overlap when they share at least one index position.
    pub fn overlaps(&self, other: &Viewport) -> bool {
        if self.ndim() != other.ndim() || self.is_empty() || other.is_empty() {
            return false;
        }
        (0..self.ndim()).all(|axis| {
            self.offsets[axis] < other.end(axis) && other.offsets[axis] < self.end(axis)
        })
    }

    /// Replace the range along `axis`, keeping every other dimension.
    pub fn with_axis(&self, axis: usize, offset: usize, length: usize) -> Self {
        let mut out = self.clone();
        out.offsets[axis] = offset;
        out.lengths[axis] = length;
        out
    }
}

impl Display for Viewport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for axis in 0..self.ndim() {
            if axis > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", self.offsets[axis], self.end(axis))?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap() {
        let a = Viewport::from_ranges(&[0..2, 0..2]);
        let b = Viewport::from_ranges(&[1..3, 1..3]);
        let c = Viewport::from_ranges(&[2..4, 0..2]);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_within_and_display() {
        let v = Viewport::from_ranges(&[2..4, 2..4]);
        assert!(v.is_within(&[6, 4]));
        assert!(!v.is_within(&[6, 3]));
        assert_eq!(v.to_string(), "[2..4, 2..4]");
        assert_eq!(v.num_elements(), 4);
    }

    #[test]
    fn test_deserialize_checks_rank() {
        let v: Viewport = serde_json::from_str(r#"{"offsets":[1,0],"lengths":[2,3]}"#).unwrap();
        assert_eq!(v, Viewport::new(vec![1, 0], vec![2, 3]));
        assert!(serde_json::from_str::<Viewport>(r#"{"offsets":[1],"lengths":[2,3]}"#).is_err());
    }
}
