//! The delayed-operation graph.
//!
//! Every node is immutable and shared through `Arc`. Constructors check
//! shapes and element types eagerly but never touch data; data is only read
//! by [`resolve`].

pub mod ops;
mod resolve;

use crate::block::BlockError;
use crate::dtype::DType;
use crate::labels::Labels;
use crate::seed::{Seed, SeedError};
use crate::viewport::Viewport;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

pub use ops::{IndexSelector, MapFn, NaryOp, UnaryOp};
pub use resolve::resolve;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Invalid permutation {0:?}")]
    InvalidPermutation(Vec<usize>),
    #[error("Index {index} out of bounds for dimension {axis} of extent {extent}")]
    IndexOutOfBounds {
        axis: usize,
        index: usize,
        extent: usize,
    },
    #[error("Viewport {viewport} is outside shape {shape:?}")]
    OutOfRange { viewport: Viewport, shape: Vec<usize> },
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Block(#[from] BlockError),
}

#[derive(Debug, Clone)]
pub enum DelayedOp {
    Leaf(Arc<dyn Seed>),
    Subset {
        parent: Arc<DelayedNode>,
        selectors: Vec<IndexSelector>,
    },
    /// Output dimension `i` is parent dimension `perm[i]`; the parent
    /// dimensions in `drop` have extent 1 and disappear.
    Aperm {
        parent: Arc<DelayedNode>,
        perm: Vec<usize>,
        drop: Vec<usize>,
    },
    Unary {
        parent: Arc<DelayedNode>,
        op: UnaryOp,
    },
    Nary {
        parents: Vec<Arc<DelayedNode>>,
        op: NaryOp,
    },
    SetLabels {
        parent: Arc<DelayedNode>,
        labels: Option<Labels>,
    },
    Abind {
        parents: Vec<Arc<DelayedNode>>,
        axis: usize,
    },
}

#[derive(Debug)]
pub struct DelayedNode {
    op: DelayedOp,
    shape: Vec<usize>,
    dtype: DType,
    labels: Option<Labels>,
}

impl DelayedNode {
    pub fn op(&self) -> &DelayedOp {
        &self.op
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn labels(&self) -> Option<&Labels> {
        self.labels.as_ref()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn parents(&self) -> Vec<&Arc<DelayedNode>> {
        match &self.op {
            DelayedOp::Leaf(_) => vec![],
            DelayedOp::Subset { parent, .. }
            | DelayedOp::Aperm { parent, .. }
            | DelayedOp::Unary { parent, .. }
            | DelayedOp::SetLabels { parent, .. } => vec![parent],
            DelayedOp::Nary { parents, .. } | DelayedOp::Abind { parents, .. } => {
                parents.iter().collect()
            }
        }
    }

    pub fn leaf(seed: Arc<dyn Seed>) -> Arc<Self> {
        Arc::new(Self {
            shape: seed.shape().to_vec(),
            dtype: seed.dtype(),
            labels: seed.labels().cloned(),
            op: DelayedOp::Leaf(seed),
        })
    }

    /// # Errors
    /// - `ShapeMismatch` if there is not one selector per dimension
    /// - `IndexOutOfBounds` if a selector reaches past its dimension
    pub fn subset(
        parent: Arc<DelayedNode>,
        selectors: Vec<IndexSelector>,
    ) -> Result<Arc<Self>, GraphError> {
        if selectors.len() != parent.ndim() {
            return Err(GraphError::ShapeMismatch(format!(
                "{} selectors for rank {}",
                selectors.len(),
                parent.ndim()
            )));
        }
        let shape = selectors
            .iter()
            .zip(parent.shape())
            .enumerate()
            .map(|(axis, (sel, &extent))| sel.output_len(axis, extent))
            .collect::<Result<Vec<_>, _>>()?;
        let labels = parent.labels.as_ref().map(|labels| {
            selectors
                .iter()
                .zip(parent.shape())
                .enumerate()
                .fold(labels.clone(), |acc, (axis, (sel, &extent))| match sel {
                    IndexSelector::All => acc,
                    _ => acc.select(axis, &sel.positions(extent)),
                })
        });
        Ok(Arc::new(Self {
            dtype: parent.dtype,
            op: DelayedOp::Subset { parent, selectors },
            shape,
            labels,
        }))
    }

    /// # Errors
    /// - `InvalidPermutation` unless `perm` and `drop` together name every
    ///   parent dimension exactly once
    /// - `ShapeMismatch` if a dropped dimension has extent other than 1
    pub fn aperm(
        parent: Arc<DelayedNode>,
        perm: Vec<usize>,
        drop: Vec<usize>,
    ) -> Result<Arc<Self>, GraphError> {
        let rank = parent.ndim();
        let mut seen = vec![false; rank];
        for &d in perm.iter().chain(drop.iter()) {
            if d >= rank || seen[d] {
                return Err(GraphError::InvalidPermutation(perm.clone()));
            }
            seen[d] = true;
        }
        if seen.contains(&false) {
            return Err(GraphError::InvalidPermutation(perm));
        }
        if let Some(&d) = drop.iter().find(|&&d| parent.shape[d] != 1) {
            return Err(GraphError::ShapeMismatch(format!(
                "cannot drop dimension {d} of extent {}",
                parent.shape[d]
            )));
        }
        let shape = perm.iter().map(|&d| parent.shape[d]).collect();
        let labels = parent.labels.as_ref().map(|l| l.permute(&perm));
        Ok(Arc::new(Self {
            dtype: parent.dtype,
            op: DelayedOp::Aperm { parent, perm, drop },
            shape,
            labels,
        }))
    }

    /// # Errors
    /// - `TypeMismatch` if `op` does not accept the parent's dtype
    pub fn unary(parent: Arc<DelayedNode>, op: UnaryOp) -> Result<Arc<Self>, GraphError> {
        let dtype = op.output_dtype(parent.dtype)?;
        Ok(Arc::new(Self {
            shape: parent.shape.clone(),
            labels: parent.labels.clone(),
            op: DelayedOp::Unary { parent, op },
            dtype,
        }))
    }

    /// # Errors
    /// - `ShapeMismatch` if ranks differ, a dimension cannot broadcast, or
    ///   the operand count does not suit `op`
    /// - `TypeMismatch` if the operand dtypes do not combine under `op`
    pub fn nary(parents: Vec<Arc<DelayedNode>>, op: NaryOp) -> Result<Arc<Self>, GraphError> {
        op.check_arity(parents.len())?;
        let shape = broadcast_shape(&parents)?;
        let dtypes: Vec<DType> = parents.iter().map(|p| p.dtype).collect();
        let dtype = op.output_dtype(&dtypes)?;
        let labels = Labels::new(
            (0..shape.len())
                .map(|d| {
                    parents
                        .iter()
                        .filter(|p| p.shape[d] == shape[d])
                        .find_map(|p| p.labels().and_then(|l| l.dim(d)).map(<[String]>::to_vec))
                })
                .collect(),
        );
        Ok(Arc::new(Self {
            op: DelayedOp::Nary { parents, op },
            shape,
            dtype,
            labels: if labels.is_unnamed() { None } else { Some(labels) },
        }))
    }

    /// # Errors
    /// - `ShapeMismatch` if `labels` do not fit the parent shape
    pub fn set_labels(
        parent: Arc<DelayedNode>,
        labels: Option<Labels>,
    ) -> Result<Arc<Self>, GraphError> {
        if let Some(l) = &labels {
            l.validate(&parent.shape)
                .map_err(|e| GraphError::ShapeMismatch(e.to_string()))?;
        }
        Ok(Arc::new(Self {
            shape: parent.shape.clone(),
            dtype: parent.dtype,
            labels: labels.clone(),
            op: DelayedOp::SetLabels { parent, labels },
        }))
    }

    /// Bind `parents` along `axis`. Mixed dtypes bind at the widest of them.
    ///
    /// # Errors
    /// - `ShapeMismatch` if there are no parents, ranks differ, `axis` is out
    ///   of range or the parents disagree off `axis`
    pub fn abind(parents: Vec<Arc<DelayedNode>>, axis: usize) -> Result<Arc<Self>, GraphError> {
        let first = parents
            .first()
            .ok_or_else(|| GraphError::ShapeMismatch("abind of nothing".to_string()))?;
        let rank = first.ndim();
        if axis >= rank {
            return Err(GraphError::ShapeMismatch(format!(
                "axis {axis} out of range for rank {rank}"
            )));
        }
        let mut shape = first.shape.clone();
        shape[axis] = 0;
        for p in &parents {
            let agrees = p.ndim() == rank
                && (0..rank).all(|d| d == axis || p.shape[d] == first.shape[d]);
            if !agrees {
                return Err(GraphError::ShapeMismatch(format!(
                    "cannot bind {:?} to {:?} along {axis}",
                    p.shape, first.shape
                )));
            }
            shape[axis] += p.shape[axis];
        }
        let dtype = parents.iter().map(|p| p.dtype).max().unwrap_or(first.dtype);
        let part_labels: Vec<Labels> = parents
            .iter()
            .map(|p| p.labels.clone().unwrap_or_else(|| Labels::unnamed(rank)))
            .collect();
        let labels = Labels::bind(&part_labels.iter().collect::<Vec<_>>(), axis);
        Ok(Arc::new(Self {
            op: DelayedOp::Abind { parents, axis },
            shape,
            dtype,
            labels,
        }))
    }

    /// Physical chunking visible through this node, where operations keep the
    /// leaf's layout (elementwise ops, relabeling, permutations).
    pub fn native_chunk_shape(&self) -> Option<Vec<usize>> {
        match &self.op {
            DelayedOp::Leaf(seed) => seed.native_chunk_shape(),
            DelayedOp::Unary { parent, .. } | DelayedOp::SetLabels { parent, .. } => {
                parent.native_chunk_shape()
            }
            DelayedOp::Nary { parents, .. } => parents
                .iter()
                .filter(|p| p.shape == self.shape)
                .find_map(|p| p.native_chunk_shape()),
            DelayedOp::Aperm { parent, perm, .. } => parent
                .native_chunk_shape()
                .map(|chunk| perm.iter().map(|&d| chunk[d]).collect()),
            DelayedOp::Subset { .. } | DelayedOp::Abind { .. } => None,
        }
    }

    /// Length of the longest path from this node down to a leaf.
    pub fn depth(&self) -> usize {
        self.parents()
            .iter()
            .map(|p| p.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Every distinct seed reachable from this node, in first-visit order.
    pub fn seeds(&self) -> Vec<Arc<dyn Seed>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_seeds(&mut seen, &mut out);
        out
    }

    fn collect_seeds(&self, seen: &mut HashSet<*const ()>, out: &mut Vec<Arc<dyn Seed>>) {
        if let DelayedOp::Leaf(seed) = &self.op {
            if seen.insert(Arc::as_ptr(seed) as *const ()) {
                out.push(seed.clone());
            }
        }
        for p in self.parents() {
            p.collect_seeds(seen, out);
        }
    }

    /// One line per node, children indented beneath their consumer.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        let head = match &self.op {
            DelayedOp::Leaf(seed) => format!("Leaf <{}>", seed.backend_name()),
            DelayedOp::Subset { selectors, .. } => {
                let sels: Vec<String> = selectors.iter().map(|s| s.to_string()).collect();
                format!("Subset [{}]", sels.join(", "))
            }
            DelayedOp::Aperm { perm, drop, .. } if drop.is_empty() => format!("Aperm {perm:?}"),
            DelayedOp::Aperm { perm, drop, .. } => format!("Aperm {perm:?} drop {drop:?}"),
            DelayedOp::Unary { op, .. } => format!("Unary {op}"),
            DelayedOp::Nary { op, .. } => format!("Nary {op}"),
            DelayedOp::SetLabels { .. } => "SetLabels".to_string(),
            DelayedOp::Abind { axis, .. } => format!("Abind axis={axis}"),
        };
        let _ = writeln!(out, "{pad}{head} {:?} {}", self.shape, self.dtype);
        for p in self.parents() {
            p.describe_into(out, indent + 1);
        }
    }
}

/// Common shape of `parents` where dimensions of extent 1 broadcast.
fn broadcast_shape(parents: &[Arc<DelayedNode>]) -> Result<Vec<usize>, GraphError> {
    let first = parents
        .first()
        .ok_or_else(|| GraphError::ShapeMismatch("no operands".to_string()))?;
    let rank = first.ndim();
    let mut shape = vec![1usize; rank];
    for p in parents {
        if p.ndim() != rank {
            return Err(GraphError::ShapeMismatch(format!(
                "rank {} does not match rank {rank}",
                p.ndim()
            )));
        }
        for (d, &extent) in p.shape.iter().enumerate() {
            if shape[d] == 1 {
                shape[d] = extent;
            } else if extent != 1 && extent != shape[d] {
                return Err(GraphError::ShapeMismatch(format!(
                    "{:?} does not broadcast with {:?}",
                    p.shape, first.shape
                )));
            }
        }
    }
    Ok(shape)
}
