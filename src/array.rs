//! The user-facing lazy array handle.

use crate::block::ops::{ArithOp, CompareOp};
use crate::block::Block;
use crate::dtype::DType;
use crate::graph::{
    resolve, DelayedNode, DelayedOp, GraphError, IndexSelector, MapFn, NaryOp, UnaryOp,
};
use crate::labels::Labels;
use crate::scalar::Scalar;
use crate::seed::Seed;
use crate::viewport::Viewport;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Range;
use std::sync::Arc;

/// Whether a handle still reflects a specialized backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pedigree {
    Backend(&'static str),
    Generic,
}

impl Display for Pedigree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Pedigree::Backend(name) => write!(f, "{name}"),
            Pedigree::Generic => write!(f, "generic"),
        }
    }
}

type ElisionPredicate = dyn Fn(&DelayedNode) -> Option<Arc<DelayedNode>> + Send + Sync;

/// A named no-op rule. Given a freshly validated candidate node, it may return
/// an existing node to use in its place.
#[derive(Clone)]
pub struct ElisionRule {
    name: String,
    predicate: Arc<ElisionPredicate>,
}

impl ElisionRule {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&DelayedNode) -> Option<Arc<DelayedNode>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for ElisionRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ElisionRule").field(&self.name).finish()
    }
}

pub const FULL_RANGE_SUBSET: &str = "full-range-subset";
pub const INVERSE_PERMUTATION: &str = "inverse-permutation";
pub const IDENTITY_ARITHMETIC: &str = "identity-arithmetic";
pub const SAME_TYPE_CAST: &str = "same-type-cast";
pub const UNCHANGED_LABELS: &str = "unchanged-labels";

/// The set of no-op rules consulted before a new node is kept.
#[derive(Debug, Clone)]
pub struct ElisionTable {
    rules: Vec<ElisionRule>,
}

impl Default for ElisionTable {
    fn default() -> Self {
        Self {
            rules: vec![
                ElisionRule::new(FULL_RANGE_SUBSET, full_range_subset),
                ElisionRule::new(INVERSE_PERMUTATION, inverse_permutation),
                ElisionRule::new(IDENTITY_ARITHMETIC, identity_arithmetic),
                ElisionRule::new(SAME_TYPE_CAST, same_type_cast),
                ElisionRule::new(UNCHANGED_LABELS, unchanged_labels),
            ],
        }
    }
}

impl ElisionTable {
    pub fn empty() -> Self {
        Self { rules: vec![] }
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Add a rule, replacing any existing rule of the same name.
    pub fn with_rule(mut self, rule: ElisionRule) -> Self {
        self.rules.retain(|r| r.name != rule.name);
        self.rules.push(rule);
        self
    }

    pub fn without_rule(mut self, name: &str) -> Self {
        self.rules.retain(|r| r.name != name);
        self
    }

    /// The replacement for `candidate` offered by the first matching rule.
    pub fn elide(&self, candidate: &DelayedNode) -> Option<(&str, Arc<DelayedNode>)> {
        self.rules
            .iter()
            .find_map(|r| (r.predicate)(candidate).map(|node| (r.name(), node)))
    }
}

fn full_range_subset(candidate: &DelayedNode) -> Option<Arc<DelayedNode>> {
    let DelayedOp::Subset { parent, selectors } = candidate.op() else {
        return None;
    };
    selectors
        .iter()
        .zip(parent.shape())
        .all(|(sel, &extent)| sel.is_full(extent))
        .then(|| parent.clone())
}

fn inverse_permutation(candidate: &DelayedNode) -> Option<Arc<DelayedNode>> {
    let DelayedOp::Aperm { parent, perm, drop } = candidate.op() else {
        return None;
    };
    let DelayedOp::Aperm {
        parent: grandparent,
        perm: inner,
        drop: inner_drop,
    } = parent.op()
    else {
        return None;
    };
    let identity = drop.is_empty()
        && inner_drop.is_empty()
        && perm.iter().enumerate().all(|(i, &p)| inner[p] == i);
    identity.then(|| grandparent.clone())
}

fn identity_arithmetic(candidate: &DelayedNode) -> Option<Arc<DelayedNode>> {
    let DelayedOp::Unary {
        parent,
        op:
            UnaryOp::Arith {
                op,
                scalar,
                scalar_first: false,
            },
    } = candidate.op()
    else {
        return None;
    };
    let neutral = match op {
        ArithOp::Add | ArithOp::Sub => scalar.is_zero(),
        ArithOp::Mul | ArithOp::Div => scalar.is_one(),
        ArithOp::Pow => false,
    };
    (neutral && candidate.dtype() == parent.dtype()).then(|| parent.clone())
}

fn same_type_cast(candidate: &DelayedNode) -> Option<Arc<DelayedNode>> {
    match candidate.op() {
        DelayedOp::Unary {
            parent,
            op: UnaryOp::Cast(to),
        } if *to == parent.dtype() => Some(parent.clone()),
        _ => None,
    }
}

fn unchanged_labels(candidate: &DelayedNode) -> Option<Arc<DelayedNode>> {
    match candidate.op() {
        DelayedOp::SetLabels { parent, labels } if labels.as_ref() == parent.labels() => {
            Some(parent.clone())
        }
        _ => None,
    }
}

/// A lazily evaluated array: a root graph node plus the no-op rules applied
/// when operations extend it. Every operation returns a new handle.
#[derive(Clone)]
pub struct DelayedArray {
    root: Arc<DelayedNode>,
    rules: Arc<ElisionTable>,
}

impl Debug for DelayedArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedArray")
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("pedigree", &self.pedigree())
            .finish()
    }
}

impl DelayedArray {
    pub fn new<S: Seed + 'static>(seed: S) -> Self {
        Self::from_seed(Arc::new(seed))
    }

    pub fn from_seed(seed: Arc<dyn Seed>) -> Self {
        Self::from_node(DelayedNode::leaf(seed))
    }

    pub fn from_node(root: Arc<DelayedNode>) -> Self {
        Self {
            root,
            rules: Arc::new(ElisionTable::default()),
        }
    }

    pub fn with_elision_table(mut self, table: ElisionTable) -> Self {
        self.rules = Arc::new(table);
        self
    }

    pub fn elision_table(&self) -> &ElisionTable {
        &self.rules
    }

    pub fn root(&self) -> &Arc<DelayedNode> {
        &self.root
    }

    pub fn shape(&self) -> &[usize] {
        self.root.shape()
    }

    pub fn ndim(&self) -> usize {
        self.root.ndim()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        self.root.dtype()
    }

    pub fn labels(&self) -> Option<&Labels> {
        self.root.labels()
    }

    pub fn pedigree(&self) -> Pedigree {
        match self.root.op() {
            DelayedOp::Leaf(seed) => Pedigree::Backend(seed.backend_name()),
            _ => Pedigree::Generic,
        }
    }

    /// True when no operation sits between this handle and its seed.
    pub fn is_pristine(&self) -> bool {
        matches!(self.root.op(), DelayedOp::Leaf(_))
    }

    pub fn native_chunk_shape(&self) -> Option<Vec<usize>> {
        self.root.native_chunk_shape()
    }

    pub fn seeds(&self) -> Vec<Arc<dyn Seed>> {
        self.root.seeds()
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn describe(&self) -> String {
        self.root.describe()
    }

    fn derive(&self, candidate: Arc<DelayedNode>) -> Self {
        let root = match self.rules.elide(&candidate) {
            Some((rule, replacement)) => {
                log::debug!("elided {} by {rule}", candidate_kind(&candidate));
                replacement
            }
            None => candidate,
        };
        Self {
            root,
            rules: self.rules.clone(),
        }
    }

    pub fn subset(&self, selectors: Vec<IndexSelector>) -> Result<Self, GraphError> {
        Ok(self.derive(DelayedNode::subset(self.root.clone(), selectors)?))
    }

    /// Subset by one contiguous range per dimension.
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Self, GraphError> {
        self.subset(ranges.iter().cloned().map(IndexSelector::Range).collect())
    }

    pub fn aperm(&self, perm: Vec<usize>, drop: Vec<usize>) -> Result<Self, GraphError> {
        Ok(self.derive(DelayedNode::aperm(self.root.clone(), perm, drop)?))
    }

    /// Reverse the order of the dimensions.
    pub fn transpose(&self) -> Result<Self, GraphError> {
        self.aperm((0..self.ndim()).rev().collect(), vec![])
    }

    pub fn unary(&self, op: UnaryOp) -> Result<Self, GraphError> {
        Ok(self.derive(DelayedNode::unary(self.root.clone(), op)?))
    }

    pub fn map(&self, f: MapFn) -> Result<Self, GraphError> {
        self.unary(UnaryOp::Map(f))
    }

    pub fn arith_scalar(
        &self,
        op: ArithOp,
        scalar: impl Into<Scalar>,
        scalar_first: bool,
    ) -> Result<Self, GraphError> {
        self.unary(UnaryOp::Arith {
            op,
            scalar: scalar.into(),
            scalar_first,
        })
    }

    pub fn add_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self, GraphError> {
        self.arith_scalar(ArithOp::Add, scalar, false)
    }

    pub fn mul_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self, GraphError> {
        self.arith_scalar(ArithOp::Mul, scalar, false)
    }

    pub fn compare_scalar(
        &self,
        op: CompareOp,
        scalar: impl Into<Scalar>,
    ) -> Result<Self, GraphError> {
        self.unary(UnaryOp::Compare {
            op,
            scalar: scalar.into(),
        })
    }

    pub fn cast(&self, dtype: DType) -> Result<Self, GraphError> {
        self.unary(UnaryOp::Cast(dtype))
    }

    /// Combine this array with `others` elementwise under `op`.
    pub fn combine(&self, others: &[&DelayedArray], op: NaryOp) -> Result<Self, GraphError> {
        let parents = std::iter::once(self.root.clone())
            .chain(others.iter().map(|o| o.root.clone()))
            .collect();
        Ok(self.derive(DelayedNode::nary(parents, op)?))
    }

    pub fn add(&self, other: &DelayedArray) -> Result<Self, GraphError> {
        self.combine(&[other], NaryOp::Arith(ArithOp::Add))
    }

    pub fn sub(&self, other: &DelayedArray) -> Result<Self, GraphError> {
        self.combine(&[other], NaryOp::Arith(ArithOp::Sub))
    }

    pub fn mul(&self, other: &DelayedArray) -> Result<Self, GraphError> {
        self.combine(&[other], NaryOp::Arith(ArithOp::Mul))
    }

    pub fn div(&self, other: &DelayedArray) -> Result<Self, GraphError> {
        self.combine(&[other], NaryOp::Arith(ArithOp::Div))
    }

    pub fn set_labels(&self, labels: Option<Labels>) -> Result<Self, GraphError> {
        Ok(self.derive(DelayedNode::set_labels(self.root.clone(), labels)?))
    }

    pub fn abind(&self, others: &[&DelayedArray], axis: usize) -> Result<Self, GraphError> {
        let parents = std::iter::once(self.root.clone())
            .chain(others.iter().map(|o| o.root.clone()))
            .collect();
        Ok(self.derive(DelayedNode::abind(parents, axis)?))
    }

    pub fn rbind(&self, others: &[&DelayedArray]) -> Result<Self, GraphError> {
        self.abind(others, 0)
    }

    pub fn cbind(&self, others: &[&DelayedArray]) -> Result<Self, GraphError> {
        self.abind(others, 1)
    }

    pub fn resolve(&self, viewport: &Viewport) -> Result<Block, GraphError> {
        resolve(&self.root, viewport)
    }

    /// Resolve the whole array into one block.
    pub fn to_block(&self) -> Result<Block, GraphError> {
        self.resolve(&Viewport::full(self.shape()))
    }
}

fn candidate_kind(node: &DelayedNode) -> &'static str {
    match node.op() {
        DelayedOp::Leaf(_) => "leaf",
        DelayedOp::Subset { .. } => "subset",
        DelayedOp::Aperm { .. } => "aperm",
        DelayedOp::Unary { .. } => "unary",
        DelayedOp::Nary { .. } => "nary",
        DelayedOp::SetLabels { .. } => "set-labels",
        DelayedOp::Abind { .. } => "abind",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::MemorySeed;

    fn array() -> DelayedArray {
        DelayedArray::new(
            MemorySeed::from_vec_shape((0..6).collect::<Vec<i32>>(), &[2, 3]).unwrap(),
        )
    }

    #[test]
    fn test_pristine_after_noops() {
        let a = array();
        assert_eq!(a.pedigree(), Pedigree::Backend("in-memory"));
        let b = a
            .slice(&[0..2, 0..3])
            .unwrap()
            .add_scalar(0)
            .unwrap()
            .mul_scalar(1)
            .unwrap()
            .cast(DType::Integer)
            .unwrap()
            .transpose()
            .unwrap()
            .transpose()
            .unwrap()
            .set_labels(None)
            .unwrap();
        assert!(b.is_pristine());
        assert!(Arc::ptr_eq(a.root(), b.root()));
    }

    #[test]
    fn test_non_neutral_ops_are_generic() {
        let a = array();
        assert_eq!(a.add_scalar(1).unwrap().pedigree(), Pedigree::Generic);
        // `0 - x` is not neutral
        assert!(!a
            .arith_scalar(ArithOp::Sub, 0, true)
            .unwrap()
            .is_pristine());
        // `x + 0.0` widens Integer to Real
        assert!(!a.add_scalar(0.0).unwrap().is_pristine());
        assert_eq!(a.transpose().unwrap().depth(), 1);
    }

    #[test]
    fn test_removing_rules() {
        let a = array().with_elision_table(ElisionTable::default().without_rule(SAME_TYPE_CAST));
        assert!(!a.cast(DType::Integer).unwrap().is_pristine());
        assert!(a.add_scalar(0).unwrap().is_pristine());
        let none = array().with_elision_table(ElisionTable::empty());
        assert!(!none.slice(&[0..2, 0..3]).unwrap().is_pristine());
    }

    #[test]
    fn test_custom_rule() {
        let rule = ElisionRule::new("double-negation", |c: &DelayedNode| {
            let DelayedOp::Unary {
                parent,
                op: UnaryOp::Not,
            } = c.op()
            else {
                return None;
            };
            match parent.op() {
                DelayedOp::Unary {
                    parent: inner,
                    op: UnaryOp::Not,
                } if inner.dtype() == DType::Logical => Some(inner.clone()),
                _ => None,
            }
        });
        let table = ElisionTable::default().with_rule(rule);
        assert_eq!(table.names().len(), 6);

        let flags = array()
            .compare_scalar(CompareOp::Gt, 2)
            .unwrap()
            .with_elision_table(table);
        let twice = flags
            .unary(UnaryOp::Not)
            .unwrap()
            .unary(UnaryOp::Not)
            .unwrap();
        assert!(Arc::ptr_eq(flags.root(), twice.root()));
    }

    #[test]
    fn test_validation_before_elision() {
        let a = array();
        assert!(matches!(
            a.slice(&[0..3, 0..3]),
            Err(GraphError::IndexOutOfBounds { axis: 0, .. })
        ));
        assert!(a.aperm(vec![0], vec![]).is_err());
    }
}
