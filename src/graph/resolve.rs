use crate::block::Block;
use crate::graph::ops::ParentRange;
use crate::graph::{DelayedNode, DelayedOp, GraphError};
use crate::viewport::Viewport;

/// Compute the block of `node` selected by `viewport`.
///
/// This is the only path through which graph data is read. Resolving the
/// same viewport twice yields equal blocks.
///
/// # Errors
/// - `OutOfRange` if `viewport` is not contained in the node shape
/// - `ShapeMismatch`/`TypeMismatch` if a map function breaks its contract
/// - any seed or kernel error met on the way down
pub fn resolve(node: &DelayedNode, viewport: &Viewport) -> Result<Block, GraphError> {
    if !viewport.is_within(node.shape()) {
        return Err(GraphError::OutOfRange {
            viewport: viewport.clone(),
            shape: node.shape().to_vec(),
        });
    }

    match node.op() {
        DelayedOp::Leaf(seed) => {
            log::trace!("extract {viewport} from {}", seed.backend_name());
            Ok(seed.extract(viewport)?)
        }
        DelayedOp::Subset { parent, selectors } => {
            // 1) Map each output range to a parent range
            let mapped: Vec<ParentRange> = selectors
                .iter()
                .enumerate()
                .map(|(axis, sel)| sel.parent_range(viewport.offset(axis), viewport.length(axis)))
                .collect();
            let parent_ranges: Vec<_> = mapped
                .iter()
                .map(|m| match m {
                    ParentRange::Contiguous(r) => r.clone(),
                    ParentRange::Gather { bounds, .. } => bounds.clone(),
                })
                .collect();

            // 2) Fetch the bounding region
            let mut block = resolve(parent, &Viewport::from_ranges(&parent_ranges))?;

            // 3) Gather where the selection reorders or repeats
            for (axis, m) in mapped.iter().enumerate() {
                if let ParentRange::Gather { positions, .. } = m {
                    block = block.select(axis, positions)?;
                }
            }
            Ok(block)
        }
        DelayedOp::Aperm { parent, perm, drop } => {
            let rank = parent.ndim();
            let mut offsets = vec![0; rank];
            let mut lengths = vec![1; rank];
            for (i, &d) in perm.iter().enumerate() {
                offsets[d] = viewport.offset(i);
                lengths[d] = viewport.length(i);
            }
            let block = resolve(parent, &Viewport::new(offsets, lengths))?;
            let block = if drop.is_empty() {
                block
            } else {
                block.remove_axes(drop)?
            };

            // Axes of the reduced block are the kept parent dims in order.
            let mut kept: Vec<usize> = perm.clone();
            kept.sort_unstable();
            let axes: Vec<usize> = perm
                .iter()
                .map(|d| kept.iter().position(|k| k == d).unwrap_or(0))
                .collect();
            if axes.iter().enumerate().all(|(i, &a)| i == a) {
                Ok(block)
            } else {
                Ok(block.permute(&axes)?)
            }
        }
        DelayedOp::Unary { parent, op } => {
            let input = resolve(parent, viewport)?;
            let output = op.apply(&input)?;
            if output.shape() != viewport.shape() {
                return Err(GraphError::ShapeMismatch(format!(
                    "{op} returned shape {:?} for a block of shape {:?}",
                    output.shape(),
                    viewport.shape()
                )));
            }
            if output.dtype() != node.dtype() {
                return Err(GraphError::TypeMismatch(format!(
                    "{op} returned {} but declared {}",
                    output.dtype(),
                    node.dtype()
                )));
            }
            Ok(output)
        }
        DelayedOp::Nary { parents, op } => {
            let blocks = parents
                .iter()
                .map(|p| {
                    // Broadcast dims are fetched once and expanded.
                    let mut local = viewport.clone();
                    for (d, &extent) in p.shape().iter().enumerate() {
                        if extent != node.shape()[d] {
                            local = local.with_axis(d, 0, 1);
                        }
                    }
                    let block = resolve(p, &local)?;
                    Ok(block.broadcast_to(viewport.shape())?)
                })
                .collect::<Result<Vec<_>, GraphError>>()?;
            Ok(op.apply(&blocks)?)
        }
        DelayedOp::SetLabels { parent, .. } => resolve(parent, viewport),
        DelayedOp::Abind { parents, axis } => {
            let axis = *axis;
            let want = viewport.range(axis);
            let mut parts = Vec::new();
            let mut start = 0;
            for p in parents {
                let end = start + p.shape()[axis];
                let lo = want.start.max(start);
                let hi = want.end.min(end);
                if lo < hi {
                    let local = viewport.with_axis(axis, lo - start, hi - lo);
                    parts.push(resolve(p, &local)?.cast(node.dtype())?);
                }
                start = end;
            }
            if parts.is_empty() {
                Ok(Block::zeros(node.dtype(), viewport.shape()))
            } else if parts.len() == 1 {
                Ok(parts.remove(0))
            } else {
                Ok(Block::concat(&parts, axis)?)
            }
        }
    }
}
