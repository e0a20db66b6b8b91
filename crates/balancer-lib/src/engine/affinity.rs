//! Weight normalization and local-affinity enforcement

use crate::models::{NormalizedEdge, WeightEdge};
use std::collections::BTreeMap;

/// Default minimum fraction of a source's traffic kept on its own node
pub const DEFAULT_MIN_LOCAL_SHARE: f64 = 0.35;

/// Smallest group total used as a divisor
const SHARE_EPSILON: f64 = 1e-12;

/// Normalize raw weights into traffic shares and enforce the local floor.
///
/// Returns an empty list when the weights sum to zero. Groups are emitted
/// in source-node order; edge order within a group is preserved.
pub fn normalize(weights: &[WeightEdge], min_local_share: f64) -> Vec<NormalizedEdge> {
    let total: f64 = weights.iter().map(|w| w.weight).sum();
    if !total.is_finite() || total <= 0.0 {
        return Vec::new();
    }

    let mut groups: BTreeMap<&str, Vec<NormalizedEdge>> = BTreeMap::new();
    for w in weights {
        groups.entry(w.from.as_str()).or_default().push(NormalizedEdge {
            from: w.from.clone(),
            to: w.to.clone(),
            share: w.weight / total,
        });
    }

    groups
        .into_values()
        .flat_map(|group| enforce_local_share(group, min_local_share))
        .collect()
}

/// Lift the local edge of one source group up to `min_local_share`,
/// taking the difference from cross-node edges in proportion to their
/// share. Groups without a local edge, or already above the floor, are
/// returned unchanged.
pub fn enforce_local_share(
    group: Vec<NormalizedEdge>,
    min_local_share: f64,
) -> Vec<NormalizedEdge> {
    let total = group.iter().map(|e| e.share).sum::<f64>().max(SHARE_EPSILON);

    let local_share = match group.iter().find(|e| e.from == e.to) {
        Some(local) => local.share / total,
        None => return group,
    };

    if local_share >= min_local_share {
        return group;
    }

    let boost = (min_local_share - local_share) * total;
    let cross_sum: f64 = group
        .iter()
        .filter(|e| e.from != e.to)
        .map(|e| e.share)
        .sum();

    let adjusted: Vec<NormalizedEdge> = group
        .into_iter()
        .map(|e| {
            let share = if e.from == e.to {
                e.share + boost
            } else if cross_sum > 0.0 {
                e.share - (e.share / cross_sum) * boost
            } else {
                e.share
            };
            NormalizedEdge {
                share: share.max(0.0),
                ..e
            }
        })
        .collect();

    let new_total: f64 = adjusted.iter().map(|e| e.share).sum();
    if new_total <= 0.0 {
        return adjusted;
    }

    adjusted
        .into_iter()
        .map(|e| NormalizedEdge {
            share: e.share / new_total,
            ..e
        })
        .collect()
}
