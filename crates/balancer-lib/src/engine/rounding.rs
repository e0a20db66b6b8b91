//! Largest-remainder rounding to integer percentages

use crate::models::{NormalizedEdge, PercentEdge};
use std::collections::BTreeMap;

/// Percentage every source group must sum to
pub const PERCENT_TOTAL: u32 = 100;

/// Apportion `values` into integers summing to [`PERCENT_TOTAL`].
///
/// Values are floored and the leftover units go to the largest fractional
/// remainders (stable sort, so ties favor earlier values). Returns `None`
/// when the values do not sum to a positive finite number.
pub fn apportion(values: &[f64]) -> Option<Vec<u32>> {
    let total: f64 = values.iter().sum();
    if values.is_empty() || !total.is_finite() || total <= 0.0 {
        return None;
    }

    let exact: Vec<f64> = values
        .iter()
        .map(|v| (v / total) * PERCENT_TOTAL as f64)
        .collect();
    let mut base: Vec<u32> = exact.iter().map(|x| x.floor().max(0.0) as u32).collect();

    let used: u32 = base.iter().sum();
    let deficit = PERCENT_TOTAL.saturating_sub(used) as usize;

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra)
    });

    for i in 0..deficit {
        base[order[i % order.len()]] += 1;
    }

    Some(base)
}

/// Convert fractional shares into per-source integer percentages.
///
/// Sources whose shares sum to zero are omitted. Output is grouped by
/// source node in key order.
pub fn to_percent(edges: &[NormalizedEdge]) -> Vec<PercentEdge> {
    let mut groups: BTreeMap<&str, Vec<&NormalizedEdge>> = BTreeMap::new();
    for edge in edges {
        groups.entry(edge.from.as_str()).or_default().push(edge);
    }

    let mut out = Vec::with_capacity(edges.len());
    for (from, group) in groups {
        let shares: Vec<f64> = group.iter().map(|e| e.share).collect();
        let Some(percentages) = apportion(&shares) else {
            continue;
        };
        out.extend(
            group
                .iter()
                .zip(percentages)
                .map(|(e, pct)| PercentEdge::new(from, e.to.clone(), pct)),
        );
    }
    out
}

/// Rescale a single `to -> value` map so its values sum to 100.
///
/// An empty map stays empty. A map of zeros has nothing to scale, so each
/// key gets one unit in key order until 100 units are handed out.
pub fn normalize_to_100(values: &BTreeMap<String, u32>) -> BTreeMap<String, u32> {
    let raw: Vec<f64> = values.values().map(|v| *v as f64).collect();
    match apportion(&raw) {
        Some(percentages) => values.keys().cloned().zip(percentages).collect(),
        None => values
            .keys()
            .enumerate()
            .map(|(i, k)| (k.clone(), u32::from(i < PERCENT_TOTAL as usize)))
            .collect(),
    }
}
