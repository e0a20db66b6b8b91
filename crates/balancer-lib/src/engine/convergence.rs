//! Bounded-step convergence toward a target distribution
//!
//! The stepper moves each edge at most `step_size` percentage points per
//! iteration and ignores differences inside the `epsilon` dead-zone; the
//! L1 distance gates whether a step is worth writing at all.

use super::rounding::normalize_to_100;
use crate::models::{DistributeMap, PercentEdge};
use std::collections::{BTreeMap, BTreeSet};

/// Maximum movement per edge per iteration, in percentage points
pub const DEFAULT_STEP_SIZE: u32 = 5;

/// Differences at or below this are treated as noise
pub const DEFAULT_EPSILON: f64 = 1.0;

/// Minimum L1 distance for an update to be applied
pub const DEFAULT_CHANGE_THRESHOLD: u32 = 10;

/// Group a flat percentage list by source node. Duplicate edges add up.
pub fn percent_list_to_distribute(list: &[PercentEdge]) -> DistributeMap {
    let mut out = DistributeMap::new();
    for edge in list {
        let pct = out
            .entry(edge.from.clone())
            .or_default()
            .entry(edge.to.clone())
            .or_insert(0);
        *pct = pct.saturating_add(edge.percentage);
    }
    out
}

/// Flatten a distribute map back into a percentage list
pub fn distribute_to_percent_list(distribute: &DistributeMap) -> Vec<PercentEdge> {
    distribute
        .iter()
        .flat_map(|(from, to)| {
            to.iter()
                .map(move |(to, pct)| PercentEdge::new(from.clone(), to.clone(), *pct))
        })
        .collect()
}

/// Move `current` toward `target` by at most `step_size` per edge.
///
/// Missing entries count as 0. Edges that end at 0 are dropped and every
/// source group is rescaled to 100 afterwards.
pub fn step_toward_target(
    current: &DistributeMap,
    target: &DistributeMap,
    step_size: u32,
    epsilon: f64,
) -> DistributeMap {
    let empty = BTreeMap::new();
    let froms: BTreeSet<&String> = current.keys().chain(target.keys()).collect();

    let mut out = DistributeMap::new();
    for from in froms {
        let cur = current.get(from).unwrap_or(&empty);
        let tgt = target.get(from).unwrap_or(&empty);
        let keys: BTreeSet<&String> = cur.keys().chain(tgt.keys()).collect();

        let next: BTreeMap<String, u32> = keys
            .into_iter()
            .filter_map(|to| {
                let c = cur.get(to).copied().unwrap_or(0);
                let t = tgt.get(to).copied().unwrap_or(0);
                let value = step_edge(c, t, step_size, epsilon);
                (value > 0).then(|| (to.clone(), value))
            })
            .collect();

        out.insert(from.clone(), normalize_to_100(&next));
    }
    out
}

fn step_edge(current: u32, target: u32, step_size: u32, epsilon: f64) -> u32 {
    let diff = target as i64 - current as i64;
    if (diff.abs() as f64) <= epsilon {
        return current;
    }
    let delta = diff.signum() * diff.abs().min(step_size as i64);
    (current as i64 + delta).max(0) as u32
}

/// Sum of absolute per-edge differences between two distributions.
///
/// Saturates at `u32::MAX` for weights read from foreign routing state.
pub fn l1_distance(a: &DistributeMap, b: &DistributeMap) -> u32 {
    let empty = BTreeMap::new();
    let froms: BTreeSet<&String> = a.keys().chain(b.keys()).collect();

    let mut sum = 0u32;
    for from in froms {
        let am = a.get(from).unwrap_or(&empty);
        let bm = b.get(from).unwrap_or(&empty);
        let keys: BTreeSet<&String> = am.keys().chain(bm.keys()).collect();
        for to in keys {
            let x = am.get(to).copied().unwrap_or(0);
            let y = bm.get(to).copied().unwrap_or(0);
            sum = sum.saturating_add(x.abs_diff(y));
        }
    }
    sum
}
