//! DestinationRule mapping
//!
//! Converts computed percentages into an Istio `DestinationRule` with a
//! locality-weighted `distribute` block, and reads the `distribute` block
//! back out of a persisted rule.

use crate::models::{ClusterTopology, DistributeMap, PercentEdge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

pub const GROUP: &str = "networking.istio.io";
pub const VERSION: &str = "v1beta1";
pub const KIND: &str = "DestinationRule";
pub const PLURAL: &str = "destinationrules";
pub const LOAD_BALANCER_POLICY: &str = "LEAST_REQUEST";

/// JSON pointer to the persisted distribute list
const DISTRIBUTE_POINTER: &str = "/spec/trafficPolicy/loadBalancer/localityLbSetting/distribute";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRule {
    pub api_version: String,
    pub kind: String,
    pub metadata: RuleMetadata,
    pub spec: DestinationRuleSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    pub host: String,
    pub traffic_policy: TrafficPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicy {
    pub load_balancer: LoadBalancerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSettings {
    pub simple: String,
    pub locality_lb_setting: LocalityLbSetting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalityLbSetting {
    pub enabled: bool,
    pub distribute: Vec<LocalityDistribute>,
}

/// Traffic split for one source locality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalityDistribute {
    pub from: String,
    pub to: BTreeMap<String, u32>,
}

/// Identifies a routing-state object in the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingStateRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespace: String,
    pub name: String,
}

impl RoutingStateRef {
    /// Reference to the DestinationRule for a service
    pub fn destination_rule(namespace: &str, service: &str) -> Self {
        Self {
            group: GROUP.to_string(),
            version: VERSION.to_string(),
            kind: KIND.to_string(),
            plural: PLURAL.to_string(),
            namespace: namespace.to_string(),
            name: service.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl DestinationRule {
    pub fn state_ref(&self) -> RoutingStateRef {
        RoutingStateRef::destination_rule(&self.metadata.namespace, &self.metadata.name)
    }

    /// The distribute block re-keyed by node name
    pub fn distribute_map(&self) -> DistributeMap {
        let mut out = DistributeMap::new();
        for entry in &self.spec.traffic_policy.load_balancer.locality_lb_setting.distribute {
            let to = out.entry(node_of(&entry.from).to_string()).or_default();
            for (locality, pct) in &entry.to {
                let merged = to.entry(node_of(locality).to_string()).or_insert(0);
                *merged = merged.saturating_add(*pct);
            }
        }
        out
    }
}

/// Build a DestinationRule for `service` from per-node percentages.
///
/// Nodes are expanded to `region/zone/node` localities; a node missing from
/// the topology is emitted under its bare name.
pub fn to_destination_rule(
    traffic: &[PercentEdge],
    namespace: &str,
    service: &str,
    topology: &[ClusterTopology],
) -> DestinationRule {
    let localities: HashMap<&str, String> = topology
        .iter()
        .map(|t| (t.node.as_str(), t.locality()))
        .collect();

    let locality_of = |node: &str| -> String {
        match localities.get(node) {
            Some(locality) => locality.clone(),
            None => {
                warn!(node = %node, "Node missing from cluster topology, using bare name");
                node.to_string()
            }
        }
    };

    let mut grouped: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
    for edge in traffic {
        *grouped
            .entry(locality_of(&edge.from))
            .or_default()
            .entry(locality_of(&edge.to))
            .or_insert(0) += edge.percentage;
    }

    DestinationRule {
        api_version: format!("{}/{}", GROUP, VERSION),
        kind: KIND.to_string(),
        metadata: RuleMetadata {
            name: service.to_string(),
            namespace: namespace.to_string(),
        },
        spec: DestinationRuleSpec {
            host: format!("{}.{}.svc.cluster.local", service, namespace),
            traffic_policy: TrafficPolicy {
                load_balancer: LoadBalancerSettings {
                    simple: LOAD_BALANCER_POLICY.to_string(),
                    locality_lb_setting: LocalityLbSetting {
                        enabled: true,
                        distribute: grouped
                            .into_iter()
                            .map(|(from, to)| LocalityDistribute { from, to })
                            .collect(),
                    },
                },
            },
        },
    }
}

/// Extract the distribute block of a persisted rule, keyed by node name.
///
/// Returns `None` when the document has no distribute list. Entries that
/// are not `{from: string, to: {string: number}}` are skipped; fractional
/// percentages are rounded.
pub fn distribute_from_state(state: &serde_json::Value) -> Option<DistributeMap> {
    let entries = state.pointer(DISTRIBUTE_POINTER)?.as_array()?;

    let mut out = DistributeMap::new();
    for entry in entries {
        let (Some(from), Some(to)) = (
            entry.get("from").and_then(|f| f.as_str()),
            entry.get("to").and_then(|t| t.as_object()),
        ) else {
            warn!(entry = %entry, "Skipping malformed distribute entry");
            continue;
        };

        let targets = out.entry(node_of(from).to_string()).or_default();
        for (locality, pct) in to {
            let Some(pct) = pct.as_f64() else {
                continue;
            };
            // `as` saturates oversized weights at u32::MAX
            let merged = targets.entry(node_of(locality).to_string()).or_insert(0);
            *merged = merged.saturating_add(pct.round().max(0.0) as u32);
        }
    }
    Some(out)
}

/// Node name of a `region/zone/node` locality (the last segment)
pub fn node_of(locality: &str) -> &str {
    locality.rsplit('/').next().unwrap_or(locality)
}
