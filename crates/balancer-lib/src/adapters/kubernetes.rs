//! Kubernetes-backed cluster state
//!
//! Routing state is read as a dynamic object and written with server-side
//! apply. Replica pods are resolved through the deployment's label
//! selector; node topology comes from the well-known topology labels.

use super::{async_trait, ClusterState};
use crate::mapper::{DestinationRule, RoutingStateRef};
use crate::models::{ClusterTopology, PodSample};
use anyhow::{bail, Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::debug;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "opti-balancer";

const REGION_LABEL: &str = "topology.kubernetes.io/region";
const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
const UNKNOWN: &str = "unknown";

/// Cluster state backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }

    fn dynamic_api(&self, reference: &RoutingStateRef) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&reference.group, &reference.version, &reference.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &reference.plural);
        Api::namespaced_with(self.client.clone(), &reference.namespace, &resource)
    }
}

#[async_trait]
impl ClusterState for KubeClusterState {
    async fn read_routing_state(
        &self,
        reference: &RoutingStateRef,
    ) -> Result<Option<serde_json::Value>> {
        let api = self.dynamic_api(reference);
        let object = api.get_opt(&reference.name).await.with_context(|| {
            format!(
                "Failed to read {} {}/{}",
                reference.kind, reference.namespace, reference.name
            )
        })?;

        object
            .map(|o| serde_json::to_value(o).context("Failed to encode routing state"))
            .transpose()
    }

    async fn apply_routing_state(&self, rule: &DestinationRule) -> Result<()> {
        let reference = rule.state_ref();
        let api = self.dynamic_api(&reference);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(&reference.name, &params, &Patch::Apply(rule))
            .await
            .with_context(|| {
                format!(
                    "Failed to apply {} {}/{}",
                    reference.kind, reference.namespace, reference.name
                )
            })?;

        debug!(
            namespace = %reference.namespace,
            name = %reference.name,
            "Applied routing state"
        );
        Ok(())
    }

    async fn replica_pods(&self, deployment: &str, namespace: &str) -> Result<Vec<PodSample>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deploy = deployments
            .get(deployment)
            .await
            .with_context(|| format!("Failed to get deployment {}/{}", namespace, deployment))?;

        let selector = replica_selector(&deploy)?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .with_context(|| format!("Failed to list pods for {}/{}", namespace, deployment))?;

        Ok(list.items.iter().filter_map(pod_sample).collect())
    }

    async fn cluster_topology(&self) -> Result<Vec<ClusterTopology>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .context("Failed to list nodes")?;

        Ok(list
            .items
            .iter()
            .map(|n| topology_from_labels(&n.name_any(), n.labels()))
            .collect())
    }
}

/// Selector for a deployment's pods; an empty selector would match the
/// whole namespace and is rejected
fn replica_selector(deploy: &Deployment) -> Result<String> {
    let selector = deploy
        .spec
        .as_ref()
        .map(|s| label_selector(&s.selector))
        .transpose()?
        .unwrap_or_default();

    if selector.is_empty() {
        bail!(
            "Deployment {}/{} has an empty selector",
            deploy.namespace().unwrap_or_default(),
            deploy.name_any()
        );
    }
    Ok(selector)
}

/// Label selector query string for a Deployment selector.
///
/// `matchLabels` become `k=v` terms and `matchExpressions` use the set-based
/// syntax (`k in (a,b)`, `k notin (a)`, `k`, `!k`).
fn label_selector(selector: &LabelSelector) -> Result<String> {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    for requirement in selector.match_expressions.iter().flatten() {
        terms.push(expression_term(requirement)?);
    }

    Ok(terms.join(","))
}

fn expression_term(requirement: &LabelSelectorRequirement) -> Result<String> {
    let key = &requirement.key;
    let values = || requirement.values.as_deref().unwrap_or_default().join(",");

    match requirement.operator.as_str() {
        "In" => Ok(format!("{} in ({})", key, values())),
        "NotIn" => Ok(format!("{} notin ({})", key, values())),
        "Exists" => Ok(key.clone()),
        "DoesNotExist" => Ok(format!("!{}", key)),
        other => bail!("Unsupported selector operator '{}' on key {}", other, key),
    }
}

/// A running, scheduled pod; others are not routable
fn pod_sample(pod: &Pod) -> Option<PodSample> {
    let phase = pod.status.as_ref()?.phase.as_deref()?;
    if phase != "Running" {
        return None;
    }
    let node = pod.spec.as_ref()?.node_name.clone()?;

    Some(PodSample {
        pod: pod.name_any(),
        node,
        ..Default::default()
    })
}

fn topology_from_labels(node: &str, labels: &BTreeMap<String, String>) -> ClusterTopology {
    let label = |key: &str| {
        labels
            .get(key)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    };

    ClusterTopology {
        node: node.to_string(),
        zone: label(ZONE_LABEL),
        region: label(REGION_LABEL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, phase: &str, node: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn requirement(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: (!values.is_empty()).then(|| values.iter().map(|v| v.to_string()).collect()),
        }
    }

    #[test]
    fn test_label_selector_from_match_labels() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([
                ("app".to_string(), "web".to_string()),
                ("tier".to_string(), "frontend".to_string()),
            ])),
            ..Default::default()
        };

        assert_eq!(label_selector(&selector).unwrap(), "app=web,tier=frontend");
        assert_eq!(label_selector(&LabelSelector::default()).unwrap(), "");
    }

    #[test]
    fn test_label_selector_from_match_expressions_only() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                requirement("app", "In", &["web", "web-canary"]),
                requirement("track", "NotIn", &["debug"]),
                requirement("owner", "Exists", &[]),
                requirement("legacy", "DoesNotExist", &[]),
            ]),
        };

        assert_eq!(
            label_selector(&selector).unwrap(),
            "app in (web,web-canary),track notin (debug),owner,!legacy"
        );
    }

    #[test]
    fn test_label_selector_combines_labels_and_expressions() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            match_expressions: Some(vec![requirement("tier", "In", &["frontend"])]),
        };

        assert_eq!(label_selector(&selector).unwrap(), "app=web,tier in (frontend)");
    }

    #[test]
    fn test_replica_selector_requires_terms() {
        let deployment = |selector: LabelSelector| Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                selector,
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = replica_selector(&deployment(LabelSelector::default())).unwrap_err();
        assert!(err.to_string().contains("shop/web has an empty selector"));
        assert!(replica_selector(&Deployment::default()).is_err());

        let selector = replica_selector(&deployment(LabelSelector {
            match_expressions: Some(vec![requirement("app", "In", &["web"])]),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(selector, "app in (web)");
    }

    #[test]
    fn test_label_selector_rejects_unknown_operator() {
        let selector = LabelSelector {
            match_expressions: Some(vec![requirement("app", "Like", &["web"])]),
            ..Default::default()
        };

        assert!(label_selector(&selector).is_err());
    }

    #[test]
    fn test_running_scheduled_pod_is_sampled() {
        let sample = pod_sample(&pod("web-1", "Running", Some("node-a"))).unwrap();

        assert_eq!(sample.pod, "web-1");
        assert_eq!(sample.node, "node-a");
        assert!(sample.percent_usage.is_none());
    }

    #[test]
    fn test_pending_or_unscheduled_pods_are_skipped() {
        assert!(pod_sample(&pod("web-1", "Pending", Some("node-a"))).is_none());
        assert!(pod_sample(&pod("web-2", "Running", None)).is_none());
    }

    #[test]
    fn test_topology_labels_default_to_unknown() {
        let labels = BTreeMap::from([(ZONE_LABEL.to_string(), "zone-1".to_string())]);

        let topology = topology_from_labels("node-a", &labels);

        assert_eq!(topology.zone, "zone-1");
        assert_eq!(topology.region, "unknown");
        assert_eq!(topology.locality(), "unknown/zone-1/node-a");
    }

    #[test]
    fn test_dynamic_resource_for_destination_rule() {
        let reference = RoutingStateRef::destination_rule("shop", "web");
        let gvk = GroupVersionKind::gvk(&reference.group, &reference.version, &reference.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &reference.plural);

        assert_eq!(resource.api_version, "networking.istio.io/v1beta1");
        assert_eq!(resource.plural, "destinationrules");
    }
}
