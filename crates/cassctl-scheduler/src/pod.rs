//! Conversion of Kubernetes pods into simulator workloads.
//!
//! Running pods feed both resource accounting (through their effective
//! requests) and inter-workload affinity (through their labels and
//! affinity terms). Constraints that only matter before a pod is bound
//! (node selector, node affinity, tolerations) are not read.

use std::collections::BTreeMap;

use cassctl_core::{Quantity, ResourceList, ResourceName};
use k8s_openapi::api::core::v1::{self as corev1, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use crate::model::{Workload, WorkloadAffinityTerm};
use crate::selector::{LabelSelector, Requirement, SelectorOperator};
use crate::{Result, SchedulerError};

/// Name of a pod, falling back to `<unnamed>`.
#[must_use]
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("<unnamed>")
}

/// The node a pod is bound to, if any.
#[must_use]
pub fn bound_node(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Whether the pod has finished and no longer holds node resources.
#[must_use]
pub fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}

/// Convert a Kubernetes resource map into canonical amounts.
///
/// # Errors
///
/// Returns an error if a name or quantity cannot be parsed.
pub fn resource_list(map: &BTreeMap<String, K8sQuantity>) -> Result<ResourceList> {
    let mut list = ResourceList::new();
    for (name, quantity) in map {
        let name = ResourceName::new(name.as_str())?;
        let quantity = Quantity::parse(&quantity.0)?;
        list.insert_quantity(name, &quantity)?;
    }
    Ok(list)
}

/// Compute the effective resource requests of a pod spec.
///
/// This is the sum of the regular containers' requests, raised per resource
/// to the largest init container request, plus the pod overhead.
///
/// # Errors
///
/// Returns an error if a request cannot be parsed.
pub fn effective_requests(spec: &PodSpec) -> Result<ResourceList> {
    let mut total = ResourceList::new();
    for container in &spec.containers {
        total.add(&container_requests(container)?);
    }

    for init in spec.init_containers.iter().flatten() {
        total.max_with(&container_requests(init)?);
    }

    if let Some(overhead) = &spec.overhead {
        total.add(&resource_list(overhead)?);
    }

    Ok(total)
}

fn container_requests(container: &corev1::Container) -> Result<ResourceList> {
    match container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
        Some(requests) => resource_list(requests),
        None => Ok(ResourceList::new()),
    }
}

/// Convert a bound pod into a [`Workload`].
///
/// The result carries the pod's name, labels, effective requests and
/// required pod (anti-)affinity terms.
///
/// # Errors
///
/// Returns [`SchedulerError::Retrieval`] naming the pod if any part of its
/// spec cannot be interpreted.
pub fn workload_from_pod(pod: &Pod) -> Result<Workload> {
    let name = pod_name(pod);
    convert_pod(pod).map_err(|e| SchedulerError::Retrieval(format!("pod {name}: {e}")))
}

fn convert_pod(pod: &Pod) -> Result<Workload> {
    let mut workload = Workload {
        name: pod_name(pod).to_string(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        ..Default::default()
    };

    let Some(spec) = pod.spec.as_ref() else {
        return Ok(workload);
    };

    workload.requests = effective_requests(spec)?;

    if let Some(affinity) = &spec.affinity {
        let required = affinity
            .pod_affinity
            .as_ref()
            .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_ref());
        for term in required.into_iter().flatten() {
            if let Some(selector) = pod_term_selector(term)? {
                workload.affinity_terms.push(WorkloadAffinityTerm::required(
                    selector,
                    term.topology_key.clone(),
                ));
            }
        }

        let forbidden = affinity
            .pod_anti_affinity
            .as_ref()
            .and_then(|a| a.required_during_scheduling_ignored_during_execution.as_ref());
        for term in forbidden.into_iter().flatten() {
            if let Some(selector) = pod_term_selector(term)? {
                workload.affinity_terms.push(WorkloadAffinityTerm::forbidden(
                    selector,
                    term.topology_key.clone(),
                ));
            }
        }
    }

    Ok(workload)
}

fn requirement(key: &str, operator: &str, values: Option<&Vec<String>>) -> Result<Requirement> {
    let operator = SelectorOperator::from_k8s(operator).ok_or_else(|| {
        SchedulerError::Retrieval(format!("unknown selector operator {operator:?} for {key}"))
    })?;
    Ok(Requirement {
        key: key.to_string(),
        operator,
        values: values.cloned().unwrap_or_default(),
    })
}

/// Convert a Kubernetes label selector.
///
/// # Errors
///
/// Returns an error for unknown operators.
pub fn label_selector_from_k8s(selector: &metav1::LabelSelector) -> Result<LabelSelector> {
    let match_expressions = selector
        .match_expressions
        .iter()
        .flatten()
        .map(|r| requirement(&r.key, &r.operator, r.values.as_ref()))
        .collect::<Result<_>>()?;
    Ok(LabelSelector {
        match_labels: selector.match_labels.clone().unwrap_or_default(),
        match_expressions,
    })
}

/// A term without a label selector selects no workloads and is dropped.
fn pod_term_selector(term: &corev1::PodAffinityTerm) -> Result<Option<LabelSelector>> {
    term.label_selector
        .as_ref()
        .map(label_selector_from_k8s)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AffinityKind;
    use k8s_openapi::api::core::v1::{
        Affinity, Container, NodeAffinity, NodeSelector, NodeSelectorRequirement,
        PodAffinityTerm, PodAntiAffinity, PodStatus, ResourceRequirements,
    };
    use kube::api::ObjectMeta;

    fn requests(cpu: &str, memory: &str) -> ResourceRequirements {
        ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), K8sQuantity(cpu.to_string())),
                ("memory".to_string(), K8sQuantity(memory.to_string())),
            ])),
            ..Default::default()
        }
    }

    fn container(cpu: &str, memory: &str) -> Container {
        Container {
            name: "c".to_string(),
            resources: Some(requests(cpu, memory)),
            ..Default::default()
        }
    }

    #[test]
    fn effective_requests_sum_containers() {
        let spec = PodSpec {
            containers: vec![container("100m", "100Mi"), container("250m", "1Gi")],
            ..Default::default()
        };
        let total = effective_requests(&spec).unwrap();
        assert_eq!(total.get(&ResourceName::cpu()), 350);
        assert_eq!(total.get(&ResourceName::memory()), 1124 * 1024 * 1024);
    }

    #[test]
    fn effective_requests_honour_init_containers_and_overhead() {
        let spec = PodSpec {
            containers: vec![container("100m", "100Mi")],
            init_containers: Some(vec![container("2", "10Mi")]),
            overhead: Some(BTreeMap::from([(
                "cpu".to_string(),
                K8sQuantity("50m".to_string()),
            )])),
            ..Default::default()
        };
        let total = effective_requests(&spec).unwrap();
        assert_eq!(total.get(&ResourceName::cpu()), 2050);
        assert_eq!(total.get(&ResourceName::memory()), 100 * 1024 * 1024);
    }

    #[test]
    fn pod_without_requests_contributes_nothing() {
        let spec = PodSpec {
            containers: vec![Container {
                name: "c".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(effective_requests(&spec).unwrap().is_empty());
    }

    #[test]
    fn bad_quantity_names_the_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("broken".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container("lots", "1Gi")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = workload_from_pod(&pod).unwrap_err();
        assert!(err.to_string().contains("pod broken"));
    }

    #[test]
    fn ignores_pre_binding_constraints() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("legacy".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container("100m", "100Mi")],
                node_selector: Some(BTreeMap::from([(
                    "disk".to_string(),
                    "ssd".to_string(),
                )])),
                tolerations: Some(vec![corev1::Toleration {
                    key: Some("purpose".to_string()),
                    operator: Some("Maybe".to_string()),
                    effect: Some("Sometimes".to_string()),
                    ..Default::default()
                }]),
                affinity: Some(Affinity {
                    node_affinity: Some(NodeAffinity {
                        required_during_scheduling_ignored_during_execution: Some(
                            NodeSelector {
                                node_selector_terms: vec![corev1::NodeSelectorTerm {
                                    match_expressions: Some(vec![NodeSelectorRequirement {
                                        key: "zone".to_string(),
                                        operator: "Near".to_string(),
                                        values: None,
                                    }]),
                                    ..Default::default()
                                }],
                            },
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let workload = workload_from_pod(&pod).unwrap();
        assert_eq!(workload.requests.get(&ResourceName::cpu()), 100);
        assert!(workload.tolerations.is_empty());
        assert!(workload.node_selector.is_empty());
        assert_eq!(workload.node_affinity, None);
    }

    #[test]
    fn unknown_selector_operator_in_pod_terms_is_rejected() {
        let selector = metav1::LabelSelector {
            match_expressions: Some(vec![metav1::LabelSelectorRequirement {
                key: "app".to_string(),
                operator: "Like".to_string(),
                values: None,
            }]),
            ..Default::default()
        };
        assert!(label_selector_from_k8s(&selector).is_err());
    }

    #[test]
    fn converts_anti_affinity_terms() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("cass-0".to_string()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "cassandra".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                affinity: Some(Affinity {
                    pod_anti_affinity: Some(PodAntiAffinity {
                        required_during_scheduling_ignored_during_execution: Some(vec![
                            PodAffinityTerm {
                                label_selector: Some(metav1::LabelSelector {
                                    match_labels: Some(BTreeMap::from([(
                                        "app".to_string(),
                                        "cassandra".to_string(),
                                    )])),
                                    ..Default::default()
                                }),
                                topology_key: "kubernetes.io/hostname".to_string(),
                                ..Default::default()
                            },
                            PodAffinityTerm {
                                label_selector: None,
                                topology_key: "kubernetes.io/hostname".to_string(),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let workload = workload_from_pod(&pod).unwrap();
        assert_eq!(workload.affinity_terms.len(), 1);
        assert_eq!(workload.affinity_terms[0].kind, AffinityKind::Forbidden);
        assert!(workload.affinity_terms[0].selector.matches(&workload.labels));
    }

    #[test]
    fn terminal_and_bound_pods() {
        let mut pod = Pod {
            spec: Some(PodSpec {
                node_name: Some("node1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(bound_node(&pod), Some("node1"));
        assert!(!is_terminal(&pod));

        pod.status = Some(PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        });
        assert!(is_terminal(&pod));

        pod.spec = Some(PodSpec::default());
        assert_eq!(bound_node(&pod), None);
    }
}
