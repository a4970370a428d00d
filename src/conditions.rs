//! Pure predicates over observed cluster objects
//!
//! Each function answers one question about an object that was already
//! fetched. Compose them with a fetch step through [`crate::poll`] (or the
//! `Session::wait_*` helpers) to wait for a condition.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, NodeSystemInfo, Pod};
use kube::api::DynamicObject;

/// Node conditions that must be `False` on a healthy node
const PRESSURE_CONDITIONS: [&str; 4] = [
    "MemoryPressure",
    "DiskPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

/// Matches anything; used to wait for an object to exist
pub fn exists<K>(_: &K) -> bool {
    true
}

/// Pod has a `Ready=True` condition
pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Pod is `Running` with every container ready
pub fn pod_running(pod: &Pod) -> bool {
    let status = pod.status.as_ref();
    if status.and_then(|s| s.phase.as_deref()) != Some("Running") {
        return false;
    }
    status
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|containers| !containers.is_empty() && containers.iter().all(|c| c.ready))
}

/// Deployment reports `Available=True`
pub fn deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

/// Every scheduled DaemonSet pod is ready and none is unavailable
pub fn daemonset_ready(daemonset: &DaemonSet) -> bool {
    let Some(status) = daemonset.status.as_ref() else {
        return false;
    };
    status.desired_number_scheduled > 0
        && status.number_ready == status.desired_number_scheduled
        && status.number_unavailable.unwrap_or(0) == 0
}

/// First condition keeping a node from a perfect state, if any
///
/// A perfect node is `Ready=True` with every pressure condition `False`.
pub fn node_imperfect_condition(node: &Node) -> Option<String> {
    let conditions = node.status.as_ref()?.conditions.as_ref()?;
    conditions.iter().find_map(|cond| {
        let pressured =
            PRESSURE_CONDITIONS.contains(&cond.type_.as_str()) && cond.status != "False";
        let not_ready = cond.type_ == "Ready" && cond.status != "True";
        (pressured || not_ready).then(|| cond.type_.clone())
    })
}

pub fn node_is_perfect(node: &Node) -> bool {
    node_imperfect_condition(node).is_none()
}

/// Differences between two nodes' system info, ignoring IDs
///
/// Returns one line per differing field; empty when the nodes match.
pub fn system_info_difference(reference: &NodeSystemInfo, node: &NodeSystemInfo) -> Vec<String> {
    let fields: [(&str, &str, &str); 6] = [
        ("KernelVersion", &reference.kernel_version, &node.kernel_version),
        ("OSImage", &reference.os_image, &node.os_image),
        (
            "ContainerRuntimeVersion",
            &reference.container_runtime_version,
            &node.container_runtime_version,
        ),
        ("KubeletVersion", &reference.kubelet_version, &node.kubelet_version),
        ("OperatingSystem", &reference.operating_system, &node.operating_system),
        ("Architecture", &reference.architecture, &node.architecture),
    ];

    fields
        .iter()
        .filter(|(_, want, got)| want != got)
        .map(|(field, want, got)| format!("{field} differs: {want} vs {got}"))
        .collect()
}

fn status_field<'a>(obj: &'a DynamicObject, field: &str) -> Option<&'a serde_json::Value> {
    obj.data.get("status")?.get(field)
}

/// KubeVirt object carries a condition of `type_` with `status`
pub fn kubevirt_condition_match(obj: &DynamicObject, type_: &str, status: &str) -> bool {
    status_field(obj, "conditions")
        .and_then(|c| c.as_array())
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(type_)
                    && c.get("status").and_then(|s| s.as_str()) == Some(status)
            })
        })
}

/// VirtualMachineInstance is in `phase`
pub fn vmi_phase_match(vmi: &DynamicObject, phase: &str) -> bool {
    status_field(vmi, "phase").and_then(|p| p.as_str()) == Some(phase)
}

pub fn vm_ready(vm: &DynamicObject) -> bool {
    kubevirt_condition_match(vm, "Ready", "True")
}

pub fn vmi_ready(vmi: &DynamicObject) -> bool {
    kubevirt_condition_match(vmi, "Ready", "True")
}

pub fn vmi_running(vmi: &DynamicObject) -> bool {
    vmi_phase_match(vmi, "Running")
}
