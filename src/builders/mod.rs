//! Object builders for test workloads
//!
//! Fluent builders in the style of `DeploymentFixture::new(..).replicas(3).build()`
//! plus the small helpers they share (resource lists, selectors).

pub mod pod;
pub mod quantity;
pub mod selector;
pub mod vm;
pub mod workload;

pub use pod::{
    pod_spec, requests_with_derived_limits, resource_requirements, tolerate_everything,
    ContainerFixture, PodFixture,
};
pub use quantity::{cpu_limits_from_requests, resource_list, QuantityError};
pub use selector::{match_expressions, match_labels, requirement, selector_string};
pub use vm::{
    running_patch, virtual_machine_instance_resource, virtual_machine_resource,
    DataVolumeSource, DataVolumeTemplate, NetworkBinding, VirtualMachineFixture,
};
pub use workload::{restart_patch, DaemonSetFixture, DeploymentFixture};
