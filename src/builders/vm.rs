//! KubeVirt VirtualMachine builder
//!
//! KubeVirt types have no generated crate, so VMs are assembled as
//! [`DynamicObject`]s against the `kubevirt.io/v1` resources returned by
//! [`virtual_machine_resource`] and [`virtual_machine_instance_resource`].
//!
//! ```ignore
//! let vm = VirtualMachineFixture::new("vm-e2e", "e2e")
//!     .data_volume(DataVolumeTemplate::from_pvc("os-images", "rhel9").storage("15Gi"))
//!     .requests("250m", "2Gi")
//!     .zone("az-a")
//!     .build();
//! session.create_dynamic(&virtual_machine_resource(), &vm).await?;
//! ```

use super::quantity::{cpu_limits_from_requests, resource_list};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ObjectMeta};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const KUBEVIRT_GROUP: &str = "kubevirt.io";
pub const KUBEVIRT_VERSION: &str = "v1";
pub const CDI_API_VERSION: &str = "cdi.kubevirt.io/v1beta1";

/// Label KubeVirt copies onto the launcher pod of a VM
pub const DOMAIN_LABEL: &str = "kubevirt.io/domain";

pub const MACHINE_TYPE: &str = "pc-q35-rhel8.6.0";
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
pub const CLOUD_INIT_VOLUME: &str = "cloudinit";

pub fn virtual_machine_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        KUBEVIRT_GROUP,
        KUBEVIRT_VERSION,
        "VirtualMachine",
    ))
}

pub fn virtual_machine_instance_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        KUBEVIRT_GROUP,
        KUBEVIRT_VERSION,
        "VirtualMachineInstance",
    ))
}

/// Merge patch that starts or stops a VM
pub fn running_patch(running: bool) -> Value {
    json!({ "spec": { "running": running } })
}

/// Password of `parts` random four-character groups joined by `-`
pub fn random_password(parts: usize) -> String {
    (0..parts)
        .map(|_| uuid::Uuid::new_v4().simple().to_string()[..4].to_string())
        .collect::<Vec<_>>()
        .join("-")
}

/// Cloud-init user data for the `cloud-user` account
pub fn cloud_init_user_data(password: &str, ssh_key: &str) -> String {
    format!(
        "#cloud-config\n\
         user: cloud-user\n\
         password: '{password}'\n\
         chpasswd:\n  expire: false\n\
         ssh_authorized_keys:\n  - '{ssh_key}'\n"
    )
}

/// Where a DataVolume gets its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataVolumeSource {
    /// Clone an existing PVC
    Pvc { namespace: String, name: String },
    /// Import an image over HTTP
    Http { url: String },
    /// Empty disk
    Blank,
}

impl DataVolumeSource {
    fn to_json(&self) -> Value {
        match self {
            Self::Pvc { namespace, name } => {
                json!({ "pvc": { "namespace": namespace, "name": name } })
            }
            Self::Http { url } => json!({ "http": { "url": url } }),
            Self::Blank => json!({ "blank": {} }),
        }
    }
}

/// Disk backed by a DataVolume created alongside the VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataVolumeTemplate {
    source: DataVolumeSource,
    access_mode: String,
    storage: String,
    volume_mode: Option<String>,
    storage_class: Option<String>,
}

impl DataVolumeTemplate {
    pub fn new(source: DataVolumeSource) -> Self {
        Self {
            source,
            access_mode: "ReadWriteOnce".to_string(),
            storage: String::new(),
            volume_mode: None,
            storage_class: None,
        }
    }

    pub fn from_pvc(namespace: &str, name: &str) -> Self {
        Self::new(DataVolumeSource::Pvc {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn access_mode(mut self, mode: &str) -> Self {
        self.access_mode = mode.to_string();
        self
    }

    /// Requested size, e.g. `15Gi`
    #[must_use]
    pub fn storage(mut self, size: &str) -> Self {
        self.storage = size.to_string();
        self
    }

    /// `Block` or `Filesystem`
    #[must_use]
    pub fn volume_mode(mut self, mode: &str) -> Self {
        self.volume_mode = Some(mode.to_string());
        self
    }

    #[must_use]
    pub fn storage_class(mut self, class: &str) -> Self {
        self.storage_class = Some(class.to_string());
        self
    }

    fn to_json(&self, name: &str) -> Value {
        let mut storage = json!({
            "accessModes": [self.access_mode],
            "resources": { "requests": resource_list("", "", &self.storage, "") },
        });
        if let Some(mode) = &self.volume_mode {
            storage["volumeMode"] = json!(mode);
        }
        if let Some(class) = &self.storage_class {
            storage["storageClassName"] = json!(class);
        }

        json!({
            "apiVersion": CDI_API_VERSION,
            "kind": "DataVolume",
            "metadata": { "name": name },
            "spec": {
                "source": self.source.to_json(),
                "storage": storage,
            }
        })
    }
}

/// How a VM interface is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkBinding {
    /// Pod network behind NAT
    Masquerade,
    /// Secondary network through a NetworkAttachmentDefinition; defaults to
    /// one named after the interface
    Bridge { nad: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VmNetwork {
    name: String,
    binding: NetworkBinding,
}

/// Builder for VirtualMachine objects
#[derive(Debug, Clone)]
pub struct VirtualMachineFixture {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    running: bool,
    run_strategy: Option<String>,
    data_volumes: Vec<DataVolumeTemplate>,
    networks: Vec<VmNetwork>,
    cpu_requests: String,
    memory_requests: String,
    cores: u32,
    sockets: u32,
    threads: u32,
    zone: Option<String>,
    node_name: Option<String>,
    password: Option<String>,
    ssh_key: String,
}

impl VirtualMachineFixture {
    /// VM labelled `kubevirt.io/domain=<name>` on itself and its instance template
    #[must_use]
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: BTreeMap::from([(DOMAIN_LABEL.to_string(), name.to_string())]),
            annotations: BTreeMap::new(),
            running: true,
            run_strategy: None,
            data_volumes: Vec::new(),
            networks: Vec::new(),
            cpu_requests: String::new(),
            memory_requests: String::new(),
            cores: 1,
            sockets: 1,
            threads: 1,
            zone: None,
            node_name: None,
            password: None,
            ssh_key: String::new(),
        }
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    /// Use a run strategy such as `Always` instead of the `running` flag
    #[must_use]
    pub fn run_strategy(mut self, strategy: &str) -> Self {
        self.run_strategy = Some(strategy.to_string());
        self
    }

    /// Add a boot disk; disks boot in the order they are added
    #[must_use]
    pub fn data_volume(mut self, template: DataVolumeTemplate) -> Self {
        self.data_volumes.push(template);
        self
    }

    #[must_use]
    pub fn network(mut self, name: &str, binding: NetworkBinding) -> Self {
        self.networks.push(VmNetwork {
            name: name.to_string(),
            binding,
        });
        self
    }

    /// CPU and memory requests; the CPU limit is four times the request
    #[must_use]
    pub fn requests(mut self, cpu: &str, memory: &str) -> Self {
        self.cpu_requests = cpu.to_string();
        self.memory_requests = memory.to_string();
        self
    }

    #[must_use]
    pub fn topology(mut self, cores: u32, sockets: u32, threads: u32) -> Self {
        self.cores = cores;
        self.sockets = sockets;
        self.threads = threads;
        self
    }

    /// Pin to an availability zone
    #[must_use]
    pub fn zone(mut self, zone: &str) -> Self {
        self.zone = Some(zone.to_string());
        self
    }

    /// Pin to a node
    #[must_use]
    pub fn node(mut self, node: &str) -> Self {
        self.node_name = Some(node.to_string());
        self
    }

    /// Password for `cloud-user`; random when unset
    #[must_use]
    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    #[must_use]
    pub fn ssh_key(mut self, key: &str) -> Self {
        self.ssh_key = key.to_string();
        self
    }

    fn network_json(&self, net: &VmNetwork) -> (Value, Value) {
        let (network, binding) = match &net.binding {
            NetworkBinding::Masquerade => (
                json!({ "name": net.name, "pod": {} }),
                ("masquerade", json!({})),
            ),
            NetworkBinding::Bridge { nad } => {
                let nad = nad.as_deref().unwrap_or(&net.name);
                (
                    json!({
                        "name": net.name,
                        "multus": { "networkName": format!("{}/{}", self.namespace, nad) }
                    }),
                    ("bridge", json!({})),
                )
            }
        };

        let mut iface = Map::new();
        iface.insert("name".to_string(), json!(net.name));
        iface.insert("model".to_string(), json!("virtio"));
        iface.insert(binding.0.to_string(), binding.1);
        (network, Value::Object(iface))
    }

    fn instance_spec(&self, volume_names: &[String]) -> Value {
        let mut disks = Vec::new();
        let mut volumes = Vec::new();

        for (order, name) in (1_u32..).zip(volume_names) {
            disks.push(json!({ "name": name, "disk": { "bus": "virtio" }, "bootOrder": order }));
            volumes.push(json!({ "name": name, "dataVolume": { "name": name } }));
        }

        let password = self
            .password
            .clone()
            .unwrap_or_else(|| random_password(3));
        disks.push(json!({ "name": CLOUD_INIT_VOLUME, "disk": { "bus": "virtio" } }));
        volumes.push(json!({
            "name": CLOUD_INIT_VOLUME,
            "cloudInitNoCloud": { "userData": cloud_init_user_data(&password, &self.ssh_key) }
        }));

        let (networks, interfaces): (Vec<Value>, Vec<Value>) =
            self.networks.iter().map(|n| self.network_json(n)).unzip();

        let mut spec = json!({
            "hostname": self.name,
            "domain": {
                "cpu": { "cores": self.cores, "sockets": self.sockets, "threads": self.threads },
                "devices": {
                    "disks": disks,
                    "interfaces": interfaces,
                    "networkInterfaceMultiqueue": true,
                    "rng": {},
                },
                "machine": { "type": MACHINE_TYPE },
                "resources": {
                    "requests": resource_list(&self.cpu_requests, &self.memory_requests, "", ""),
                    "limits": resource_list(&cpu_limits_from_requests(&self.cpu_requests), "", "", ""),
                },
            },
            "networks": networks,
            "volumes": volumes,
        });

        let mut node_selector = Map::new();
        if let Some(zone) = &self.zone {
            node_selector.insert(ZONE_LABEL.to_string(), json!(zone));
        }
        if let Some(node) = &self.node_name {
            node_selector.insert(HOSTNAME_LABEL.to_string(), json!(node));
        }
        if !node_selector.is_empty() {
            spec["nodeSelector"] = Value::Object(node_selector);
        }
        spec
    }

    /// Build the VirtualMachine object
    #[must_use]
    pub fn build(&self) -> DynamicObject {
        let volume_names: Vec<String> = (1..=self.data_volumes.len())
            .map(|n| format!("{}-{n}", self.name))
            .collect();
        let templates: Vec<Value> = self
            .data_volumes
            .iter()
            .zip(&volume_names)
            .map(|(dv, name)| dv.to_json(name))
            .collect();

        let mut spec = json!({
            "dataVolumeTemplates": templates,
            "template": {
                "metadata": {
                    "name": self.name,
                    "namespace": self.namespace,
                    "labels": self.labels,
                },
                "spec": self.instance_spec(&volume_names),
            }
        });
        match &self.run_strategy {
            Some(strategy) => spec["runStrategy"] = json!(strategy),
            None => spec["running"] = json!(self.running),
        }

        let mut vm = DynamicObject::new(&self.name, &virtual_machine_resource());
        vm.metadata = ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels.clone()),
            annotations: (!self.annotations.is_empty()).then(|| self.annotations.clone()),
            ..Default::default()
        };
        vm.data = json!({ "spec": spec });
        vm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> VirtualMachineFixture {
        VirtualMachineFixture::new("vm-e2e", "e2e")
            .data_volume(
                DataVolumeTemplate::from_pvc("os-images", "rhel9")
                    .access_mode("ReadWriteMany")
                    .storage("15Gi")
                    .volume_mode("Block")
                    .storage_class("az-a"),
            )
            .network("nic-0", NetworkBinding::Masquerade)
            .requests("250m", "2Gi")
            .zone("az-a")
            .password("abcd-efgh-ijkl")
    }

    #[test]
    fn test_resources() {
        let vm = virtual_machine_resource();
        assert_eq!(vm.api_version, "kubevirt.io/v1");
        assert_eq!(vm.plural, "virtualmachines");
        assert_eq!(virtual_machine_instance_resource().plural, "virtualmachineinstances");
    }

    #[test]
    fn test_vm_metadata_and_labels() {
        let vm = fixture().build();
        assert_eq!(vm.metadata.namespace.as_deref(), Some("e2e"));
        assert_eq!(vm.metadata.labels.unwrap()[DOMAIN_LABEL], "vm-e2e");
        assert_eq!(
            vm.data["spec"]["template"]["metadata"]["labels"][DOMAIN_LABEL],
            "vm-e2e"
        );
        assert_eq!(vm.data["spec"]["running"], true);
        assert!(vm.data["spec"].get("runStrategy").is_none());
    }

    #[test]
    fn test_data_volume_template_and_disks() {
        let vm = fixture().build();
        let spec = &vm.data["spec"];

        let dv = &spec["dataVolumeTemplates"][0];
        assert_eq!(dv["metadata"]["name"], "vm-e2e-1");
        assert_eq!(dv["spec"]["source"]["pvc"]["name"], "rhel9");
        assert_eq!(dv["spec"]["storage"]["resources"]["requests"]["storage"], "15Gi");
        assert_eq!(dv["spec"]["storage"]["volumeMode"], "Block");
        assert_eq!(dv["spec"]["storage"]["storageClassName"], "az-a");

        let vmi = &spec["template"]["spec"];
        let disks = vmi["domain"]["devices"]["disks"].as_array().unwrap();
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0]["bootOrder"], 1);
        assert_eq!(disks[1]["name"], CLOUD_INIT_VOLUME);
        assert!(disks[1].get("bootOrder").is_none());
        assert_eq!(vmi["volumes"][0]["dataVolume"]["name"], "vm-e2e-1");
    }

    #[test]
    fn test_domain_resources_and_placement() {
        let vm = fixture().build();
        let vmi = &vm.data["spec"]["template"]["spec"];

        assert_eq!(vmi["hostname"], "vm-e2e");
        assert_eq!(vmi["domain"]["machine"]["type"], MACHINE_TYPE);
        assert_eq!(vmi["domain"]["resources"]["requests"]["cpu"], "250m");
        assert_eq!(vmi["domain"]["resources"]["requests"]["memory"], "2Gi");
        assert_eq!(vmi["domain"]["resources"]["limits"]["cpu"], "1");
        assert_eq!(vmi["nodeSelector"][ZONE_LABEL], "az-a");
        assert!(vmi["nodeSelector"].get(HOSTNAME_LABEL).is_none());
    }

    #[test]
    fn test_networks() {
        let vm = VirtualMachineFixture::new("vm", "ns")
            .network("nic-0", NetworkBinding::Masquerade)
            .network("nic-1", NetworkBinding::Bridge { nad: None })
            .network(
                "nic-2",
                NetworkBinding::Bridge {
                    nad: Some("vlan-10".to_string()),
                },
            )
            .build();
        let vmi = &vm.data["spec"]["template"]["spec"];

        assert!(vmi["networks"][0]["pod"].is_object());
        assert_eq!(vmi["networks"][1]["multus"]["networkName"], "ns/nic-1");
        assert_eq!(vmi["networks"][2]["multus"]["networkName"], "ns/vlan-10");

        let ifaces = &vmi["domain"]["devices"]["interfaces"];
        assert!(ifaces[0]["masquerade"].is_object());
        assert!(ifaces[1]["bridge"].is_object());
        assert_eq!(ifaces[2]["model"], "virtio");
        assert!(vmi.get("nodeSelector").is_none());
    }

    #[test]
    fn test_cloud_init() {
        let vm = fixture().ssh_key("ssh-ed25519 AAAA").build();
        let user_data = vm.data["spec"]["template"]["spec"]["volumes"][1]["cloudInitNoCloud"]
            ["userData"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(user_data.starts_with("#cloud-config\nuser: cloud-user\n"));
        assert!(user_data.contains("password: 'abcd-efgh-ijkl'"));
        assert!(user_data.contains("  - 'ssh-ed25519 AAAA'"));
    }

    #[test]
    fn test_run_strategy_replaces_running() {
        let vm = fixture().run_strategy("Always").build();
        assert_eq!(vm.data["spec"]["runStrategy"], "Always");
        assert!(vm.data["spec"].get("running").is_none());
    }

    #[test]
    fn test_random_password_shape() {
        let password = random_password(3);
        let parts: Vec<&str> = password.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 4));
        assert_ne!(random_password(3), password);
    }

    #[test]
    fn test_running_patch() {
        assert_eq!(running_patch(false), json!({ "spec": { "running": false } }));
    }
}
