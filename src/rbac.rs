//! ClusterRole construction for grant files
//!
//! Grant files are ordinary ClusterRole manifests. They are usually written by
//! hand under `testdata/`, but a test can also build one and write it out:
//!
//! ```ignore
//! let role = ClusterRoleBuilder::new("node-lister")
//!     .can_list(&["nodes"])
//!     .can_get(&["nodes"])
//!     .build();
//! std::fs::write(&path, rbac::to_yaml(&role)?)?;
//! ```

use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Fluent builder for ClusterRoles
#[derive(Debug, Clone)]
pub struct ClusterRoleBuilder {
    name: String,
    rules: Vec<PolicyRule>,
}

impl ClusterRoleBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
        }
    }

    /// One rule per API group the resources belong to
    fn add_rule(&mut self, verbs: &[&str], resources: &[&str]) {
        let mut by_group: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for res in resources {
            by_group
                .entry(api_group_for_resource(res))
                .or_default()
                .push((*res).to_string());
        }

        for (group, group_resources) in by_group {
            self.rules.push(PolicyRule {
                api_groups: Some(vec![group]),
                resources: Some(group_resources),
                verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
                ..Default::default()
            });
        }
    }

    #[must_use]
    pub fn can_get(mut self, resources: &[&str]) -> Self {
        self.add_rule(&["get"], resources);
        self
    }

    #[must_use]
    pub fn can_list(mut self, resources: &[&str]) -> Self {
        self.add_rule(&["list"], resources);
        self
    }

    #[must_use]
    pub fn can_watch(mut self, resources: &[&str]) -> Self {
        self.add_rule(&["watch"], resources);
        self
    }

    /// get, list, watch, create, update, patch and delete
    #[must_use]
    pub fn can_all(mut self, resources: &[&str]) -> Self {
        self.add_rule(
            &["get", "list", "watch", "create", "update", "patch", "delete"],
            resources,
        );
        self
    }

    /// Custom verbs for the specified resources
    #[must_use]
    pub fn can(mut self, verbs: &[&str], resources: &[&str]) -> Self {
        self.add_rule(verbs, resources);
        self
    }

    /// Rule with an explicit API group, for resources the lookup table does not know
    #[must_use]
    pub fn for_api_group(mut self, api_group: &str, verbs: &[&str], resources: &[&str]) -> Self {
        self.rules.push(PolicyRule {
            api_groups: Some(vec![api_group.to_string()]),
            resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
            verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
            ..Default::default()
        });
        self
    }

    #[must_use]
    pub fn build(self) -> ClusterRole {
        ClusterRole {
            metadata: ObjectMeta {
                name: Some(self.name),
                ..Default::default()
            },
            rules: Some(self.rules),
            ..Default::default()
        }
    }
}

/// Serialize a ClusterRole as a grant file
pub fn to_yaml(role: &ClusterRole) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(role)
}

/// API group a plural resource name belongs to
#[allow(clippy::match_same_arms)]
pub fn api_group_for_resource(resource: &str) -> String {
    match resource {
        "pods"
        | "pods/log"
        | "services"
        | "configmaps"
        | "secrets"
        | "persistentvolumeclaims"
        | "serviceaccounts"
        | "namespaces"
        | "nodes"
        | "events"
        | "endpoints"
        | "persistentvolumes" => String::new(),
        "deployments" | "statefulsets" | "daemonsets" | "replicasets" | "controllerrevisions" => {
            "apps".to_string()
        }
        "jobs" | "cronjobs" => "batch".to_string(),
        "roles" | "rolebindings" | "clusterroles" | "clusterrolebindings" => {
            "rbac.authorization.k8s.io".to_string()
        }
        "virtualmachines"
        | "virtualmachineinstances"
        | "virtualmachineinstancemigrations"
        | "virtualmachines/start"
        | "virtualmachines/stop"
        | "virtualmachines/restart" => "kubevirt.io".to_string(),
        "virtualmachineinstances/console" | "virtualmachineinstances/vnc" => {
            "subresources.kubevirt.io".to_string()
        }
        "datavolumes" => "cdi.kubevirt.io".to_string(),
        // Unknown resources go to core
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::GrantFile;

    #[test]
    fn test_rules_split_by_group() {
        let role = ClusterRoleBuilder::new("vm-controller")
            .can_all(&["virtualmachines", "pods", "virtualmachineinstances"])
            .build();

        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 2);
        // BTreeMap order: core ("") first
        assert_eq!(rules[0].api_groups, Some(vec![String::new()]));
        assert_eq!(rules[0].resources, Some(vec!["pods".to_string()]));
        assert_eq!(rules[1].api_groups, Some(vec!["kubevirt.io".to_string()]));
        assert_eq!(rules[1].resources.as_ref().unwrap().len(), 2);
        assert!(rules[1].verbs.contains(&"patch".to_string()));
    }

    #[test]
    fn test_for_api_group() {
        let role = ClusterRoleBuilder::new("custom")
            .for_api_group("example.com", &["get"], &["widgets"])
            .build();
        let rule = &role.rules.unwrap()[0];
        assert_eq!(rule.api_groups, Some(vec!["example.com".to_string()]));
        assert_eq!(rule.verbs, vec!["get".to_string()]);
    }

    #[test]
    fn test_api_group_lookup() {
        assert_eq!(api_group_for_resource("nodes"), "");
        assert_eq!(api_group_for_resource("daemonsets"), "apps");
        assert_eq!(api_group_for_resource("datavolumes"), "cdi.kubevirt.io");
        assert_eq!(api_group_for_resource("unknown"), "");
    }

    #[test]
    fn test_yaml_loads_as_grant_file() {
        let role = ClusterRoleBuilder::new("node-lister")
            .can(&["get", "list"], &["nodes"])
            .build();
        let yaml = to_yaml(&role).unwrap();
        assert!(yaml.contains("kind: ClusterRole"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-lister.yaml");
        std::fs::write(&path, yaml).unwrap();

        let grant = GrantFile::load(&path).unwrap();
        assert_eq!(grant.role_name(), "node-lister");
        assert_eq!(grant.role().rules.as_ref().unwrap().len(), 1);
    }
}
