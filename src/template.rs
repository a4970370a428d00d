//! Manifest templating
//!
//! Manifests under `testdata/` may reference values such as the test
//! namespace with `{{ namespace }}`. Rendering is strict: a referenced value
//! that was not supplied is an error rather than an empty string.
//!
//! ```
//! use node_e2e::template;
//! use minijinja::context;
//!
//! let yaml = template::render("namespace: {{ namespace }}", context! { namespace => "e2e" })?;
//! assert_eq!(yaml, "namespace: e2e");
//! # Ok::<(), node_e2e::template::TemplateError>(())
//! ```

use minijinja::{Environment, UndefinedBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Errors from manifest templating
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template render error: {0}")]
    Render(#[from] minijinja::Error),

    #[error("failed to read template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rendered manifest is not a valid object: {0}")]
    Decode(#[from] serde_yaml::Error),
}

/// Builtin globals whose names collide with common manifest values
const SHADOWING_GLOBALS: [&str; 4] = ["namespace", "range", "dict", "debug"];

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    // A missing `{{ namespace }}` must not fall back to the builtin function
    for name in SHADOWING_GLOBALS {
        env.remove_global(name);
    }
    env
}

/// Render a template string with `values`
pub fn render<S: Serialize>(template: &str, values: S) -> Result<String, TemplateError> {
    Ok(environment().render_str(template, values)?)
}

/// Render the template stored at `path`
pub fn render_file<S: Serialize>(path: &Path, values: S) -> Result<String, TemplateError> {
    let template = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    render(&template, values)
}

/// Render the template at `path` and decode the result as a Kubernetes object
///
/// ```ignore
/// let crb: ClusterRoleBinding =
///     template::decode_file(&path, context! { namespace => session.namespace() })?;
/// ```
pub fn decode_file<K, S>(path: &Path, values: S) -> Result<K, TemplateError>
where
    K: DeserializeOwned,
    S: Serialize,
{
    let rendered = render_file(path, values)?;
    Ok(serde_yaml::from_str(&rendered)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
    use minijinja::context;
    use std::collections::BTreeMap;

    const CRB_TEMPLATE: &str = "\
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: daemon-manager-binding
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: daemon-manager
subjects:
- kind: ServiceAccount
  name: daemon-manager
  namespace: {{ namespace }}
";

    #[test]
    fn test_render_substitutes_values() {
        let values = BTreeMap::from([("name", "web"), ("replicas", "3")]);
        let out = render("{{ name }}: {{ replicas }}\n", &values).unwrap();
        assert_eq!(out, "web: 3\n");
    }

    #[test]
    fn test_undefined_value_is_an_error() {
        let err = render("namespace: {{ namespace }}", context! {}).unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn test_builtin_names_do_not_fill_missing_values() {
        for template in ["{{ namespace }}", "{{ range }}", "{{ dict }}", "{{ debug }}"] {
            let err = render(template, context! { name => "x" }).unwrap_err();
            assert!(matches!(err, TemplateError::Render(_)), "{template}");
        }
    }

    #[test]
    fn test_missing_namespace_in_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crb.yaml");
        std::fs::write(&path, CRB_TEMPLATE).unwrap();

        let err = decode_file::<ClusterRoleBinding, _>(&path, context! {}).unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn test_decode_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crb.yaml");
        std::fs::write(&path, CRB_TEMPLATE).unwrap();

        let crb: ClusterRoleBinding =
            decode_file(&path, context! { namespace => "e2e-7f3a" }).unwrap();
        let subject = &crb.subjects.unwrap()[0];
        assert_eq!(subject.namespace.as_deref(), Some("e2e-7f3a"));
        assert_eq!(crb.role_ref.name, "daemon-manager");
    }

    #[test]
    fn test_render_file_missing() {
        let err = render_file(Path::new("/nonexistent/template.yaml"), context! {}).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/template.yaml"));
    }
}
