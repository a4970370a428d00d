//! Label selectors

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

/// Selector matching every label in `labels`
pub fn match_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> LabelSelector
where
    K: Into<String>,
    V: Into<String>,
{
    LabelSelector {
        match_labels: Some(
            labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Selector built from set-based requirements
pub fn match_expressions(requirements: Vec<LabelSelectorRequirement>) -> LabelSelector {
    LabelSelector {
        match_expressions: Some(requirements),
        ..Default::default()
    }
}

/// Set-based requirement such as `zone In (a, b)`
///
/// `operator` is one of `In`, `NotIn`, `Exists` or `DoesNotExist`. The last
/// two carry no values.
pub fn requirement(
    key: impl Into<String>,
    operator: impl Into<String>,
    values: &[&str],
) -> LabelSelectorRequirement {
    LabelSelectorRequirement {
        key: key.into(),
        operator: operator.into(),
        values: (!values.is_empty()).then(|| values.iter().map(|v| v.to_string()).collect()),
    }
}

/// Render a selector as the `labelSelector` query string the API server accepts
pub fn selector_string(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flat_map(BTreeMap::iter)
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    for req in selector.match_expressions.iter().flatten() {
        let values = req.values.as_deref().unwrap_or_default().join(",");
        let part = match req.operator.as_str() {
            "In" => format!("{} in ({values})", req.key),
            "NotIn" => format!("{} notin ({values})", req.key),
            "Exists" => req.key.clone(),
            "DoesNotExist" => format!("!{}", req.key),
            other => format!("{} {other} ({values})", req.key),
        };
        parts.push(part);
    }

    parts.join(",")
}
