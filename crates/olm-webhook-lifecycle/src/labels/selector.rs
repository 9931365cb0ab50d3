use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use snafu::Snafu;

type Result<T, E = SelectorError> = std::result::Result<T, E>;

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum SelectorError {
    #[snafu(display("label selector with binary operator {operator:?} must have values"))]
    LabelSelectorBinaryOperatorWithoutValues { operator: String },

    #[snafu(display("label selector with unary operator {operator:?} must not have values"))]
    LabelSelectorUnaryOperatorWithValues { operator: String },

    #[snafu(display("labelSelector has an invalid operator {operator:?}"))]
    LabelSelectorInvalidOperator { operator: String },
}

/// This trait extends the functionality of [`LabelSelector`].
pub trait LabelSelectorExt {
    /// Converts the selector into a string that can be used in Kubernetes list calls. Fails if
    /// the selector contains illegal requirements (e.g. an `Exists` operator with values).
    fn to_query_string(&self) -> Result<String>;

    /// Evaluates the selector against a set of labels the same way the API server does.
    /// An empty selector matches everything.
    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool>;
}

impl LabelSelectorExt for LabelSelector {
    fn to_query_string(&self) -> Result<String> {
        // match_labels are the equivalent of the "In" operator with a single value. Each pair
        // is rendered as "key=value".
        let labels = self
            .match_labels
            .iter()
            .flatten()
            .map(|(key, value)| format!("{key}={value}"));

        let expressions = self
            .match_expressions
            .iter()
            .flatten()
            .map(requirement_to_query_string)
            .collect::<Result<Vec<_>>>()?;

        Ok(labels.chain(expressions).collect::<Vec<_>>().join(","))
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool> {
        let labels_match = self
            .match_labels
            .iter()
            .flatten()
            .all(|(key, value)| labels.get(key) == Some(value));

        if !labels_match {
            return Ok(false);
        }

        for requirement in self.match_expressions.iter().flatten() {
            if !requirement_matches(requirement, labels)? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn values_of(requirement: &LabelSelectorRequirement) -> &[String] {
    requirement.values.as_deref().unwrap_or_default()
}

fn requirement_to_query_string(requirement: &LabelSelectorRequirement) -> Result<String> {
    let key = &requirement.key;
    let values = values_of(requirement);

    match requirement.operator.as_str() {
        // In and NotIn can be handled the same, they both map to a simple "key OPERATOR (values)" string
        operator @ ("In" | "NotIn") => {
            if values.is_empty() {
                return LabelSelectorBinaryOperatorWithoutValuesSnafu { operator }.fail();
            }

            Ok(format!(
                "{key} {operator} ({values})",
                operator = operator.to_ascii_lowercase(),
                values = values.join(", ")
            ))
        }
        // "Exists" is just the key, "DoesNotExist" is the key preceded by an exclamation mark
        operator @ ("Exists" | "DoesNotExist") => {
            if !values.is_empty() {
                return LabelSelectorUnaryOperatorWithValuesSnafu { operator }.fail();
            }

            match operator {
                "Exists" => Ok(key.to_owned()),
                _ => Ok(format!("!{key}")),
            }
        }
        operator => LabelSelectorInvalidOperatorSnafu { operator }.fail(),
    }
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool> {
    // Reuse the validation of the query string rendering
    requirement_to_query_string(requirement)?;

    let value = labels.get(&requirement.key);
    let values = values_of(requirement);

    Ok(match requirement.operator.as_str() {
        "In" => value.is_some_and(|value| values.contains(value)),
        "NotIn" => value.is_none_or(|value| !values.contains(value)),
        "Exists" => value.is_some(),
        _ => value.is_none(),
    })
}
