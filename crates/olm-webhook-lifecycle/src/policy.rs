//! Safety checks for webhook descriptions declared by tenants.
//!
//! A webhook installed on behalf of an operator must never be able to intercept requests for
//! OLM's own resources or for the admission webhook configurations themselves. Either would
//! allow a single misbehaving operator to lock everybody (including OLM) out of the cluster.
use std::collections::BTreeSet;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    descriptor::WebhookDescription,
    labels::{LabelValue, LabelValueError},
};

/// The API group of OLM's own management plane.
pub const OLM_API_GROUP: &str = "operators.coreos.com";

/// The API group of admission webhook configurations.
pub const ADMISSION_REGISTRATION_API_GROUP: &str = "admissionregistration.k8s.io";

const WILDCARD: &str = "*";

/// A rule set rejected by [`validate_rules`].
///
/// The display output of every variant is the literal, user facing failure reason.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Snafu)]
pub enum PolicyViolation {
    #[snafu(display("Webhook rules cannot include all groups"))]
    AllGroups,

    #[snafu(display("Webhook rules cannot include the OLM group"))]
    OlmGroup,

    #[snafu(display(
        "Webhook rules cannot include MutatingWebhookConfiguration or ValidatingWebhookConfiguration resources"
    ))]
    WebhookConfigurationResources,
}

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum DescriptionError {
    #[snafu(display("webhook descriptions must have a non-empty generateName"))]
    EmptyGenerateName,

    #[snafu(display("webhook description {generate_name:?} has unsafe rules"))]
    UnsafeRules {
        source: PolicyViolation,
        generate_name: String,
    },

    #[snafu(display("webhook description generateName {generate_name:?} is not a valid label value"))]
    InvalidGenerateName {
        source: LabelValueError,
        generate_name: String,
    },

    #[snafu(display(
        "webhook descriptions must have unique generateName values, {generate_name:?} is used more than once"
    ))]
    DuplicateGenerateName { generate_name: String },
}

#[derive(Debug, PartialEq, Eq)]
enum ApiGroup<'a> {
    All,
    Olm,
    AdmissionRegistration,
    Other(&'a str),
}

impl<'a> From<&'a str> for ApiGroup<'a> {
    fn from(group: &'a str) -> Self {
        match group {
            WILDCARD => Self::All,
            OLM_API_GROUP => Self::Olm,
            ADMISSION_REGISTRATION_API_GROUP => Self::AdmissionRegistration,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Resource<'a> {
    All,
    WebhookConfiguration,
    Other(&'a str),
}

impl<'a> From<&'a str> for Resource<'a> {
    fn from(resource: &'a str) -> Self {
        match resource {
            WILDCARD => Self::All,
            "MutatingWebhookConfiguration"
            | "ValidatingWebhookConfiguration"
            | "mutatingwebhookconfigurations"
            | "validatingwebhookconfigurations" => Self::WebhookConfiguration,
            other => Self::Other(other),
        }
    }
}

/// Checks a single rule. The checks run in a fixed order, so the first matching one decides
/// the reported violation.
fn validate_rule(rule: &RuleWithOperations) -> Result<(), PolicyViolation> {
    let groups: Vec<ApiGroup<'_>> = rule
        .api_groups
        .iter()
        .flatten()
        .map(|group| ApiGroup::from(group.as_str()))
        .collect();

    ensure!(!groups.contains(&ApiGroup::All), AllGroupsSnafu);
    ensure!(!groups.contains(&ApiGroup::Olm), OlmGroupSnafu);

    if groups.contains(&ApiGroup::AdmissionRegistration) {
        let touches_webhook_configurations = rule
            .resources
            .iter()
            .flatten()
            .map(|resource| Resource::from(resource.as_str()))
            .any(|resource| match resource {
                Resource::All | Resource::WebhookConfiguration => true,
                Resource::Other(_) => false,
            });

        ensure!(
            !touches_webhook_configurations,
            WebhookConfigurationResourcesSnafu
        );
    }

    Ok(())
}

/// Rejects rule sets which would let a webhook intercept all API groups, the OLM API group or
/// the admission webhook configurations themselves.
///
/// Rules are checked in order and the first violation is returned.
pub fn validate_rules(rules: &[RuleWithOperations]) -> Result<(), PolicyViolation> {
    rules.iter().try_for_each(validate_rule)
}

/// Validates a complete set of webhook descriptions declared by a single owner.
///
/// In addition to [`validate_rules`], every `generateName` must be usable as a label value
/// (it is the logical identity of the installed objects) and must be unique within the set.
pub fn validate_descriptions<'a>(
    descriptions: impl IntoIterator<Item = &'a WebhookDescription>,
) -> Result<(), DescriptionError> {
    let mut seen = BTreeSet::new();

    for description in descriptions {
        let generate_name = &description.generate_name;

        ensure!(!generate_name.is_empty(), EmptyGenerateNameSnafu);
        LabelValue::try_from(generate_name.as_str())
            .with_context(|_| InvalidGenerateNameSnafu { generate_name })?;
        validate_rules(&description.rules).with_context(|_| UnsafeRulesSnafu { generate_name })?;

        ensure!(
            seen.insert(generate_name.as_str()),
            DuplicateGenerateNameSnafu { generate_name }
        );
    }

    Ok(())
}
