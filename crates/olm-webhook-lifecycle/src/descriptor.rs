//! The desired state of a single admission webhook, as declared by its owner.
use k8s_openapi::{
    api::admissionregistration::v1::RuleWithOperations,
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The port the webhook service listens on if the description doesn't set one.
pub const DEFAULT_CONTAINER_PORT: i32 = 443;

/// Which admission webhook configuration a [`WebhookDescription`] is installed as.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
pub enum WebhookAdmissionType {
    #[serde(rename = "ValidatingAdmissionWebhook")]
    #[strum(serialize = "ValidatingAdmissionWebhook")]
    Validating,

    #[serde(rename = "MutatingAdmissionWebhook")]
    #[strum(serialize = "MutatingAdmissionWebhook")]
    Mutating,
}

/// Describes one logical admission webhook.
///
/// A description is identified by its `generate_name`. The same description can be installed
/// once per namespace its owner is installed into, every installation resulting in a separate
/// webhook configuration object with a cluster generated name.
///
/// The field order is significant: [`hash_webhook_description`](crate::hash::hash_webhook_description)
/// hashes the serialized form, so reordering fields changes every stored hash.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDescription {
    pub generate_name: String,

    #[serde(rename = "type")]
    pub admission_type: WebhookAdmissionType,

    /// Name of the deployment serving the webhook. The backing service is expected to be
    /// called `<deploymentName>-service`.
    pub deployment_name: String,

    #[serde(default = "default_container_port")]
    pub container_port: i32,

    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,

    #[serde(default)]
    pub failure_policy: Option<String>,

    #[serde(default)]
    pub match_policy: Option<String>,

    #[serde(default)]
    pub object_selector: Option<LabelSelector>,

    pub side_effects: String,

    #[serde(default)]
    pub timeout_seconds: Option<i32>,

    pub admission_review_versions: Vec<String>,

    /// Only used for mutating webhooks.
    #[serde(default)]
    pub reinvocation_policy: Option<String>,

    #[serde(default)]
    pub webhook_path: Option<String>,

    /// Name of a CRD whose conversion webhook is served by this webhook's endpoint.
    #[serde(default)]
    pub conversion_crd: Option<String>,
}

fn default_container_port() -> i32 {
    DEFAULT_CONTAINER_PORT
}

impl WebhookDescription {
    /// The name of the service fronting the webhook deployment.
    pub fn service_name(&self) -> String {
        format!("{deployment}-service", deployment = self.deployment_name)
    }

    /// Returns the CRD to bind to this webhook. An empty name is treated as no name at all.
    pub fn conversion_crd(&self) -> Option<&str> {
        self.conversion_crd.as_deref().filter(|name| !name.is_empty())
    }
}
