//! Construction of the admission webhook configuration objects installed for a description.
//!
//! A managed configuration object always holds exactly one webhook entry. The entry is a pure
//! function of the description, the owner namespace, the namespace scope and the CA bundle, it
//! never depends on the previous state of the object.
use k8s_openapi::{
    ByteString,
    api::admissionregistration::v1::{
        MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
        ValidatingWebhookConfiguration, WebhookClientConfig,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::api::ObjectMeta;

use crate::{
    descriptor::{WebhookAdmissionType, WebhookDescription},
    store::ClusterObject,
};

/// Everything a webhook entry is built from, apart from the description itself.
#[derive(Clone, Copy, Debug)]
pub struct WebhookEnvironment<'a> {
    /// Namespace of the service serving the webhook, which is the namespace of the owner.
    pub service_namespace: &'a str,

    /// Restricts the webhook to the namespaces the owner is scoped to.
    pub namespace_selector: &'a LabelSelector,

    /// PEM encoded CA certificates, embedded verbatim.
    pub ca_bundle: &'a [u8],
}

/// An admission webhook configuration kind managed on behalf of an owner.
pub trait ManagedWebhookConfiguration: ClusterObject {
    const ADMISSION_TYPE: WebhookAdmissionType;

    /// Creates an object without any webhook entries.
    fn from_metadata(metadata: ObjectMeta) -> Self;

    /// Replaces all webhook entries with a single entry built from `description`.
    fn set_webhook(&mut self, description: &WebhookDescription, environment: &WebhookEnvironment);

    /// The client config of the first webhook entry.
    fn client_config(&self) -> Option<&WebhookClientConfig>;
}

impl ManagedWebhookConfiguration for ValidatingWebhookConfiguration {
    const ADMISSION_TYPE: WebhookAdmissionType = WebhookAdmissionType::Validating;

    fn from_metadata(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            webhooks: None,
        }
    }

    fn set_webhook(&mut self, description: &WebhookDescription, environment: &WebhookEnvironment) {
        self.webhooks = Some(vec![ValidatingWebhook {
            name: description.generate_name.clone(),
            rules: Some(description.rules.clone()),
            failure_policy: description.failure_policy.clone(),
            match_policy: description.match_policy.clone(),
            object_selector: description.object_selector.clone(),
            side_effects: description.side_effects.clone(),
            timeout_seconds: description.timeout_seconds,
            admission_review_versions: description.admission_review_versions.clone(),
            namespace_selector: Some(environment.namespace_selector.clone()),
            client_config: webhook_client_config(description, environment),
            ..Default::default()
        }]);
    }

    fn client_config(&self) -> Option<&WebhookClientConfig> {
        self.webhooks
            .as_ref()
            .and_then(|webhooks| webhooks.first())
            .map(|webhook| &webhook.client_config)
    }
}

impl ManagedWebhookConfiguration for MutatingWebhookConfiguration {
    const ADMISSION_TYPE: WebhookAdmissionType = WebhookAdmissionType::Mutating;

    fn from_metadata(metadata: ObjectMeta) -> Self {
        Self {
            metadata,
            webhooks: None,
        }
    }

    fn set_webhook(&mut self, description: &WebhookDescription, environment: &WebhookEnvironment) {
        self.webhooks = Some(vec![MutatingWebhook {
            name: description.generate_name.clone(),
            rules: Some(description.rules.clone()),
            failure_policy: description.failure_policy.clone(),
            match_policy: description.match_policy.clone(),
            object_selector: description.object_selector.clone(),
            side_effects: description.side_effects.clone(),
            timeout_seconds: description.timeout_seconds,
            admission_review_versions: description.admission_review_versions.clone(),
            reinvocation_policy: description.reinvocation_policy.clone(),
            namespace_selector: Some(environment.namespace_selector.clone()),
            client_config: webhook_client_config(description, environment),
            ..Default::default()
        }]);
    }

    fn client_config(&self) -> Option<&WebhookClientConfig> {
        self.webhooks
            .as_ref()
            .and_then(|webhooks| webhooks.first())
            .map(|webhook| &webhook.client_config)
    }
}

/// Returns the client config pointing the API server at the service of the webhook deployment.
fn webhook_client_config(
    description: &WebhookDescription,
    environment: &WebhookEnvironment,
) -> WebhookClientConfig {
    WebhookClientConfig {
        service: Some(ServiceReference {
            name: description.service_name(),
            namespace: environment.service_namespace.to_owned(),
            path: description.webhook_path.clone(),
            port: Some(description.container_port),
        }),
        // ByteString takes care of the base64 encoding
        ca_bundle: Some(ByteString(environment.ca_bundle.to_vec())),
        url: None,
    }
}
