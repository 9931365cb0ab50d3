//! Installs the admission webhooks declared by OLM managed operators.
//!
//! A [`WebhookReconciler`] takes the [webhook descriptions](WebhookDescription) of an owner
//! (usually a ClusterServiceVersion), checks them against the [safety policy](policy), resolves
//! the namespaces the owner is scoped to and creates or updates one Validating- or
//! MutatingWebhookConfiguration per description and owner. Installed objects are identified by
//! their labels and carry a [hash](hash) of the description they were reconciled from, so that
//! drift is detectable. Descriptions naming a CRD additionally get the CRD's
//! [conversion](conversion) wired to the webhook's service.
//!
//! All cluster access goes through the [`ClusterStore`](store::ClusterStore) and
//! [`OperatorGroupLister`](store::OperatorGroupLister) traits, implemented by
//! [`KubeStore`](store::KubeStore) for a real cluster and
//! [`InMemoryStore`](store::InMemoryStore) for tests and dry runs.

pub mod cli;
pub mod configuration;
pub mod conversion;
pub mod descriptor;
pub mod hash;
pub mod labels;
pub mod logging;
pub mod operator_group;
pub mod owner;
pub mod policy;
pub mod reconciler;
pub mod store;

pub use descriptor::{WebhookAdmissionType, WebhookDescription};
pub use owner::Owner;
pub use reconciler::WebhookReconciler;

// External re-exports
pub use k8s_openapi;
pub use kube;
