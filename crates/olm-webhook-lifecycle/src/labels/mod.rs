//! Label keys and the label based identity of installed webhook configurations.
//!
//! Webhook configurations are created with a cluster generated name, so the name can never be
//! used to find an installed configuration again. Instead every configuration carries a set of
//! labels, and the pair of owner labels plus [`WEBHOOK_DESC_KEY`] is its stable, logical
//! identity. The keys are a published contract: garbage collectors and drift detectors outside
//! of this crate rely on them.
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use snafu::{ResultExt, Snafu, ensure};

use crate::{descriptor::WebhookDescription, hash::hash_webhook_description, owner::Owner};

mod selector;
mod value;

pub use selector::{LabelSelectorExt, SelectorError};
pub use value::{LabelValue, LabelValueError};

/// Holds the `generateName` of the webhook description an object was created from.
pub const WEBHOOK_DESC_KEY: &str = "olm.webhook-description-generate-name";

/// Holds the hash of the webhook description an object was last reconciled from.
pub const WEBHOOK_HASH_KEY: &str = "olm.webhook-description-hash";

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum WebhookKeyError {
    #[snafu(display("webhook description generateName must not be empty"))]
    EmptyGenerateName,

    #[snafu(display("invalid webhook description generateName {generate_name:?}"))]
    InvalidGenerateName {
        source: LabelValueError,
        generate_name: String,
    },
}

/// The logical identity of a webhook description installed by an owner.
///
/// This is never a handle to a specific object. Zero or more objects (one per namespace the
/// owner is installed into) can carry the same key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookKey {
    owner_labels: BTreeMap<String, String>,
    generate_name: LabelValue,
}

impl WebhookKey {
    pub fn new(owner: &Owner, generate_name: &str) -> Result<Self, WebhookKeyError> {
        ensure!(!generate_name.is_empty(), EmptyGenerateNameSnafu);
        let generate_name =
            LabelValue::try_from(generate_name).context(InvalidGenerateNameSnafu { generate_name })?;

        Ok(Self {
            owner_labels: owner.labels(),
            generate_name,
        })
    }

    pub fn for_description(
        owner: &Owner,
        description: &WebhookDescription,
    ) -> Result<Self, WebhookKeyError> {
        Self::new(owner, &description.generate_name)
    }

    pub fn generate_name(&self) -> &str {
        &self.generate_name
    }

    /// The labels identifying all objects with this key.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.owner_labels.clone();
        labels.insert(WEBHOOK_DESC_KEY.to_owned(), self.generate_name.to_string());
        labels
    }

    /// An equality based selector matching all objects with this key.
    pub fn selector(&self) -> LabelSelector {
        LabelSelector {
            match_labels: Some(self.labels()),
            match_expressions: None,
        }
    }
}

/// Returns the complete label set of an object reconciled from `description`: the identity
/// labels of `key` plus the current description hash.
pub fn webhook_labels(key: &WebhookKey, description: &WebhookDescription) -> BTreeMap<String, String> {
    let mut labels = key.labels();
    labels.insert(
        WEBHOOK_HASH_KEY.to_owned(),
        hash_webhook_description(description),
    );
    labels
}

/// Merges `labels` into the existing labels of an object. Labels set by somebody else survive.
pub fn merge_labels(
    existing: &mut Option<BTreeMap<String, String>>,
    labels: BTreeMap<String, String>,
) {
    existing.get_or_insert_with(BTreeMap::new).extend(labels);
}
