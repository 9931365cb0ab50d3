//! Wires the version conversion of a CustomResourceDefinition to an installed admission webhook.
//!
//! Binding is a best-effort side effect of a successful webhook reconciliation. Failures never
//! fail the reconciliation itself, instead they are logged and reported as a
//! [`ConversionOutcome`].
use k8s_openapi::{
    api::admissionregistration::v1::WebhookClientConfig as AdmissionClientConfig,
    apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceConversion, CustomResourceDefinition, ServiceReference, WebhookClientConfig,
        WebhookConversion,
    },
};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::store::{self, ClusterStore};

/// The HTTP path every conversion webhook is served at.
pub const CONVERSION_WEBHOOK_PATH: &str = "/convert";

/// The strategy put onto bound CRDs.
pub const WEBHOOK_CONVERSION_STRATEGY: &str = "Webhook";

const DEFAULT_CONVERSION_REVIEW_VERSIONS: &[&str] = &["v1"];

#[derive(Debug, Snafu)]
pub enum ConversionError {
    #[snafu(display("failed to get CustomResourceDefinition"))]
    GetCrd { source: store::Error },

    #[snafu(display("failed to update CustomResourceDefinition"))]
    UpdateCrd { source: store::Error },

    #[snafu(display("the webhook client config has no service reference"))]
    MissingServiceReference,
}

/// The result of binding a CRD to a webhook.
#[derive(Debug)]
pub enum ConversionOutcome {
    /// The description names no CRD.
    Skipped,

    /// The CRD now converts through the webhook.
    Bound { crd_name: String },

    /// The CRD doesn't exist (yet). It is bound on a later reconciliation.
    CrdNotFound { crd_name: String },

    /// Binding failed. The webhook configuration itself is unaffected.
    Failed {
        crd_name: String,
        source: ConversionError,
    },
}

impl ConversionOutcome {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }
}

/// Points the conversion webhook of the CRD called `crd_name` at the service in `client_config`.
#[instrument(skip(store, client_config))]
pub async fn bind_conversion(
    store: &(impl ClusterStore + ?Sized),
    crd_name: &str,
    client_config: &AdmissionClientConfig,
) -> ConversionOutcome {
    match try_bind_conversion(store, crd_name, client_config).await {
        Ok(true) => {
            tracing::info!(k8s.crd.name = crd_name, "bound CRD conversion to webhook");
            ConversionOutcome::Bound {
                crd_name: crd_name.to_owned(),
            }
        }
        Ok(false) => {
            tracing::info!(
                k8s.crd.name = crd_name,
                "CRD not found, skipping conversion binding"
            );
            ConversionOutcome::CrdNotFound {
                crd_name: crd_name.to_owned(),
            }
        }
        Err(err) => {
            tracing::warn!(
                k8s.crd.name = crd_name,
                error = &err as &dyn std::error::Error,
                "failed to bind CRD conversion to webhook"
            );
            ConversionOutcome::Failed {
                crd_name: crd_name.to_owned(),
                source: err,
            }
        }
    }
}

/// Returns `false` if the CRD doesn't exist.
async fn try_bind_conversion(
    store: &(impl ClusterStore + ?Sized),
    crd_name: &str,
    client_config: &AdmissionClientConfig,
) -> Result<bool, ConversionError> {
    let Some(mut crd) = store
        .get::<CustomResourceDefinition>(crd_name)
        .await
        .context(GetCrdSnafu)?
    else {
        return Ok(false);
    };

    apply_conversion_webhook(&mut crd, client_config)?;
    store.update(&crd).await.context(UpdateCrdSnafu)?;

    Ok(true)
}

/// Sets the webhook conversion strategy on `crd`, using the service and CA bundle of
/// `client_config` and the fixed [`CONVERSION_WEBHOOK_PATH`].
///
/// Unknown fields are no longer preserved, which webhook conversion requires.
pub fn apply_conversion_webhook(
    crd: &mut CustomResourceDefinition,
    client_config: &AdmissionClientConfig,
) -> Result<(), ConversionError> {
    let service = client_config
        .service
        .as_ref()
        .context(MissingServiceReferenceSnafu)?;

    let conversion_review_versions = crd
        .spec
        .conversion
        .as_ref()
        .and_then(|conversion| conversion.webhook.as_ref())
        .map(|webhook| webhook.conversion_review_versions.clone())
        .filter(|versions| !versions.is_empty())
        .unwrap_or_else(|| {
            DEFAULT_CONVERSION_REVIEW_VERSIONS
                .iter()
                .map(|version| version.to_string())
                .collect()
        });

    crd.spec.conversion = Some(CustomResourceConversion {
        strategy: WEBHOOK_CONVERSION_STRATEGY.to_owned(),
        webhook: Some(WebhookConversion {
            client_config: Some(WebhookClientConfig {
                service: Some(ServiceReference {
                    name: service.name.clone(),
                    namespace: service.namespace.clone(),
                    path: Some(CONVERSION_WEBHOOK_PATH.to_owned()),
                    port: service.port,
                }),
                ca_bundle: client_config.ca_bundle.clone(),
                url: None,
            }),
            conversion_review_versions,
        }),
    });
    crd.spec.preserve_unknown_fields = Some(false);

    Ok(())
}
