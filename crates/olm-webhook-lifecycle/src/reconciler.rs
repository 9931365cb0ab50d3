//! Reconciles the admission webhook configurations declared by an owner.
//!
//! Installed configurations are found by their labels (see [`WebhookKey`]), never by name. If
//! none exist for a description a new one is created, otherwise every existing instance is
//! overwritten with the current desired state. Each pass is idempotent and never retries, the
//! caller is expected to run it again on failure.
use k8s_openapi::{
    api::admissionregistration::v1::{
        MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{Resource, ResourceExt, api::ObjectMeta};
use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::{
    configuration::{ManagedWebhookConfiguration, WebhookEnvironment},
    conversion::{self, ConversionError, ConversionOutcome},
    descriptor::{WebhookAdmissionType, WebhookDescription},
    hash::hash_webhook_description,
    labels::{WEBHOOK_HASH_KEY, WebhookKey, WebhookKeyError, merge_labels, webhook_labels},
    operator_group::{self, resolve_scope},
    owner::Owner,
    policy::{DescriptionError, PolicyViolation, validate_descriptions, validate_rules},
    store::{self, ClusterStore, OperatorGroupLister, kind_of},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("webhook description {generate_name:?} has unsafe rules"))]
    UnsafeRules {
        source: PolicyViolation,
        generate_name: String,
    },

    #[snafu(display("invalid webhook descriptions"))]
    InvalidDescriptions { source: DescriptionError },

    #[snafu(display("failed to resolve the namespace scope of the owner"))]
    ResolveScope { source: operator_group::Error },

    #[snafu(display("failed to build the identity of the installed webhook configurations"))]
    InvalidWebhookKey { source: WebhookKeyError },

    #[snafu(display("failed to list {kind} objects for {generate_name:?}"))]
    ListConfigurations {
        source: store::Error,
        kind: String,
        generate_name: String,
    },

    #[snafu(display("failed to create {kind} for {generate_name:?}"))]
    CreateConfiguration {
        source: store::Error,
        kind: String,
        generate_name: String,
    },

    #[snafu(display("failed to update {kind} {name:?}"))]
    UpdateConfiguration {
        source: store::Error,
        kind: String,
        name: String,
    },
}

impl Error {
    /// The failure reason to put onto the status of the owner.
    ///
    /// Policy violations and scope resolution failures are reported literally, failures talking
    /// to the cluster are reported generically.
    pub fn status_reason(&self) -> String {
        match self {
            Self::UnsafeRules { source, .. }
            | Self::InvalidDescriptions {
                source: DescriptionError::UnsafeRules { source, .. },
            } => source.to_string(),
            Self::InvalidDescriptions { source } => source.to_string(),
            Self::ResolveScope { source } => source.to_string(),
            Self::InvalidWebhookKey { source } => source.to_string(),
            Self::ListConfigurations { .. }
            | Self::CreateConfiguration { .. }
            | Self::UpdateConfiguration { .. } => {
                "failed to install admission webhook configurations".to_owned()
            }
        }
    }
}

/// What happened to a single configuration object during a pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceAction {
    Created,
    Updated,
}

#[derive(Debug)]
pub struct ReconciledInstance {
    pub name: String,
    pub action: InstanceAction,
    pub conversion: ConversionOutcome,
}

/// The result of reconciling one webhook description.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub generate_name: String,
    pub admission_type: WebhookAdmissionType,
    pub instances: Vec<ReconciledInstance>,
}

impl ReconcileOutcome {
    pub fn created(&self) -> impl Iterator<Item = &str> {
        self.names_with(InstanceAction::Created)
    }

    pub fn updated(&self) -> impl Iterator<Item = &str> {
        self.names_with(InstanceAction::Updated)
    }

    fn names_with(&self, action: InstanceAction) -> impl Iterator<Item = &str> {
        self.instances
            .iter()
            .filter(move |instance| instance.action == action)
            .map(|instance| instance.name.as_str())
    }
}

/// Whether the installed configurations of a description match the description.
#[derive(Debug, Eq, PartialEq)]
pub enum InstallStatus {
    /// No configuration object exists for the description.
    Missing,

    /// The listed objects were reconciled from a different version of the description.
    Drifted { names: Vec<String> },

    UpToDate,
}

/// Installs the webhook descriptions of a single owner.
#[derive(Debug)]
pub struct WebhookReconciler<S> {
    store: S,
    owner: Owner,
}

impl<S> WebhookReconciler<S>
where
    S: ClusterStore + OperatorGroupLister,
{
    pub fn new(store: S, owner: Owner) -> Self {
        Self { store, owner }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates and installs a single webhook description, scoped to the namespaces of the
    /// owner's operator group.
    ///
    /// `ca_bundle` is the PEM encoded CA certificate the API server uses to verify the webhook.
    #[instrument(
        skip(self, ca_bundle, description),
        fields(
            owner.name = %self.owner.name,
            owner.namespace = %self.owner.namespace,
            webhook.generate_name = %description.generate_name,
        )
    )]
    pub async fn create_or_update_webhook(
        &self,
        ca_bundle: &[u8],
        description: &WebhookDescription,
    ) -> Result<ReconcileOutcome> {
        validate_rules(&description.rules).with_context(|_| UnsafeRulesSnafu {
            generate_name: &description.generate_name,
        })?;
        // Rejects unusable names before the cluster is consulted
        WebhookKey::for_description(&self.owner, description).context(InvalidWebhookKeySnafu)?;

        let namespace_selector = resolve_scope(&self.store, &self.owner.namespace)
            .await
            .context(ResolveScopeSnafu)?;

        self.reconcile(&namespace_selector, ca_bundle, description)
            .await
    }

    /// Installs all webhook descriptions of the owner, in order.
    ///
    /// The complete set is validated first. The pass stops at the first description failing to
    /// install, descriptions installed before are kept.
    pub async fn reconcile_all(
        &self,
        ca_bundle: &[u8],
        descriptions: &[WebhookDescription],
    ) -> Result<Vec<ReconcileOutcome>> {
        validate_descriptions(descriptions).context(InvalidDescriptionsSnafu)?;

        let mut outcomes = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            outcomes.push(self.create_or_update_webhook(ca_bundle, description).await?);
        }

        Ok(outcomes)
    }

    /// Installs `description` as the configuration kind matching its admission type, restricted
    /// to the namespaces selected by `namespace_selector`.
    pub async fn reconcile(
        &self,
        namespace_selector: &LabelSelector,
        ca_bundle: &[u8],
        description: &WebhookDescription,
    ) -> Result<ReconcileOutcome> {
        match description.admission_type {
            WebhookAdmissionType::Validating => {
                self.reconcile_configuration::<ValidatingWebhookConfiguration>(
                    namespace_selector,
                    ca_bundle,
                    description,
                )
                .await
            }
            WebhookAdmissionType::Mutating => {
                self.reconcile_configuration::<MutatingWebhookConfiguration>(
                    namespace_selector,
                    ca_bundle,
                    description,
                )
                .await
            }
        }
    }

    /// Creates the configuration object of kind `K` for `description`, or overwrites all
    /// existing ones.
    ///
    /// Existing instances are updated in the order the store lists them. If an update fails the
    /// error is returned immediately, instances updated before stay updated.
    pub async fn reconcile_configuration<K: ManagedWebhookConfiguration>(
        &self,
        namespace_selector: &LabelSelector,
        ca_bundle: &[u8],
        description: &WebhookDescription,
    ) -> Result<ReconcileOutcome> {
        let kind = kind_of::<K>();
        let generate_name = &description.generate_name;
        let key = WebhookKey::for_description(&self.owner, description)
            .context(InvalidWebhookKeySnafu)?;
        let labels = webhook_labels(&key, description);
        let environment = WebhookEnvironment {
            service_namespace: &self.owner.namespace,
            namespace_selector,
            ca_bundle,
        };

        let existing: Vec<K> = self
            .store
            .list(&key.selector())
            .await
            .with_context(|_| ListConfigurationsSnafu {
                kind: &kind,
                generate_name,
            })?;

        let mut outcome = ReconcileOutcome {
            generate_name: generate_name.clone(),
            admission_type: K::ADMISSION_TYPE,
            instances: Vec::with_capacity(existing.len().max(1)),
        };

        if existing.is_empty() {
            let mut configuration = K::from_metadata(ObjectMeta {
                generate_name: Some(format!("{generate_name}-")),
                namespace: Some(self.owner.namespace.clone()),
                labels: Some(labels),
                ..ObjectMeta::default()
            });
            configuration.set_webhook(description, &environment);

            let created = match self.store.create(&configuration).await {
                Ok(created) => created,
                Err(err) => {
                    tracing::error!(
                        k8s.webhookconfiguration.kind = kind,
                        error = &err as &dyn std::error::Error,
                        "failed to create webhook configuration"
                    );
                    return Err(err).context(CreateConfigurationSnafu {
                        kind,
                        generate_name,
                    });
                }
            };

            tracing::info!(
                k8s.webhookconfiguration.kind = kind,
                k8s.webhookconfiguration.name = created.name_any(),
                "created webhook configuration"
            );

            outcome.instances.push(ReconciledInstance {
                conversion: self.bind_conversion(description, &created).await,
                name: created.name_any(),
                action: InstanceAction::Created,
            });

            return Ok(outcome);
        }

        for mut configuration in existing {
            let name = configuration.name_any();

            configuration.set_webhook(description, &environment);
            merge_labels(&mut configuration.meta_mut().labels, labels.clone());

            let updated = match self.store.update(&configuration).await {
                Ok(updated) => updated,
                Err(err) => {
                    tracing::warn!(
                        k8s.webhookconfiguration.kind = kind,
                        k8s.webhookconfiguration.name = name,
                        error = &err as &dyn std::error::Error,
                        "failed to update webhook configuration"
                    );
                    return Err(err).context(UpdateConfigurationSnafu { kind, name });
                }
            };

            tracing::debug!(
                k8s.webhookconfiguration.kind = kind,
                k8s.webhookconfiguration.name = name,
                "updated webhook configuration"
            );

            outcome.instances.push(ReconciledInstance {
                conversion: self.bind_conversion(description, &updated).await,
                name,
                action: InstanceAction::Updated,
            });
        }

        Ok(outcome)
    }

    /// Compares the installed configurations of `description` with the description, using only
    /// the published labels.
    pub async fn check_installed(&self, description: &WebhookDescription) -> Result<InstallStatus> {
        match description.admission_type {
            WebhookAdmissionType::Validating => {
                self.check_installed_configuration::<ValidatingWebhookConfiguration>(description)
                    .await
            }
            WebhookAdmissionType::Mutating => {
                self.check_installed_configuration::<MutatingWebhookConfiguration>(description)
                    .await
            }
        }
    }

    async fn check_installed_configuration<K: ManagedWebhookConfiguration>(
        &self,
        description: &WebhookDescription,
    ) -> Result<InstallStatus> {
        let key = WebhookKey::for_description(&self.owner, description)
            .context(InvalidWebhookKeySnafu)?;

        let installed: Vec<K> = self
            .store
            .list(&key.selector())
            .await
            .with_context(|_| ListConfigurationsSnafu {
                kind: kind_of::<K>(),
                generate_name: &description.generate_name,
            })?;

        if installed.is_empty() {
            return Ok(InstallStatus::Missing);
        }

        let hash = hash_webhook_description(description);
        let drifted: Vec<String> = installed
            .iter()
            .filter(|configuration| configuration.labels().get(WEBHOOK_HASH_KEY) != Some(&hash))
            .map(ResourceExt::name_any)
            .collect();

        if drifted.is_empty() {
            Ok(InstallStatus::UpToDate)
        } else {
            Ok(InstallStatus::Drifted { names: drifted })
        }
    }

    async fn bind_conversion<K: ManagedWebhookConfiguration>(
        &self,
        description: &WebhookDescription,
        configuration: &K,
    ) -> ConversionOutcome {
        let Some(crd_name) = description.conversion_crd() else {
            return ConversionOutcome::Skipped;
        };

        match configuration.client_config() {
            Some(client_config) => {
                conversion::bind_conversion(&self.store, crd_name, client_config).await
            }
            None => ConversionOutcome::Failed {
                crd_name: crd_name.to_owned(),
                source: ConversionError::MissingServiceReference,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        ByteString,
        api::admissionregistration::v1::RuleWithOperations,
        apiextensions_apiserver::pkg::apis::apiextensions::v1::{
            CustomResourceDefinition, CustomResourceDefinitionSpec,
        },
    };
    use std::collections::BTreeSet;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        labels::WEBHOOK_DESC_KEY,
        operator_group::{OperatorGroup, OperatorGroupSpec},
        store::{InMemoryStore, Verb},
    };

    const CA_BUNDLE: &[u8] = b"-----BEGIN CERTIFICATE-----\nca-1\n-----END CERTIFICATE-----\n";
    const ROTATED_CA_BUNDLE: &[u8] =
        b"-----BEGIN CERTIFICATE-----\nca-2\n-----END CERTIFICATE-----\n";
    const CRD_NAME: &str = "etcdclusters.etcd.database.coreos.com";

    fn owner(namespace: &str) -> Owner {
        Owner::new("etcdoperator.v0.9.4", namespace, "ClusterServiceVersion")
    }

    fn operator_group(namespace: &str) -> OperatorGroup {
        OperatorGroup {
            metadata: ObjectMeta {
                name: Some("global-operators".to_owned()),
                namespace: Some(namespace.to_owned()),
                uid: Some(format!("og-{namespace}")),
                ..ObjectMeta::default()
            },
            spec: OperatorGroupSpec::default(),
        }
    }

    fn reconciler_in(namespaces: &[&str]) -> WebhookReconciler<InMemoryStore> {
        let store = InMemoryStore::new();
        for namespace in namespaces {
            store.add_operator_group(operator_group(namespace));
        }

        WebhookReconciler::new(store, owner(namespaces[0]))
    }

    #[fixture]
    fn reconciler() -> WebhookReconciler<InMemoryStore> {
        reconciler_in(&["ns1"])
    }

    #[fixture]
    fn description() -> WebhookDescription {
        WebhookDescription {
            generate_name: "webhook.test.com".to_owned(),
            admission_type: WebhookAdmissionType::Validating,
            deployment_name: "etcd-operator".to_owned(),
            container_port: 443,
            rules: Vec::new(),
            failure_policy: Some("Fail".to_owned()),
            match_policy: None,
            object_selector: None,
            side_effects: "None".to_owned(),
            timeout_seconds: None,
            admission_review_versions: vec!["v1".to_owned()],
            reinvocation_policy: None,
            webhook_path: Some("/validate".to_owned()),
            conversion_crd: None,
        }
    }

    fn crd() -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(CRD_NAME.to_owned()),
                ..ObjectMeta::default()
            },
            spec: CustomResourceDefinitionSpec {
                preserve_unknown_fields: Some(true),
                ..CustomResourceDefinitionSpec::default()
            },
            status: None,
        }
    }

    fn installed<K: ManagedWebhookConfiguration>(
        reconciler: &WebhookReconciler<InMemoryStore>,
    ) -> Vec<K> {
        reconciler.store().objects::<K>().unwrap()
    }

    fn hash_label<K: ManagedWebhookConfiguration>(configuration: &K) -> String {
        configuration.labels()[WEBHOOK_HASH_KEY].clone()
    }

    #[rstest]
    #[tokio::test]
    async fn creates_configuration_for_all_namespaces(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        assert_eq!(outcome.created().count(), 1);
        assert_eq!(outcome.updated().count(), 0);

        let configurations = installed::<ValidatingWebhookConfiguration>(&reconciler);
        assert_eq!(configurations.len(), 1);
        assert!(installed::<MutatingWebhookConfiguration>(&reconciler).is_empty());

        let configuration = &configurations[0];
        assert!(configuration.name_any().starts_with("webhook.test.com-"));
        assert_eq!(configuration.namespace().as_deref(), Some("ns1"));
        assert_eq!(
            configuration.labels()[WEBHOOK_DESC_KEY],
            "webhook.test.com"
        );
        assert_eq!(configuration.labels()["olm.owner"], "etcdoperator.v0.9.4");
        assert_eq!(
            hash_label(configuration),
            hash_webhook_description(&description)
        );

        let webhooks = configuration.webhooks.as_ref().unwrap();
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].name, "webhook.test.com");
        assert_eq!(webhooks[0].namespace_selector, Some(LabelSelector::default()));
        assert_eq!(
            webhooks[0].client_config.ca_bundle,
            Some(ByteString(CA_BUNDLE.to_vec()))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn reconciliation_is_idempotent(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        let before = installed::<ValidatingWebhookConfiguration>(&reconciler);

        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        let after = installed::<ValidatingWebhookConfiguration>(&reconciler);

        assert_eq!(outcome.created().count(), 0);
        assert_eq!(outcome.updated().collect::<Vec<_>>(), [before[0].name_any()]);
        assert_eq!(after.len(), 1);
        assert_eq!(before[0].uid(), after[0].uid());
        assert_eq!(before[0].labels(), after[0].labels());
        assert_eq!(before[0].webhooks, after[0].webhooks);
    }

    #[rstest]
    #[tokio::test]
    async fn description_changes_are_detected(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        let before = installed::<ValidatingWebhookConfiguration>(&reconciler);
        assert_eq!(
            reconciler.check_installed(&description).await.unwrap(),
            InstallStatus::UpToDate
        );

        let mut changed = description.clone();
        changed.timeout_seconds = Some(30);
        changed.rules = vec![RuleWithOperations {
            api_groups: Some(vec!["apps".to_owned()]),
            api_versions: Some(vec!["v1".to_owned()]),
            operations: Some(vec!["CREATE".to_owned()]),
            resources: Some(vec!["deployments".to_owned()]),
            scope: None,
        }];

        assert_eq!(
            reconciler.check_installed(&changed).await.unwrap(),
            InstallStatus::Drifted {
                names: vec![before[0].name_any()]
            }
        );

        reconciler
            .create_or_update_webhook(CA_BUNDLE, &changed)
            .await
            .unwrap();
        let after = installed::<ValidatingWebhookConfiguration>(&reconciler);

        assert_eq!(after.len(), 1);
        assert_eq!(before[0].name_any(), after[0].name_any());
        assert_ne!(hash_label(&before[0]), hash_label(&after[0]));
        assert_eq!(hash_label(&after[0]), hash_webhook_description(&changed));

        // Full overwrite, the old entry doesn't survive
        let webhook = &after[0].webhooks.as_ref().unwrap()[0];
        assert_eq!(webhook.timeout_seconds, Some(30));
        assert_eq!(webhook.rules.as_ref(), Some(&changed.rules));
    }

    #[rstest]
    #[tokio::test]
    async fn ca_rotation_only_changes_ca_bundle(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        let before = installed::<ValidatingWebhookConfiguration>(&reconciler);

        reconciler
            .create_or_update_webhook(ROTATED_CA_BUNDLE, &description)
            .await
            .unwrap();
        let after = installed::<ValidatingWebhookConfiguration>(&reconciler);

        assert_eq!(before[0].labels(), after[0].labels());

        let mut expected = before[0].webhooks.clone().unwrap();
        expected[0].client_config.ca_bundle = Some(ByteString(ROTATED_CA_BUNDLE.to_vec()));
        assert_eq!(after[0].webhooks, Some(expected));
    }

    #[rstest]
    #[tokio::test]
    async fn one_instance_per_owner_namespace(description: WebhookDescription) {
        let namespaces = ["ns1", "ns2", "ns3"];
        let store = InMemoryStore::new();
        for namespace in namespaces {
            store.add_operator_group(operator_group(namespace));
        }

        for namespace in namespaces {
            let reconciler = WebhookReconciler::new(&store, owner(namespace));
            reconciler
                .create_or_update_webhook(CA_BUNDLE, &description)
                .await
                .unwrap();
        }

        let configurations = store.objects::<ValidatingWebhookConfiguration>().unwrap();
        assert_eq!(configurations.len(), namespaces.len());
        assert!(
            configurations
                .iter()
                .all(|configuration| configuration.labels()[WEBHOOK_DESC_KEY] == "webhook.test.com")
        );

        let names: BTreeSet<_> = configurations.iter().map(ResourceExt::name_any).collect();
        assert_eq!(names.len(), namespaces.len());

        // Reconciling one owner again leaves the others alone
        let outcome = WebhookReconciler::new(&store, owner("ns2"))
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        assert_eq!(outcome.updated().count(), 1);
        assert_eq!(
            store.objects::<ValidatingWebhookConfiguration>().unwrap().len(),
            namespaces.len()
        );
    }

    #[rstest]
    #[tokio::test]
    async fn all_existing_instances_are_updated(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        let key = WebhookKey::for_description(reconciler.owner(), &description).unwrap();
        for name in ["webhook.test.com-aaaaa", "webhook.test.com-bbbbb"] {
            reconciler
                .store()
                .insert(ValidatingWebhookConfiguration {
                    metadata: ObjectMeta {
                        name: Some(name.to_owned()),
                        labels: Some(key.labels()),
                        ..ObjectMeta::default()
                    },
                    webhooks: None,
                })
                .unwrap();
        }

        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();

        assert_eq!(
            outcome.updated().collect::<Vec<_>>(),
            ["webhook.test.com-aaaaa", "webhook.test.com-bbbbb"]
        );
        for configuration in installed::<ValidatingWebhookConfiguration>(&reconciler) {
            assert_eq!(
                hash_label(&configuration),
                hash_webhook_description(&description)
            );
            assert_eq!(configuration.webhooks.unwrap().len(), 1);
        }
    }

    #[rstest]
    #[tokio::test]
    async fn failed_update_keeps_earlier_updates(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        let key = WebhookKey::for_description(reconciler.owner(), &description).unwrap();
        for name in ["webhook.test.com-aaaaa", "webhook.test.com-bbbbb"] {
            reconciler
                .store()
                .insert(ValidatingWebhookConfiguration {
                    metadata: ObjectMeta {
                        name: Some(name.to_owned()),
                        labels: Some(key.labels()),
                        ..ObjectMeta::default()
                    },
                    webhooks: None,
                })
                .unwrap();
        }
        reconciler.store().reject_updates_to("webhook.test.com-bbbbb");

        let err = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            Error::UpdateConfiguration { name, .. } if name == "webhook.test.com-bbbbb"
        ));
        assert_eq!(
            err.status_reason(),
            "failed to install admission webhook configurations"
        );

        let configurations = installed::<ValidatingWebhookConfiguration>(&reconciler);
        assert!(configurations[0].webhooks.is_some());
        assert!(configurations[1].webhooks.is_none());
        assert_eq!(
            reconciler.check_installed(&description).await.unwrap(),
            InstallStatus::Drifted {
                names: vec!["webhook.test.com-bbbbb".to_owned()]
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn failed_create_is_propagated(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        reconciler
            .store()
            .fail_requests::<ValidatingWebhookConfiguration>(Verb::Create);

        let err = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            Error::CreateConfiguration {
                source: store::Error::Unavailable { .. },
                generate_name,
                ..
            } if generate_name == "webhook.test.com"
        ));
        assert_eq!(
            err.status_reason(),
            "failed to install admission webhook configurations"
        );
        assert!(installed::<ValidatingWebhookConfiguration>(&reconciler).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn failed_list_is_propagated(
        reconciler: WebhookReconciler<InMemoryStore>,
        mut description: WebhookDescription,
    ) {
        description.admission_type = WebhookAdmissionType::Mutating;
        reconciler
            .store()
            .fail_requests::<MutatingWebhookConfiguration>(Verb::List);

        let err = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            Error::ListConfigurations {
                source: store::Error::Unavailable { .. },
                kind,
                ..
            } if kind == "MutatingWebhookConfiguration"
        ));
        assert_eq!(
            err.status_reason(),
            "failed to install admission webhook configurations"
        );
        assert!(installed::<MutatingWebhookConfiguration>(&reconciler).is_empty());
        assert!(matches!(
            reconciler.check_installed(&description).await,
            Err(Error::ListConfigurations { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn mutating_webhooks(
        reconciler: WebhookReconciler<InMemoryStore>,
        mut description: WebhookDescription,
    ) {
        description.admission_type = WebhookAdmissionType::Mutating;
        description.reinvocation_policy = Some("IfNeeded".to_owned());

        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        assert_eq!(outcome.admission_type, WebhookAdmissionType::Mutating);

        assert!(installed::<ValidatingWebhookConfiguration>(&reconciler).is_empty());
        let configurations = installed::<MutatingWebhookConfiguration>(&reconciler);
        assert_eq!(configurations.len(), 1);
        assert_eq!(
            configurations[0].webhooks.as_ref().unwrap()[0]
                .reinvocation_policy
                .as_deref(),
            Some("IfNeeded")
        );
        assert_eq!(
            reconciler.check_installed(&description).await.unwrap(),
            InstallStatus::UpToDate
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unsafe_rules_are_rejected(
        reconciler: WebhookReconciler<InMemoryStore>,
        mut description: WebhookDescription,
    ) {
        description.rules = vec![RuleWithOperations {
            api_groups: Some(vec!["operators.coreos.com".to_owned()]),
            resources: Some(vec!["clusterserviceversions".to_owned()]),
            ..RuleWithOperations::default()
        }];

        let err = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap_err();

        assert_eq!(
            err.status_reason(),
            "Webhook rules cannot include the OLM group"
        );
        assert!(installed::<ValidatingWebhookConfiguration>(&reconciler).is_empty());
    }

    #[rstest]
    #[case::empty("")]
    #[case::not_a_label_value("webhook test")]
    #[tokio::test]
    async fn invalid_generate_name_fails_before_scope_lookup(
        #[case] generate_name: &str,
        mut description: WebhookDescription,
    ) {
        // Without an operator group a scope lookup would fail with ResolveScope
        let reconciler = WebhookReconciler::new(InMemoryStore::new(), owner("ns1"));
        description.generate_name = generate_name.to_owned();

        let err = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidWebhookKey { .. }));
        assert!(installed::<ValidatingWebhookConfiguration>(&reconciler).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn missing_operator_group(description: WebhookDescription) {
        let reconciler = WebhookReconciler::new(InMemoryStore::new(), owner("ns1"));

        let err = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ResolveScope { .. }));
        assert_eq!(
            err.status_reason(),
            "cannot determine scope: expected exactly one operator group in namespace \"ns1\", found 0"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn conversion_crd_is_bound(
        reconciler: WebhookReconciler<InMemoryStore>,
        mut description: WebhookDescription,
    ) {
        reconciler.store().insert(crd()).unwrap();
        description.conversion_crd = Some(CRD_NAME.to_owned());

        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        assert!(outcome.instances[0].conversion.is_bound());

        let crd: CustomResourceDefinition =
            reconciler.store().get(CRD_NAME).await.unwrap().unwrap();
        let conversion = crd.spec.conversion.unwrap();
        let client_config = conversion.webhook.unwrap().client_config.unwrap();
        let service = client_config.service.unwrap();

        assert_eq!(conversion.strategy, "Webhook");
        assert_eq!(crd.spec.preserve_unknown_fields, Some(false));
        assert_eq!(service.name, "etcd-operator-service");
        assert_eq!(service.namespace, "ns1");
        assert_eq!(service.path.as_deref(), Some("/convert"));
        assert_eq!(client_config.ca_bundle, Some(ByteString(CA_BUNDLE.to_vec())));
    }

    #[rstest]
    #[case::absent(None)]
    #[case::empty(Some(String::new()))]
    #[tokio::test]
    async fn crd_without_binding_is_untouched(
        reconciler: WebhookReconciler<InMemoryStore>,
        mut description: WebhookDescription,
        #[case] conversion_crd: Option<String>,
    ) {
        let before = reconciler.store().insert(crd()).unwrap();
        description.conversion_crd = conversion_crd;

        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();
        assert!(matches!(
            outcome.instances[0].conversion,
            ConversionOutcome::Skipped
        ));

        let after: CustomResourceDefinition =
            reconciler.store().get(CRD_NAME).await.unwrap().unwrap();
        assert_eq!(before.resource_version(), after.resource_version());
        assert_eq!(after.spec.conversion, None);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_crd_does_not_fail_reconciliation(
        reconciler: WebhookReconciler<InMemoryStore>,
        mut description: WebhookDescription,
    ) {
        description.conversion_crd = Some(CRD_NAME.to_owned());

        let outcome = reconciler
            .create_or_update_webhook(CA_BUNDLE, &description)
            .await
            .unwrap();

        assert!(matches!(
            outcome.instances[0].conversion,
            ConversionOutcome::CrdNotFound { .. }
        ));
        assert_eq!(installed::<ValidatingWebhookConfiguration>(&reconciler).len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn reconcile_all_rejects_duplicates(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        let err = reconciler
            .reconcile_all(CA_BUNDLE, &[description.clone(), description])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidDescriptions {
                source: DescriptionError::DuplicateGenerateName { .. }
            }
        ));
        assert!(installed::<ValidatingWebhookConfiguration>(&reconciler).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn reconcile_all_installs_every_description(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        let mut mutating = description.clone();
        mutating.generate_name = "mutating.test.com".to_owned();
        mutating.admission_type = WebhookAdmissionType::Mutating;

        let outcomes = reconciler
            .reconcile_all(CA_BUNDLE, &[description, mutating])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(installed::<ValidatingWebhookConfiguration>(&reconciler).len(), 1);
        assert_eq!(installed::<MutatingWebhookConfiguration>(&reconciler).len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn check_installed_before_reconciliation(
        reconciler: WebhookReconciler<InMemoryStore>,
        description: WebhookDescription,
    ) {
        assert_eq!(
            reconciler.check_installed(&description).await.unwrap(),
            InstallStatus::Missing
        );
    }
}
