//! Operator groups and the namespace scope they grant to an owner.
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::instrument;

use crate::store::OperatorGroupLister;

/// Namespaces targeted by an operator group carry a label with this prefix, followed by the UID
/// of the operator group.
pub const OPERATOR_GROUP_UID_LABEL_PREFIX: &str = "olm.operatorgroup.uid/";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to list operator groups"))]
    ListOperatorGroups { source: crate::store::Error },

    #[snafu(display(
        "cannot determine scope: expected exactly one operator group in namespace {namespace:?}, found {count}"
    ))]
    CannotDetermineScope { namespace: String, count: usize },

    #[snafu(display("operator group {name:?} has target namespaces but no UID"))]
    MissingUid { name: String },
}

/// Declares the namespaces the operators installed into its namespace are entitled to manage.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    shortname = "og",
    namespaced,
    crates(
        kube_core = "kube::core",
        k8s_openapi = "k8s_openapi",
        schemars = "schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Selects the target namespaces by label. Ignored if `targetNamespaces` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// An explicit list of target namespaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespaces: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default)]
    pub static_provided_apis: bool,
}

/// Returns the label selector matching the namespaces targeted by `operator_group`.
///
/// - Explicit target namespaces are selected through the UID label OLM puts onto them.
/// - Otherwise the group's own selector is used verbatim.
/// - A group with neither targets all namespaces, which is the empty selector.
pub fn namespace_label_selector(operator_group: &OperatorGroup) -> Result<LabelSelector> {
    let spec = &operator_group.spec;

    if spec
        .target_namespaces
        .as_ref()
        .is_some_and(|namespaces| !namespaces.is_empty())
    {
        let uid = operator_group.uid().with_context(|| MissingUidSnafu {
            name: operator_group.name_any(),
        })?;

        return Ok(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                format!("{OPERATOR_GROUP_UID_LABEL_PREFIX}{uid}"),
                String::new(),
            )])),
            match_expressions: None,
        });
    }

    Ok(spec.selector.clone().unwrap_or_default())
}

/// Resolves the namespace selector an owner living in `namespace` is scoped to.
///
/// Exactly one operator group must exist in the namespace.
#[instrument(skip(lister))]
pub async fn resolve_scope(
    lister: &(impl OperatorGroupLister + ?Sized),
    namespace: &str,
) -> Result<LabelSelector> {
    let operator_groups = lister
        .list_operator_groups(namespace)
        .await
        .context(ListOperatorGroupsSnafu)?;

    ensure!(
        operator_groups.len() == 1,
        CannotDetermineScopeSnafu {
            namespace,
            count: operator_groups.len(),
        }
    );

    tracing::debug!(
        operator_group.name = operator_groups[0].name_any(),
        "resolved operator group"
    );

    namespace_label_selector(&operator_groups[0])
}
