use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{ListParams, PostParams},
};
use snafu::{OptionExt, ResultExt};

use super::{
    ClusterObject, ClusterStore, CreateObjectSnafu, GetObjectSnafu, InvalidLabelSelectorSnafu,
    ListObjectsSnafu, ListOperatorGroupsSnafu, MissingNameSnafu, OperatorGroupLister, Result,
    UpdateObjectSnafu, kind_of,
};
use crate::{labels::LabelSelectorExt, operator_group::OperatorGroup};

/// A [`ClusterStore`] and [`OperatorGroupLister`] backed by the Kubernetes API server.
///
/// Updates are sent as full replacements, so the API server's optimistic concurrency control
/// (based on `metadata.resourceVersion`) applies.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    post_params: PostParams,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(field_manager.into()),
                ..PostParams::default()
            },
        }
    }

    fn api<K: ClusterObject>(&self) -> Api<K> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list<K: ClusterObject>(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        let label_selector = selector
            .to_query_string()
            .context(InvalidLabelSelectorSnafu)?;

        let objects = self
            .api::<K>()
            .list(&ListParams::default().labels(&label_selector))
            .await
            .with_context(|_| ListObjectsSnafu {
                kind: kind_of::<K>(),
                label_selector: label_selector.clone(),
            })?;

        Ok(objects.items)
    }

    async fn get<K: ClusterObject>(&self, name: &str) -> Result<Option<K>> {
        self.api::<K>()
            .get_opt(name)
            .await
            .with_context(|_| GetObjectSnafu {
                kind: kind_of::<K>(),
                name,
            })
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K> {
        // Objects relying on generateName don't have a name yet
        let name = object
            .meta()
            .name
            .clone()
            .or_else(|| object.meta().generate_name.clone())
            .with_context(|| MissingNameSnafu {
                kind: kind_of::<K>(),
            })?;

        self.api::<K>()
            .create(&self.post_params, object)
            .await
            .with_context(|_| CreateObjectSnafu {
                kind: kind_of::<K>(),
                name,
            })
    }

    async fn update<K: ClusterObject>(&self, object: &K) -> Result<K> {
        let name = object.meta().name.clone().with_context(|| MissingNameSnafu {
            kind: kind_of::<K>(),
        })?;

        self.api::<K>()
            .replace(&name, &self.post_params, object)
            .await
            .with_context(|_| UpdateObjectSnafu {
                kind: kind_of::<K>(),
                name: object.name_any(),
            })
    }
}

#[async_trait]
impl OperatorGroupLister for KubeStore {
    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>> {
        let api: Api<OperatorGroup> = Api::namespaced(self.client.clone(), namespace);
        let operator_groups = api
            .list(&ListParams::default())
            .await
            .context(ListOperatorGroupsSnafu { namespace })?;

        Ok(operator_groups.items)
    }
}
