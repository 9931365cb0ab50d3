//! The cluster state this crate reads and writes.
//!
//! Everything is expressed as declarative-state operations (list, get, create, update) on
//! cluster scoped objects, plus the lookup of operator groups. Concurrency control is left to the
//! store: updates carry the `resourceVersion` they were read at and fail on conflict. Nothing in
//! here retries.
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, apimachinery::pkg::apis::meta::v1::LabelSelector};
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;
use strum::Display;

use crate::{labels::SelectorError, operator_group::OperatorGroup};

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::InMemoryStore;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to list {kind} objects matching {label_selector:?}"))]
    ListObjects {
        source: kube::Error,
        kind: String,
        label_selector: String,
    },

    #[snafu(display("failed to get {kind} {name:?}"))]
    GetObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to create {kind} {name:?}"))]
    CreateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to update {kind} {name:?}"))]
    UpdateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to list OperatorGroups in namespace {namespace:?}"))]
    ListOperatorGroups {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("invalid label selector"))]
    InvalidLabelSelector { source: SelectorError },

    #[snafu(display("{kind} object has neither a name nor a generateName"))]
    MissingName { kind: String },

    #[snafu(display("{kind} {name:?} already exists"))]
    AlreadyExists { kind: String, name: String },

    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: String, name: String },

    #[snafu(display(
        "{kind} {name:?} has been modified, the provided resourceVersion {resource_version:?} is outdated"
    ))]
    Conflict {
        kind: String,
        name: String,
        resource_version: Option<String>,
    },

    #[snafu(display("failed to convert {kind} object"))]
    ConvertObject {
        source: serde_json::Error,
        kind: String,
    },

    #[snafu(display("cannot {verb} {kind} objects, the store is unavailable"))]
    Unavailable { kind: String, verb: Verb },
}

/// The requests a [`ClusterStore`] serves.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    List,
    Get,
    Create,
    Update,
}

/// A cluster scoped Kubernetes object managed through a [`ClusterStore`].
///
/// This is implemented for every type fulfilling the bounds, most notably the admission webhook
/// configurations and CustomResourceDefinitions.
pub trait ClusterObject:
    Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// Read and write access to cluster scoped objects.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Lists all objects of kind `K` matching `selector`, in the order the store returns them.
    async fn list<K: ClusterObject>(&self, selector: &LabelSelector) -> Result<Vec<K>>;

    /// Returns the object of kind `K` called `name`, or [`None`] if there is no such object.
    async fn get<K: ClusterObject>(&self, name: &str) -> Result<Option<K>>;

    /// Creates a new object. If the object only sets `metadata.generateName`, the store assigns
    /// a unique name. The created object is returned.
    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K>;

    /// Replaces an existing object. Fails with a conflict if the object has been modified since
    /// it was read.
    async fn update<K: ClusterObject>(&self, object: &K) -> Result<K>;
}

/// Lookup of the operator groups scoping an owner.
#[async_trait]
pub trait OperatorGroupLister: Send + Sync {
    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>>;
}

// Lets multiple reconcilers (one per owner) share a single store.
#[async_trait]
impl<T: ClusterStore + ?Sized> ClusterStore for &T {
    async fn list<K: ClusterObject>(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        (**self).list(selector).await
    }

    async fn get<K: ClusterObject>(&self, name: &str) -> Result<Option<K>> {
        (**self).get(name).await
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K> {
        (**self).create(object).await
    }

    async fn update<K: ClusterObject>(&self, object: &K) -> Result<K> {
        (**self).update(object).await
    }
}

#[async_trait]
impl<T: OperatorGroupLister + ?Sized> OperatorGroupLister for &T {
    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>> {
        (**self).list_operator_groups(namespace).await
    }
}

pub(crate) fn kind_of<K: ClusterObject>() -> String {
    K::kind(&()).into_owned()
}
