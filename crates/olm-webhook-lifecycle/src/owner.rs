//! Metadata of the resource owning the installed webhook configurations.
use std::collections::BTreeMap;

use const_format::concatcp;
use kube::{Resource, ResourceExt};
use snafu::{OptionExt, Snafu};

const OLM_OWNER_KEY_PREFIX: &str = "olm.owner";

/// Holds the name of the owner.
pub const OWNER_KEY: &str = OLM_OWNER_KEY_PREFIX;

/// Holds the namespace of the owner.
pub const OWNER_NAMESPACE_KEY: &str = concatcp!(OLM_OWNER_KEY_PREFIX, ".namespace");

/// Holds the kind of the owner, usually `ClusterServiceVersion`.
pub const OWNER_KIND_KEY: &str = concatcp!(OLM_OWNER_KEY_PREFIX, ".kind");

#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("owner {name:?} is not namespaced"))]
    MissingNamespace { name: String },
}

/// The resource (typically a ClusterServiceVersion) declaring the webhook descriptions.
///
/// Admission webhook configurations are cluster scoped, so they cannot carry an owner reference
/// to their namespaced owner. Ownership is expressed with the labels returned by
/// [`Owner::labels`] instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub namespace: String,
    pub kind: String,
}

impl Owner {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    /// Derives the owner metadata from a namespaced Kubernetes object.
    pub fn from_resource<K>(resource: &K) -> Result<Self, Error>
    where
        K: Resource<DynamicType = ()>,
    {
        let name = resource.name_any();
        let namespace = resource
            .namespace()
            .with_context(|| MissingNamespaceSnafu { name: name.clone() })?;

        Ok(Self {
            name,
            namespace,
            kind: K::kind(&()).into_owned(),
        })
    }

    /// The ownership labels put onto every object created on behalf of this owner.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OWNER_KEY.to_owned(), self.name.clone()),
            (OWNER_NAMESPACE_KEY.to_owned(), self.namespace.clone()),
            (OWNER_KIND_KEY.to_owned(), self.kind.clone()),
        ])
    }
}
