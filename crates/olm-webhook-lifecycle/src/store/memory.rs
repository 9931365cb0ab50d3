use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::Resource;
use rand::Rng;
use snafu::{OptionExt, ResultExt, ensure};

use super::{
    AlreadyExistsSnafu, ClusterObject, ClusterStore, ConflictSnafu, ConvertObjectSnafu,
    InvalidLabelSelectorSnafu, MissingNameSnafu, NotFoundSnafu, OperatorGroupLister, Result,
    UnavailableSnafu, Verb, kind_of,
};
use crate::{hash::SAFE_ALPHABET, labels::LabelSelectorExt, operator_group::OperatorGroup};

/// Length of the random suffix appended to `generateName`, same as the API server.
const GENERATED_NAME_SUFFIX_LENGTH: usize = 5;

#[derive(Debug, Default)]
struct State {
    /// Objects keyed by kind and name, stored in their serialized form.
    objects: BTreeMap<(String, String), serde_json::Value>,
    operator_groups: Vec<OperatorGroup>,
    rejected_updates: BTreeSet<String>,
    unavailable: BTreeSet<(String, Verb)>,
    last_resource_version: u64,
}

impl State {
    fn ensure_available(&self, kind: &str, verb: Verb) -> Result<()> {
        ensure!(
            !self.unavailable.contains(&(kind.to_owned(), verb)),
            UnavailableSnafu { kind, verb }
        );

        Ok(())
    }

    fn next_resource_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }
}

/// A [`ClusterStore`] and [`OperatorGroupLister`] keeping all objects in memory.
///
/// It mimics the parts of the API server behaviour the reconciler relies on: label selector
/// based listing, `generateName` handling, and `resourceVersion` based conflict detection on
/// update. Listing returns objects ordered by name. It is intended for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an operator group which is returned by [`OperatorGroupLister::list_operator_groups`]
    /// for its namespace.
    pub fn add_operator_group(&self, operator_group: OperatorGroup) {
        self.state().operator_groups.push(operator_group);
    }

    /// Stores `object` as is, replacing any object of the same kind and name. This bypasses all
    /// checks and is meant to seed the store.
    pub fn insert<K: ClusterObject>(&self, object: K) -> Result<K> {
        let kind = kind_of::<K>();
        let name = object
            .meta()
            .name
            .clone()
            .context(MissingNameSnafu { kind: &kind })?;

        let mut state = self.state();
        let mut object = object;
        object.meta_mut().resource_version = Some(state.next_resource_version());

        let value = serde_json::to_value(&object).context(ConvertObjectSnafu { kind: &kind })?;
        state.objects.insert((kind, name), value);

        Ok(object)
    }

    /// Returns all stored objects of kind `K`, ordered by name.
    pub fn objects<K: ClusterObject>(&self) -> Result<Vec<K>> {
        let kind = kind_of::<K>();

        self.state()
            .objects
            .iter()
            .filter(|((object_kind, _), _)| *object_kind == kind)
            .map(|(_, value)| {
                serde_json::from_value(value.clone()).context(ConvertObjectSnafu { kind: &kind })
            })
            .collect()
    }

    /// All future updates of objects called `name` fail with a conflict.
    pub fn reject_updates_to(&self, name: impl Into<String>) {
        self.state().rejected_updates.insert(name.into());
    }

    /// All future `verb` requests for objects of kind `K` fail with [`Error::Unavailable`].
    ///
    /// [`Error::Unavailable`]: super::Error::Unavailable
    pub fn fail_requests<K: ClusterObject>(&self, verb: Verb) {
        self.state().unavailable.insert((kind_of::<K>(), verb));
    }

    fn generate_name(state: &State, kind: &str, prefix: &str) -> String {
        let mut rng = rand::rng();

        loop {
            let suffix: String = (0..GENERATED_NAME_SUFFIX_LENGTH)
                .map(|_| char::from(SAFE_ALPHABET[rng.random_range(0..SAFE_ALPHABET.len())]))
                .collect();
            let name = format!("{prefix}{suffix}");

            if !state
                .objects
                .contains_key(&(kind.to_owned(), name.clone()))
            {
                return name;
            }
        }
    }
}

#[async_trait]
impl ClusterStore for InMemoryStore {
    async fn list<K: ClusterObject>(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        self.state().ensure_available(&kind_of::<K>(), Verb::List)?;

        let mut matching = Vec::new();

        for object in self.objects::<K>()? {
            if selector
                .matches(object.meta().labels.as_ref().unwrap_or(&BTreeMap::new()))
                .context(InvalidLabelSelectorSnafu)?
            {
                matching.push(object);
            }
        }

        Ok(matching)
    }

    async fn get<K: ClusterObject>(&self, name: &str) -> Result<Option<K>> {
        let kind = kind_of::<K>();
        let state = self.state();
        state.ensure_available(&kind, Verb::Get)?;

        state
            .objects
            .get(&(kind.clone(), name.to_owned()))
            .map(|value| serde_json::from_value(value.clone()).context(ConvertObjectSnafu { kind }))
            .transpose()
    }

    async fn create<K: ClusterObject>(&self, object: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let mut state = self.state();
        state.ensure_available(&kind, Verb::Create)?;

        let mut object = object.clone();
        let meta = object.meta_mut();

        let name = match (&meta.name, &meta.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => Self::generate_name(&state, &kind, prefix),
            (None, None) => return MissingNameSnafu { kind }.fail(),
        };

        ensure!(
            !state.objects.contains_key(&(kind.clone(), name.clone())),
            AlreadyExistsSnafu { kind, name }
        );

        meta.name = Some(name.clone());
        meta.uid = Some(format!("uid-{name}"));
        meta.resource_version = Some(state.next_resource_version());

        let value = serde_json::to_value(&object).context(ConvertObjectSnafu { kind: &kind })?;
        state.objects.insert((kind, name), value);

        Ok(object)
    }

    async fn update<K: ClusterObject>(&self, object: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let mut state = self.state();
        state.ensure_available(&kind, Verb::Update)?;

        let mut object = object.clone();
        let meta = object.meta_mut();

        let name = meta
            .name
            .clone()
            .context(MissingNameSnafu { kind: &kind })?;

        let stored: K = state
            .objects
            .get(&(kind.clone(), name.clone()))
            .context(NotFoundSnafu {
                kind: &kind,
                name: &name,
            })
            .and_then(|value| {
                serde_json::from_value(value.clone()).context(ConvertObjectSnafu { kind: &kind })
            })?;

        ensure!(
            !state.rejected_updates.contains(&name)
                && meta.resource_version == stored.meta().resource_version,
            ConflictSnafu {
                kind: &kind,
                name: &name,
                resource_version: meta.resource_version.clone(),
            }
        );

        // Identity is immutable
        meta.uid.clone_from(&stored.meta().uid);
        meta.creation_timestamp.clone_from(&stored.meta().creation_timestamp);
        meta.resource_version = Some(state.next_resource_version());

        let value = serde_json::to_value(&object).context(ConvertObjectSnafu { kind: &kind })?;
        state.objects.insert((kind, name), value);

        Ok(object)
    }
}

#[async_trait]
impl OperatorGroupLister for InMemoryStore {
    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>> {
        Ok(self
            .state()
            .operator_groups
            .iter()
            .filter(|operator_group| operator_group.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }
}
