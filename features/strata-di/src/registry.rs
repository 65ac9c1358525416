//! Registry of live instances and factories
//!
//! Entries live in an arena and are referenced by [EntryId] from a per type index. An entry is indexed under its
//! owning concrete type and under every abstract type it is bound to, so all views share one registration.

use std::{
    any::TypeId,
    collections::{HashMap, HashSet},
    fmt::Debug,
    sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock},
};

use crate::{
    errors::{InjectError, RegistrationError, RequireError},
    handle::{BuildId, InjectionHandle},
    qualifier::Qualifier,
    types::{Binding, EntryKey, InstanceSet, Scope, TypeInfo},
};

/// Builds one object per call
pub type Factory =
    Arc<dyn Fn(&InjectionHandle) -> Result<InstanceSet, InjectError> + Send + Sync>;

enum EntrySource {
    /// Created once, cached
    Singleton(InstanceSet),
    /// Factory runs on every resolution
    Prototype(Factory),
    /// Singleton created on first resolution
    Deferred {
        factory: Factory,
        cell: OnceLock<InstanceSet>,
    },
}

/// A registration: owner type, qualifier, and either the instance or a factory
pub struct DependencyEntry {
    pub owner: TypeInfo,
    pub qualifier: Qualifier,
    /// Abstract types this entry is additionally indexed under
    pub indexed_under: Vec<TypeInfo>,
    source: EntrySource,
}
impl Debug for DependencyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyEntry")
            .field("owner", &self.owner.type_name)
            .field("qualifier", &self.qualifier)
            .field("scope", &self.scope())
            .finish()
    }
}

/// Abstract types an entry is indexed under
pub(crate) fn index_types(bindings: &[Binding], exclude_root_registration: bool) -> Vec<TypeInfo> {
    if exclude_root_registration {
        return Vec::new();
    }
    bindings
        .iter()
        .filter(|binding| !binding.is_root())
        .map(|binding| binding.info)
        .collect()
}

impl DependencyEntry {
    /// Entry holding an already built object, indexed under all of its views
    pub fn singleton(qualifier: Qualifier, instances: InstanceSet) -> Self {
        DependencyEntry {
            owner: instances.primary.info,
            qualifier,
            indexed_under: instances.views.iter().map(|view| view.info).collect(),
            source: EntrySource::Singleton(instances),
        }
    }

    pub fn prototype(
        owner: TypeInfo,
        qualifier: Qualifier,
        indexed_under: Vec<TypeInfo>,
        factory: Factory,
    ) -> Self {
        DependencyEntry {
            owner,
            qualifier,
            indexed_under,
            source: EntrySource::Prototype(factory),
        }
    }

    /// Singleton whose instance is created by `factory` on first resolution
    pub fn deferred(
        owner: TypeInfo,
        qualifier: Qualifier,
        indexed_under: Vec<TypeInfo>,
        factory: Factory,
    ) -> Self {
        DependencyEntry {
            owner,
            qualifier,
            indexed_under,
            source: EntrySource::Deferred {
                factory,
                cell: OnceLock::new(),
            },
        }
    }

    pub fn scope(&self) -> Scope {
        match self.source {
            EntrySource::Singleton(_) | EntrySource::Deferred { .. } => Scope::Singleton,
            EntrySource::Prototype(_) => Scope::Prototype,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            type_id: self.owner.type_id,
            qualifier: self.qualifier.clone(),
        }
    }

    /// Returns the cached object, or builds one
    pub(crate) fn resolve(&self, handle: &InjectionHandle) -> Result<InstanceSet, InjectError> {
        match &self.source {
            EntrySource::Singleton(instances) => Ok(instances.clone()),
            EntrySource::Prototype(factory) => factory(&handle.enter(self.owner)?),
            EntrySource::Deferred { factory, cell } => {
                if let Some(instances) = cell.get() {
                    return Ok(instances.clone());
                }

                let child = handle.enter(self.owner)?;
                let _claim = handle.container().registry().builds.claim(
                    self.key(),
                    handle.build(),
                    child.chain(),
                )?;
                // Built by the previous holder of the claim
                if let Some(instances) = cell.get() {
                    return Ok(instances.clone());
                }
                let instances = factory(&child)?;
                Ok(cell.get_or_init(|| instances).clone())
            }
        }
    }
}

#[derive(Default)]
struct BuildState {
    holders: HashMap<EntryKey, BuildId>,
    waiting: HashMap<BuildId, Vec<EntryKey>>,
}
impl BuildState {
    /// Whether `from` waits, directly or through other builds, for something `target` holds
    fn waits_for(&self, from: BuildId, target: BuildId) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![from];
        while let Some(build) = pending.pop() {
            if build == target {
                return true;
            }
            if !visited.insert(build) {
                continue;
            }
            pending.extend(
                self.waiting
                    .get(&build)
                    .into_iter()
                    .flatten()
                    .filter_map(|key| self.holders.get(key).copied()),
            );
        }
        false
    }

    fn stop_waiting(&mut self, build: BuildId, key: &EntryKey) {
        if let Some(keys) = self.waiting.get_mut(&build) {
            if let Some(pos) = keys.iter().position(|waited| waited == key) {
                keys.swap_remove(pos);
            }
            if keys.is_empty() {
                self.waiting.remove(&build);
            }
        }
    }
}

/// Tracks which build creates which deferred singleton
///
/// Waiting for an entry held by a build that itself waits for us would never end, such a wait fails as a circular
/// registration instead.
#[derive(Default)]
struct BuildTracker {
    state: Mutex<BuildState>,
    released: Condvar,
}
impl BuildTracker {
    fn claim(
        &self,
        key: EntryKey,
        build: BuildId,
        chain: &[TypeInfo],
    ) -> Result<BuildClaim<'_>, RegistrationError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut waiting = false;
        loop {
            let holder = state.holders.get(&key).copied();
            match holder {
                None => {
                    if waiting {
                        state.stop_waiting(build, &key);
                    }
                    state.holders.insert(key.clone(), build);
                    return Ok(BuildClaim { tracker: self, key });
                }
                Some(holder) if holder != build && state.waits_for(holder, build) => {
                    if waiting {
                        state.stop_waiting(build, &key);
                    }
                    tracing::debug!(
                        "Waiting for {} would close a cycle between builds",
                        chain.last().map(|info| info.type_name).unwrap_or_default()
                    );
                    return Err(RegistrationError::CircularRegistration {
                        chain: chain.to_vec(),
                    });
                }
                Some(_) => {
                    if !waiting {
                        state.waiting.entry(build).or_default().push(key.clone());
                        waiting = true;
                    }
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// Exclusive right to build one deferred singleton, released on drop
struct BuildClaim<'a> {
    tracker: &'a BuildTracker,
    key: EntryKey,
}
impl Drop for BuildClaim<'_> {
    fn drop(&mut self) {
        self.tracker
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .holders
            .remove(&self.key);
        self.tracker.released.notify_all();
    }
}

/// Handle of an entry in the registry arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

#[derive(Default)]
struct RegistryState {
    arena: Vec<Option<Arc<DependencyEntry>>>,
    index: HashMap<TypeId, Vec<EntryId>>,
}
impl RegistryState {
    fn entries_of(&self, type_id: TypeId) -> impl Iterator<Item = (EntryId, &Arc<DependencyEntry>)> {
        self.index
            .get(&type_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.arena[id.0].as_ref().map(|entry| (*id, entry)))
    }
}

/// Concurrent registry of [DependencyEntry]s
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    build_guards: Mutex<HashMap<EntryKey, Arc<Mutex<()>>>>,
    builds: BuildTracker,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry
    ///
    /// Validation and insertion happen under the same lock, two concurrent registrations of the same key can not
    /// both succeed.
    pub fn register(&self, entry: DependencyEntry) -> Result<EntryId, RegistrationError> {
        if entry.owner.is_abstract {
            return Err(RegistrationError::AbstractType(entry.owner));
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let duplicate = state
            .entries_of(entry.owner.type_id)
            .any(|(_, existing)| {
                existing.owner.type_id == entry.owner.type_id
                    && existing.qualifier == entry.qualifier
            });
        if duplicate {
            return Err(RegistrationError::Duplicate {
                owner: entry.owner,
                qualifier: entry.qualifier,
            });
        }

        let id = EntryId(state.arena.len());
        let mut keys = vec![entry.owner.type_id];
        keys.extend(
            entry
                .indexed_under
                .iter()
                .map(|info| info.type_id)
                .filter(|type_id| *type_id != entry.owner.type_id),
        );
        keys.sort_unstable();
        keys.dedup();

        tracing::trace!(
            "Registering {} ({}) under {} keys",
            entry.owner,
            entry.qualifier,
            keys.len()
        );

        state.arena.push(Some(Arc::new(entry)));
        for key in keys {
            state.index.entry(key).or_default().push(id);
        }

        Ok(id)
    }

    /// Finds the entry for a type and qualifier
    ///
    /// More than one match can only happen for abstract types and is reported as ambiguous.
    pub fn lookup(
        &self,
        info: TypeInfo,
        qualifier: &Qualifier,
    ) -> Result<Option<Arc<DependencyEntry>>, RequireError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches = state
            .entries_of(info.type_id)
            .filter(|(_, entry)| &entry.qualifier == qualifier)
            .map(|(_, entry)| entry.clone())
            .collect::<Vec<_>>();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => {
                let mut candidates = matches
                    .iter()
                    .map(|entry| entry.owner.type_name)
                    .collect::<Vec<_>>();
                candidates.sort_unstable();
                Err(RequireError::Ambiguous {
                    type_name: info.type_name,
                    qualifier: qualifier.clone(),
                    candidates,
                })
            }
        }
    }

    /// All entries for a type, ordered by owner name then qualifier
    pub fn lookup_all(&self, type_id: TypeId) -> Vec<Arc<DependencyEntry>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries = state
            .entries_of(type_id)
            .map(|(_, entry)| entry.clone())
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| {
            (a.owner.type_name, &a.qualifier).cmp(&(b.owner.type_name, &b.qualifier))
        });
        entries
    }

    pub fn contains(&self, type_id: TypeId, qualifier: &Qualifier) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let found = state
            .entries_of(type_id)
            .any(|(_, entry)| &entry.qualifier == qualifier);
        found
    }

    /// Removes every entry owned by `type_id` together with all of its index views
    ///
    /// Returns the number of removed entries.
    pub fn unregister(&self, type_id: TypeId) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let owned = state
            .entries_of(type_id)
            .filter(|(_, entry)| entry.owner.type_id == type_id)
            .map(|(id, entry)| (id, entry.clone()))
            .collect::<Vec<_>>();

        for (id, entry) in &owned {
            state.arena[id.0] = None;
            let keys = std::iter::once(entry.owner.type_id)
                .chain(entry.indexed_under.iter().map(|info| info.type_id));
            for key in keys {
                if let Some(ids) = state.index.get_mut(&key) {
                    ids.retain(|existing| existing != id);
                    if ids.is_empty() {
                        state.index.remove(&key);
                    }
                }
            }
        }

        owned.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = RegistryState::default();
        self.build_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let count = state.arena.iter().flatten().count();
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live entries in registration order
    pub fn entries(&self) -> Vec<Arc<DependencyEntry>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let entries = state.arena.iter().flatten().cloned().collect();
        entries
    }

    /// Lock serializing on-demand creation of one key
    pub(crate) fn build_guard(&self, key: EntryKey) -> Arc<Mutex<()>> {
        self.build_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}
