use std::{
    any::{type_name, Any},
    fmt::Debug,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, RwLock, Weak,
    },
    thread::{self, sleep},
    time::Duration,
};

use futures::FutureExt;
use futures_channel::oneshot;

use crate::{
    errors::{InitError, InjectError, RegistrationError, RequireError},
    factories::{component_entry, ComponentFactory, DynComponent},
    finder::TypeFinder,
    handle::{ExtraArgs, InjectionHandle},
    loader::{LoadPlan, Loader},
    manifest::Component,
    proxy::ProxyFactory,
    qualifier::{Qualified, Qualifier},
    registry::{DependencyEntry, Factory, Registry},
    settings::ContainerSettings,
    types::{Binding, DynError, EntryKey, Injectable, Instance, InstanceSet, Scope, TypeInfo},
};

/// Builds a registry entry, run again on every load
pub(crate) type Preregistration = Arc<dyn Fn() -> DependencyEntry + Send + Sync>;

/// Where the container is in its load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    NotLoaded,
    /// Provider methods without service dependencies
    LoadingPhaseBefore,
    LoadingServiceLayers,
    /// Provider methods depending on services
    LoadingPhaseAfter,
    Loaded,
    Failed,
}
impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            LoadState::LoadingPhaseBefore
                | LoadState::LoadingServiceLayers
                | LoadState::LoadingPhaseAfter
        )
    }
}

struct Lifecycle {
    state: LoadState,
    last_error: Option<InitError>,
    /// Informed once the running load finishes
    waiters: Vec<oneshot::Sender<Result<(), InitError>>>,
}

/// Container owning every managed instance
///
/// Created by [crate::ContainerBuilder]. Cloning is cheap, all clones share one registry.
#[derive(Clone)]
pub struct Container(Arc<ContainerInner>);

/// Non owning reference to a [Container]
#[derive(Clone)]
pub struct WeakContainer(Weak<ContainerInner>);
impl WeakContainer {
    pub fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(Container)
    }
}

pub(crate) struct ContainerInner {
    settings: ContainerSettings,
    finders: Vec<Box<dyn TypeFinder>>,
    proxy: Box<dyn ProxyFactory>,
    preregistered: Vec<Preregistration>,
    registry: Registry,
    pools: crate::pool::WorkerPools,
    lifecycle: Mutex<Lifecycle>,
    aborted: AtomicBool,
    plan: RwLock<Option<Arc<LoadPlan>>>,
    /// Strong halves of weak snapshots handed out during injection
    retained: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_struct("Container");
        map.field("state", &self.state());
        for entry in self.0.registry.entries() {
            let scope = match entry.scope() {
                Scope::Singleton => "singleton",
                Scope::Prototype => "prototype",
            };
            map.field(entry.owner.type_name, &format!("{} ({scope})", entry.qualifier));
        }
        map.finish()
    }
}

impl Container {
    pub(crate) fn new(
        settings: ContainerSettings,
        finders: Vec<Box<dyn TypeFinder>>,
        proxy: Box<dyn ProxyFactory>,
        preregistered: Vec<Preregistration>,
    ) -> Self {
        let pools = crate::pool::WorkerPools::new(&settings);
        Container(Arc::new(ContainerInner {
            settings,
            finders,
            proxy,
            preregistered,
            registry: Registry::new(),
            pools,
            lifecycle: Mutex::new(Lifecycle {
                state: LoadState::NotLoaded,
                last_error: None,
                waiters: Vec::new(),
            }),
            aborted: AtomicBool::new(false),
            plan: RwLock::new(None),
            retained: Mutex::new(Vec::new()),
        }))
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.0))
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.0.settings
    }

    /// A fresh handle for resolving dependencies
    pub fn handle(&self) -> InjectionHandle {
        InjectionHandle::new(self.clone())
    }

    /// Handle used by the loader, resolving before the container counts as loaded
    pub(crate) fn load_handle(&self) -> InjectionHandle {
        InjectionHandle::for_load(self.clone())
    }
}

/// Ends a load once it completed or its future was dropped
struct RunningLoad<'a> {
    container: &'a Container,
    finished: bool,
}
impl RunningLoad<'_> {
    fn finish(mut self, result: Result<(), InitError>) -> Result<(), InitError> {
        self.finished = true;
        self.container.finish_load(result)
    }
}
impl Drop for RunningLoad<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!("Load was dropped before it finished");
        // Tasks still queued on the pools must not start
        self.container.0.aborted.store(true, Ordering::SeqCst);
        let _ = self.container.finish_load(Err(InitError::Aborted));
    }
}

// Lifecycle
impl Container {
    /// Discovers, plans and instantiates everything
    ///
    /// Loading a loaded container does nothing. A failed load leaves the registry empty and can be retried.
    /// Calling this while another load runs waits for that load instead. Dropping the returned future before it
    /// finished fails the load with [InitError::Aborted].
    pub async fn load(&self) -> Result<(), InitError> {
        let waiting = {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                LoadState::Loaded => return Ok(()),
                LoadState::NotLoaded | LoadState::Failed => {
                    lifecycle.state = LoadState::LoadingPhaseBefore;
                    lifecycle.last_error = None;
                    self.0.aborted.store(false, Ordering::SeqCst);
                    None
                }
                _ => {
                    let (tx, rx) = oneshot::channel();
                    lifecycle.waiters.push(tx);
                    Some(rx)
                }
            }
        };
        if let Some(waiting) = waiting {
            tracing::debug!("Load already running, waiting for it");
            return waiting.await.unwrap_or(Err(InitError::Unloaded));
        }

        let running = RunningLoad {
            container: self,
            finished: false,
        };
        tracing::debug!("Loading container");

        let result = match self.0.settings.load_timeout {
            Some(timeout) => self.load_with_timeout(timeout).await,
            None => Loader::new(self.clone()).run().await,
        };

        running.finish(result)
    }

    async fn load_with_timeout(&self, timeout: Duration) -> Result<(), InitError> {
        // Detached, the sleeper outlives a load finishing early and its send then goes nowhere
        let (timeout_tx, mut timeout_rx) = oneshot::channel::<()>();
        thread::spawn(move || {
            sleep(timeout);
            if timeout_tx.send(()).is_err() {
                tracing::trace!("Load finished before its timeout");
            }
        });

        let load = Loader::new(self.clone()).run().fuse();
        futures::pin_mut!(load);

        futures::select! {
            result = load => result,
            _ = timeout_rx => {
                // Queued tasks check the flag before they start
                self.0.aborted.store(true, Ordering::SeqCst);
                Err(InitError::Timeout)
            }
        }
    }

    /// Publishes the outcome of a load
    ///
    /// An unload that raced the end of the load still wins, the lifecycle lock orders the two.
    fn finish_load(&self, result: Result<(), InitError>) -> Result<(), InitError> {
        let (result, waiters) = {
            let mut lifecycle = self.lifecycle();
            let result = match result {
                Ok(()) if self.is_aborted() => Err(InitError::Aborted),
                other => other,
            };
            match &result {
                Ok(()) => {
                    lifecycle.state = LoadState::Loaded;
                    tracing::info!("Container loaded with {} entries", self.0.registry.len());
                }
                Err(e) => {
                    lifecycle.state = LoadState::Failed;
                    lifecycle.last_error = Some(e.clone());
                    self.clear();
                    tracing::error!("Container failed to load: {e}");
                }
            }
            (result, std::mem::take(&mut lifecycle.waiters))
        };

        for waiter in waiters {
            // The waiter may have given up
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Drops every instance and returns to [LoadState::NotLoaded]
    ///
    /// While a load is running this aborts it instead, the load then fails with [InitError::Aborted].
    pub fn unload(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state.is_loading() {
            tracing::debug!("Aborting running load");
            self.0.aborted.store(true, Ordering::SeqCst);
            return;
        }

        self.clear();
        lifecycle.state = LoadState::NotLoaded;
        lifecycle.last_error = None;
        tracing::debug!("Container unloaded");
    }

    fn clear(&self) {
        self.0.registry.clear();
        *self.0.plan.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.0
            .retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    pub fn state(&self) -> LoadState {
        self.lifecycle().state
    }

    /// Resolves once the current or next load finished
    pub fn loaded(&self) -> impl Future<Output = Result<(), InitError>> + Send + 'static {
        let waiting = {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                LoadState::Loaded => Err(Ok(())),
                LoadState::Failed => Err(Err(lifecycle
                    .last_error
                    .clone()
                    .unwrap_or(InitError::Unloaded))),
                _ => {
                    let (tx, rx) = oneshot::channel();
                    lifecycle.waiters.push(tx);
                    Ok(rx)
                }
            }
        };

        async move {
            match waiting {
                Ok(rx) => rx.await.unwrap_or(Err(InitError::Unloaded)),
                Err(done) => done,
            }
        }
    }

    /// Graph, layers and phases of the last successful planning step
    pub fn plan(&self) -> Option<Arc<LoadPlan>> {
        self.0
            .plan
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.0.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_loaded(&self) -> Result<(), RequireError> {
        match self.is_loaded() {
            true => Ok(()),
            false => Err(RequireError::NotLoaded),
        }
    }
}

// Internals used by the loader, handles and resolvers
impl Container {
    pub(crate) fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub(crate) fn pools(&self) -> &crate::pool::WorkerPools {
        &self.0.pools
    }

    pub(crate) fn finders(&self) -> &[Box<dyn TypeFinder>] {
        &self.0.finders
    }

    pub(crate) fn proxy_factory(&self) -> &dyn ProxyFactory {
        self.0.proxy.as_ref()
    }

    pub(crate) fn preregistered(&self) -> &[Preregistration] {
        &self.0.preregistered
    }

    pub(crate) fn set_state(&self, state: LoadState) {
        tracing::debug!("Container state: {state:?}");
        self.lifecycle().state = state;
    }

    pub(crate) fn set_plan(&self, plan: Arc<LoadPlan>) {
        *self.0.plan.write().unwrap_or_else(PoisonError::into_inner) = Some(plan);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::SeqCst)
    }

    /// Keeps `value` alive until the container is unloaded
    pub(crate) fn retain(&self, value: Arc<dyn Any + Send + Sync>) {
        self.0
            .retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    pub(crate) fn resolve_instance(
        &self,
        handle: &InjectionHandle,
        info: TypeInfo,
        qualifier: &Qualifier,
    ) -> Result<Instance, InjectError> {
        if !handle.is_loading() {
            self.ensure_loaded()?;
        }

        let missing = || RequireError::TypeMissing {
            type_name: info.type_name,
            qualifier: qualifier.clone(),
        };

        let entry = self.0.registry.lookup(info, qualifier)?.ok_or_else(missing)?;
        let instances = entry.resolve(handle)?;
        let instance = instances.get(info.type_id).cloned().ok_or_else(missing)?;
        Ok(instance)
    }

    pub(crate) fn resolve_all(
        &self,
        handle: &InjectionHandle,
        info: TypeInfo,
    ) -> Result<Vec<Instance>, InjectError> {
        if !handle.is_loading() {
            self.ensure_loaded()?;
        }

        let mut resolved = Vec::new();
        for entry in self.0.registry.lookup_all(info.type_id) {
            let instances = entry.resolve(handle)?;
            if let Some(instance) = instances.get(info.type_id) {
                resolved.push(instance.clone());
            }
        }
        Ok(resolved)
    }
}

/// Registry entry for a provider function
pub(crate) fn provider_entry<T: Injectable>(
    qualifier: Qualifier,
    scope: Scope,
    provider: Arc<dyn Fn(&InjectionHandle) -> Result<T, DynError> + Send + Sync>,
) -> DependencyEntry {
    let factory: Factory = Arc::new(move |handle| {
        provider(handle)
            .map(|value| InstanceSet::single(Instance::new(value)))
            .map_err(|error| InjectError::ProviderFailed {
                product: type_name::<T>().to_string(),
                error,
            })
    });

    let owner = TypeInfo::of::<T>();
    match scope {
        Scope::Singleton => DependencyEntry::deferred(owner, qualifier, Vec::new(), factory),
        Scope::Prototype => DependencyEntry::prototype(owner, qualifier, Vec::new(), factory),
    }
}

// Registration API
impl Container {
    /// Registers an existing instance under the default qualifier
    pub fn register_dependency<T: Injectable>(&self, instance: T) -> Result<(), RegistrationError> {
        self.register_dependency_qualified(instance, Qualifier::default())
    }

    pub fn register_dependency_qualified<T: Injectable>(
        &self,
        instance: T,
        qualifier: impl Into<Qualifier>,
    ) -> Result<(), RegistrationError> {
        self.register_arc(Arc::new(instance), qualifier)
    }

    /// Registers an existing instance, additionally resolvable as the abstract types of `bindings`
    pub fn register_dependency_bound<T: Injectable>(
        &self,
        instance: T,
        qualifier: impl Into<Qualifier>,
        bindings: &[Binding],
    ) -> Result<(), RegistrationError> {
        let primary = Instance::new(instance);
        let views = bindings
            .iter()
            .filter(|binding| !binding.is_root())
            .filter_map(|binding| binding.project(&primary))
            .collect();
        self.register_entry(DependencyEntry::singleton(
            qualifier.into(),
            InstanceSet { primary, views },
        ))
    }

    /// Registers a shared instance
    ///
    /// `T` has to be concrete, trait objects are rejected with [RegistrationError::AbstractType].
    pub fn register_arc<T: ?Sized + Injectable>(
        &self,
        instance: Arc<T>,
        qualifier: impl Into<Qualifier>,
    ) -> Result<(), RegistrationError> {
        let info = TypeInfo::of::<T>();
        if info.is_abstract {
            return Err(RegistrationError::AbstractType(info));
        }
        self.register_entry(DependencyEntry::singleton(
            qualifier.into(),
            InstanceSet::single(Instance::from_arc(instance)),
        ))
    }

    /// Registers a function producing `T`
    ///
    /// Singletons call it once on first resolution, prototypes on every resolution.
    pub fn register_provider<T: Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
        scope: Scope,
        provider: impl Fn(&InjectionHandle) -> Result<T, DynError> + Send + Sync + 'static,
    ) -> Result<(), RegistrationError> {
        self.register_entry(provider_entry(qualifier.into(), scope, Arc::new(provider)))
    }

    fn register_entry(&self, entry: DependencyEntry) -> Result<(), RegistrationError> {
        if !self.is_loaded() {
            return Err(RegistrationError::NotLoaded);
        }
        tracing::debug!("Registering {} ({})", entry.owner, entry.qualifier);
        self.0.registry.register(entry).map(|_| ())
    }

    /// Removes every registration owned by `T`, including its abstract views
    ///
    /// Returns the number of removed registrations.
    pub fn unregister_dependency<T: ?Sized + Injectable>(&self) -> Result<usize, RegistrationError> {
        if !self.is_loaded() {
            return Err(RegistrationError::NotLoaded);
        }
        let removed = self.0.registry.unregister(TypeInfo::of::<T>().type_id);
        tracing::debug!("Unregistered {removed} entries of {}", type_name::<T>());
        Ok(removed)
    }
}

// Lookup API
impl Container {
    /// Returns the instance registered for `T`, or `None` if it can not be resolved
    ///
    /// Failures are logged, use [Container::require] to get them.
    pub fn get_dependency<T: ?Sized + Injectable>(&self) -> Option<Arc<T>> {
        self.get_dependency_qualified(Qualifier::default())
    }

    pub fn get_dependency_qualified<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Option<Arc<T>> {
        match self.require_qualified::<T>(qualifier) {
            Ok(instance) => Some(instance),
            Err(e) => {
                tracing::warn!("Lookup of {} failed: {e}", type_name::<T>());
                None
            }
        }
    }

    /// Attempts to get the requested type
    pub fn require<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, InjectError> {
        self.require_qualified(Qualifier::default())
    }

    pub fn require_qualified<T: ?Sized + Injectable>(
        &self,
        qualifier: impl Into<Qualifier>,
    ) -> Result<Arc<T>, InjectError> {
        self.handle().require::<T>(&qualifier.into())
    }

    /// Every registration of `T` regardless of qualifier, ordered by owning type then qualifier
    pub fn get_dependency_list<T: ?Sized + Injectable>(&self) -> Result<Vec<Arc<T>>, InjectError> {
        self.handle().require_all::<T>()
    }
}

// Instance API
impl Container {
    /// Builds a new, unregistered instance of `T`
    pub fn new_instance<T: Component>(&self) -> Result<Arc<T>, InjectError> {
        self.new_instance_with(ExtraArgs::new())
    }

    /// Builds a new, unregistered instance of `T`, preferring `extra` over registered values
    pub fn new_instance_with<T: Component>(&self, extra: ExtraArgs) -> Result<Arc<T>, InjectError> {
        self.ensure_loaded()?;
        let handle = self.handle().with_extra(extra);
        let built = ComponentFactory::<T>::new().instantiate(&handle)?;
        Ok(downcast_primary::<T>(&built)?)
    }

    /// Injects the fields of an existing value
    pub fn inject_dependencies<T: Component>(&self, target: &mut T) -> Result<(), InjectError> {
        self.ensure_loaded()?;
        T::manifest().inject_fields(target, &self.handle())
    }

    /// Returns the registered `T`, building and registering it first if necessary
    ///
    /// Concurrent callers for the same type and qualifier build it once.
    pub fn get_or_register<T: Component>(&self) -> Result<Arc<T>, InjectError> {
        self.ensure_loaded()?;

        let component = ComponentFactory::<T>::descriptor();
        let info = component.info();
        let qualifier = component.qualifier().clone();
        let handle = self.handle();

        if !self.0.registry.contains(info.type_id, &qualifier) {
            let guard = self.0.registry.build_guard(EntryKey {
                type_id: info.type_id,
                qualifier: qualifier.clone(),
            });
            let _building = guard.lock().unwrap_or_else(PoisonError::into_inner);

            // Another caller may have finished while we waited
            if !self.0.registry.contains(info.type_id, &qualifier) {
                let built = match component.scope() {
                    Scope::Singleton => Some(component.instantiate(&handle.enter(info)?)?),
                    Scope::Prototype => None,
                };
                tracing::debug!("Registering {info} ({qualifier}) on demand");
                self.0.registry.register(component_entry(component, built))?;
            }
        }

        handle.require::<T>(&qualifier)
    }
}

fn downcast_primary<T: Injectable>(built: &InstanceSet) -> Result<Arc<T>, RequireError> {
    built
        .primary
        .downcast::<T>()
        .map_err(|actual_type| RequireError::DowncastFailed {
            required_type: type_name::<T>(),
            actual_type,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContainerBuilder;

    #[test]
    fn unload_racing_the_end_of_a_load_wins() {
        let container = ContainerBuilder::new().build();
        container.set_state(LoadState::LoadingPhaseAfter);
        container
            .registry()
            .register(DependencyEntry::singleton(
                Qualifier::default(),
                InstanceSet::single(Instance::new(3_u8)),
            ))
            .unwrap();

        // Arrives after the loader checked for aborts the last time
        container.unload();
        assert_eq!(container.state(), LoadState::LoadingPhaseAfter);

        let result = container.finish_load(Ok(()));
        assert!(matches!(result, Err(InitError::Aborted)));
        assert_eq!(container.state(), LoadState::Failed);
        assert!(container.registry().is_empty());
    }

    #[test]
    fn public_access_waits_for_the_load_to_finish() {
        let container = ContainerBuilder::new().build();
        container.set_state(LoadState::LoadingServiceLayers);
        container
            .registry()
            .register(DependencyEntry::singleton(
                Qualifier::default(),
                InstanceSet::single(Instance::new(3_u8)),
            ))
            .unwrap();

        assert!(matches!(
            container.require::<u8>(),
            Err(InjectError::RequireError(RequireError::NotLoaded))
        ));
        assert_eq!(
            container.register_dependency(4_u16),
            Err(RegistrationError::NotLoaded)
        );
        assert_eq!(*container.load_handle().require::<u8>(&Qualifier::default()).unwrap(), 3);
    }
}
