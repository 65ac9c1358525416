//! Statically declared metadata of a component
//!
//! A [Manifest] lists everything the container needs to know about a type: how to construct it, which fields
//! to inject afterwards, which abstract types it can be seen as, and which hooks run once it is built.

use std::{
    any::{type_name, Any},
    collections::VecDeque,
    fmt::Debug,
    sync::Arc,
};

use crate::{
    errors::{InjectError, RequireError},
    handle::InjectionHandle,
    qualifier::{Qualified, Qualifier},
    resolver::Resolver,
    types::{Binding, DependencyInfo, DynError, Injectable, Scope, TypeInfo},
};

/// A type the container can discover and build
pub trait Component: Injectable + Sized {
    fn manifest() -> Manifest<Self>;
}

/// A resolved but not yet typed value
pub(crate) type Resolved = Box<dyn Any + Send>;
type ResolveFn = fn(&InjectionHandle, &Qualifier) -> Result<Resolved, InjectError>;

fn resolve_erased<R: Resolver>(
    handle: &InjectionHandle,
    qualifier: &Qualifier,
) -> Result<Resolved, InjectError> {
    R::resolve(handle, qualifier).map(|resolved| Box::new(resolved) as Resolved)
}

/// A constructor parameter, field, or provider method parameter
#[derive(Clone)]
pub struct InjectionPoint {
    pub name: &'static str,
    pub qualifier: Qualifier,
    pub info: DependencyInfo,
    resolve: ResolveFn,
}
impl Debug for InjectionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("name", &self.name)
            .field("qualifier", &self.qualifier)
            .field("type", &self.info.type_info.type_name)
            .finish()
    }
}
impl Qualified for InjectionPoint {
    fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }
}
impl InjectionPoint {
    pub fn of<R: Resolver>(name: &'static str) -> Self {
        InjectionPoint {
            name,
            qualifier: Qualifier::default(),
            info: R::dependency_info(),
            resolve: resolve_erased::<R>,
        }
    }

    pub fn qualified(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub(crate) fn resolve(&self, handle: &InjectionHandle) -> Result<Resolved, InjectError> {
        (self.resolve)(handle, &self.qualifier)
    }
}

/// Resolves all points, collecting the names of every point that failed
pub(crate) fn resolve_points(
    product: &'static str,
    points: &[InjectionPoint],
    handle: &InjectionHandle,
) -> Result<Args, InjectError> {
    let mut values = VecDeque::with_capacity(points.len());
    let mut failed = Vec::new();
    let mut first_cause = None;

    for point in points {
        match point.resolve(handle) {
            Ok(value) => values.push_back((point.info.type_info, value)),
            Err(e) => {
                failed.push(point.name);
                first_cause.get_or_insert(e);
            }
        }
    }

    match first_cause {
        None => Ok(Args { product, values }),
        Some(cause) => Err(InjectError::UnresolvedParameters {
            product,
            params: failed,
            cause: Box::new(cause),
        }),
    }
}

/// Resolved arguments, handed to constructors and provider methods in declaration order
pub struct Args {
    product: &'static str,
    values: VecDeque<(TypeInfo, Resolved)>,
}
impl Args {
    /// Takes the next argument
    pub fn take<R: Resolver>(&mut self) -> Result<R, InjectError> {
        let (info, value) = self.values.pop_front().ok_or_else(|| {
            InjectError::Other(
                format!("'{}' took more arguments than it declared", self.product).into(),
            )
        })?;

        value.downcast::<R>().map(|value| *value).map_err(|_| {
            RequireError::DowncastFailed {
                required_type: type_name::<R>(),
                actual_type: info.type_name,
            }
            .into()
        })
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

type BuildFn<T> = dyn Fn(&mut Args) -> Result<T, DynError> + Send + Sync;

/// One way to construct `T`
///
/// ```ignore
/// Constructor::new(|args| Ok(Service { repo: args.take()? }))
///     .param::<Arc<dyn Repository>>("repo")
/// ```
pub struct Constructor<T> {
    pub(crate) params: Vec<InjectionPoint>,
    pub(crate) primary: bool,
    build: Arc<BuildFn<T>>,
}
impl<T> Clone for Constructor<T> {
    fn clone(&self) -> Self {
        Constructor {
            params: self.params.clone(),
            primary: self.primary,
            build: self.build.clone(),
        }
    }
}
impl<T> Constructor<T> {
    pub fn new(build: impl Fn(&mut Args) -> Result<T, DynError> + Send + Sync + 'static) -> Self {
        Constructor {
            params: Vec::new(),
            primary: false,
            build: Arc::new(build),
        }
    }

    pub fn param<R: Resolver>(mut self, name: &'static str) -> Self {
        self.params.push(InjectionPoint::of::<R>(name));
        self
    }

    pub fn param_qualified<R: Resolver>(
        mut self,
        name: &'static str,
        qualifier: impl Into<Qualifier>,
    ) -> Self {
        self.params
            .push(InjectionPoint::of::<R>(name).qualified(qualifier));
        self
    }

    /// Marks this constructor as the one to use, regardless of arity
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

type ApplyFn<T> = dyn Fn(&mut T, Resolved) -> Result<(), InjectError> + Send + Sync;

/// A field injected after construction
pub struct FieldInjector<T> {
    pub(crate) point: InjectionPoint,
    apply: Arc<ApplyFn<T>>,
}

type HookFn<T> = dyn Fn(&T) -> Result<(), DynError> + Send + Sync;

/// Runs once an instance is fully built
pub struct PostConstruct<T> {
    pub name: &'static str,
    pub order: i32,
    /// Declared by an embedded base part rather than by the type itself
    pub inherited: bool,
    run: Arc<HookFn<T>>,
}

/// Everything the container knows about `T`
pub struct Manifest<T> {
    pub(crate) qualifier: Qualifier,
    pub(crate) scope: Scope,
    pub(crate) intercept: bool,
    pub(crate) exclude_root_registration: bool,
    pub(crate) profiles: Vec<String>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) constructors: Vec<Constructor<T>>,
    pub(crate) fields: Vec<FieldInjector<T>>,
    pub(crate) hooks: Vec<PostConstruct<T>>,
}

impl<T: Injectable> Default for Manifest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Injectable + Default> Manifest<T> {
    /// Manifest with a no-argument constructor using `Default`
    pub fn with_default() -> Self {
        Self::new().constructor(Constructor::new(|_| Ok(T::default())))
    }
}

impl<T: Injectable> Manifest<T> {
    pub fn new() -> Self {
        Manifest {
            qualifier: Qualifier::default(),
            scope: Scope::Singleton,
            intercept: true,
            exclude_root_registration: false,
            profiles: Vec::new(),
            bindings: Vec::new(),
            constructors: Vec::new(),
            fields: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    /// Opts out of interception by the proxy factory
    pub fn no_intercept(mut self) -> Self {
        self.intercept = false;
        self
    }

    /// Only register under the type itself, never under its bindings
    pub fn exclude_root_registration(mut self) -> Self {
        self.exclude_root_registration = true;
        self
    }

    /// Only load while the profile is active
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    /// Declares an abstract type this component can be resolved as
    pub fn provides<I: ?Sized + Injectable>(mut self, project: fn(Arc<T>) -> Arc<I>) -> Self {
        self.bindings.push(Binding::new(project));
        self
    }

    pub fn constructor(mut self, constructor: Constructor<T>) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn field<R: Resolver>(
        self,
        name: &'static str,
        setter: impl Fn(&mut T, R) + Send + Sync + 'static,
    ) -> Self {
        self.field_at(InjectionPoint::of::<R>(name), setter)
    }

    pub fn field_qualified<R: Resolver>(
        self,
        name: &'static str,
        qualifier: impl Into<Qualifier>,
        setter: impl Fn(&mut T, R) + Send + Sync + 'static,
    ) -> Self {
        self.field_at(InjectionPoint::of::<R>(name).qualified(qualifier), setter)
    }

    fn field_at<R: Resolver>(
        mut self,
        point: InjectionPoint,
        setter: impl Fn(&mut T, R) + Send + Sync + 'static,
    ) -> Self {
        let field = point.name;
        let apply = move |target: &mut T, value: Resolved| {
            let value = value.downcast::<R>().map_err(|_| InjectError::FieldFailed {
                product: type_name::<T>(),
                field,
                cause: Box::new(
                    RequireError::DowncastFailed {
                        required_type: type_name::<R>(),
                        actual_type: "unknown",
                    }
                    .into(),
                ),
            })?;
            setter(target, *value);
            Ok(())
        };
        self.fields.push(FieldInjector {
            point,
            apply: Arc::new(apply),
        });
        self
    }

    pub fn post_construct(
        self,
        name: &'static str,
        order: i32,
        hook: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.hook(name, order, false, hook)
    }

    /// A hook contributed by an embedded base part
    ///
    /// Sorted together with the type's own hooks, own hooks win ties.
    pub fn inherited_post_construct(
        self,
        name: &'static str,
        order: i32,
        hook: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.hook(name, order, true, hook)
    }

    fn hook(
        mut self,
        name: &'static str,
        order: i32,
        inherited: bool,
        hook: impl Fn(&T) -> Result<(), DynError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.push(PostConstruct {
            name,
            order,
            inherited,
            run: Arc::new(hook),
        });
        self
    }
}

// Building
impl<T: Injectable> Manifest<T> {
    /// Primary constructor, otherwise the one with the most parameters
    pub(crate) fn selected_constructor(&self) -> Option<&Constructor<T>> {
        if let Some(primary) = self.constructors.iter().find(|c| c.primary) {
            return Some(primary);
        }

        // max_by_key returns the last maximum - keep the first declared one instead
        self.constructors
            .iter()
            .rev()
            .max_by_key(|constructor| constructor.arity())
    }

    fn fallback_constructor(&self) -> Option<&Constructor<T>> {
        self.constructors.iter().find(|c| c.arity() == 0)
    }

    /// Points the dependency graph is built from
    pub(crate) fn dependencies(&self) -> Vec<InjectionPoint> {
        let params = self
            .selected_constructor()
            .map(|constructor| constructor.params.clone())
            .unwrap_or_default();

        params
            .into_iter()
            .chain(self.fields.iter().map(|field| field.point.clone()))
            .collect()
    }

    pub(crate) fn construct(&self, handle: &InjectionHandle) -> Result<T, InjectError> {
        let product = type_name::<T>();
        let selected = self
            .selected_constructor()
            .ok_or(InjectError::NoConstructor(product))?;

        let args = match resolve_points(product, &selected.params, handle) {
            Ok(args) => args,
            Err(e) => match self.fallback_constructor() {
                Some(fallback) if selected.arity() > 0 => {
                    tracing::debug!("Falling back to no-argument constructor of {product}: {e}");
                    return Self::invoke(fallback, resolve_points(product, &[], handle)?);
                }
                _ => return Err(e),
            },
        };

        Self::invoke(selected, args)
    }

    fn invoke(constructor: &Constructor<T>, mut args: Args) -> Result<T, InjectError> {
        (constructor.build)(&mut args).map_err(|error| InjectError::ConstructorFailed {
            product: type_name::<T>(),
            error,
        })
    }

    /// Resolves all field values, then applies them in declaration order
    pub(crate) fn inject_fields(
        &self,
        target: &mut T,
        handle: &InjectionHandle,
    ) -> Result<(), InjectError> {
        if self.fields.is_empty() {
            return Ok(());
        }

        let threshold = handle.container().settings().parallel_field_threshold;
        let values = if self.fields.len() > threshold {
            self.resolve_fields_parallel(handle)
        } else {
            self.fields
                .iter()
                .map(|field| field.point.resolve(handle))
                .collect::<Vec<_>>()
        };

        for (field, value) in self.fields.iter().zip(values) {
            let value = value.map_err(|cause| InjectError::FieldFailed {
                product: type_name::<T>(),
                field: field.point.name,
                cause: Box::new(cause),
            })?;
            (field.apply)(target, value)?;
        }

        Ok(())
    }

    fn resolve_fields_parallel(
        &self,
        handle: &InjectionHandle,
    ) -> Vec<Result<Resolved, InjectError>> {
        tracing::trace!(
            "Resolving {} fields of {} in parallel",
            self.fields.len(),
            type_name::<T>()
        );

        std::thread::scope(|scope| {
            let workers = self
                .fields
                .iter()
                .map(|field| scope.spawn(move || field.point.resolve(handle)))
                .collect::<Vec<_>>();

            workers
                .into_iter()
                .zip(&self.fields)
                .map(|(worker, field)| {
                    worker.join().unwrap_or_else(|_| {
                        Err(InjectError::Other(
                            format!("Resolving field '{}' panicked", field.point.name).into(),
                        ))
                    })
                })
                .collect()
        })
    }

    /// Hooks in a flat sort over `order`, own hooks before inherited ones on ties
    pub(crate) fn ordered_hooks(&self) -> Vec<&PostConstruct<T>> {
        let mut hooks = self
            .hooks
            .iter()
            .filter(|hook| !hook.inherited)
            .chain(self.hooks.iter().filter(|hook| hook.inherited))
            .collect::<Vec<_>>();
        hooks.sort_by_key(|hook| hook.order);
        hooks
    }

    pub(crate) fn run_hooks(&self, instance: &T) -> Result<(), InjectError> {
        for hook in self.ordered_hooks() {
            tracing::trace!("Running {} on {}", hook.name, type_name::<T>());
            (hook.run)(instance).map_err(|error| InjectError::HookFailed {
                product: type_name::<T>(),
                hook: hook.name,
                error,
            })?;
        }
        Ok(())
    }
}
