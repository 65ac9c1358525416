//! Configuration types and their provider methods
//!
//! A configuration is created once per load and owns provider methods. Each method produces one bean, its
//! parameters are resolved like constructor parameters.

use std::{any::type_name, fmt::Debug, sync::Arc};

use crate::{
    errors::InjectError,
    handle::InjectionHandle,
    manifest::{resolve_points, Args, InjectionPoint},
    qualifier::{Qualified, Qualifier},
    resolver::Resolver,
    types::{Binding, DynError, Injectable, Instance, InstanceSet, Scope, TypeInfo},
};

/// A type owning provider methods
pub trait Configuration: Injectable + Sized {
    fn manifest() -> ConfigurationManifest<Self>;
}

type CreateFn<C> = dyn Fn() -> Result<C, DynError> + Send + Sync;
type InvokeFn<C> = dyn Fn(&C, &mut Args) -> Result<Instance, DynError> + Send + Sync;

/// Provider method of a configuration `C`
///
/// ```ignore
/// BeanMethod::new("pool", |_: &Db, args| Ok(Pool::new(args.take::<Arc<Settings>>()?)))
///     .param::<Arc<Settings>>("settings")
/// ```
pub struct BeanMethod<C> {
    name: &'static str,
    produces: TypeInfo,
    qualifier: Qualifier,
    scope: Scope,
    params: Vec<InjectionPoint>,
    bindings: Vec<Binding>,
    invoke: Arc<InvokeFn<C>>,
}
impl<C: Injectable> BeanMethod<C> {
    pub fn new<R: Injectable>(
        name: &'static str,
        method: impl Fn(&C, &mut Args) -> Result<R, DynError> + Send + Sync + 'static,
    ) -> Self {
        BeanMethod {
            name,
            produces: TypeInfo::of::<R>(),
            qualifier: Qualifier::default(),
            scope: Scope::Singleton,
            params: Vec::new(),
            bindings: Vec::new(),
            invoke: Arc::new(move |config: &C, args: &mut Args| {
                method(config, args).map(Instance::new)
            }),
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

    pub fn qualifier(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Call the method on every resolution instead of once
    pub fn prototype(mut self) -> Self {
        self.scope = Scope::Prototype;
        self
    }

    /// Declares an abstract type the produced bean can be resolved as
    ///
    /// `R` has to be the type the method returns.
    pub fn provides<R: Injectable, I: ?Sized + Injectable>(
        mut self,
        project: fn(Arc<R>) -> Arc<I>,
    ) -> Self {
        debug_assert_eq!(
            TypeInfo::of::<R>(),
            self.produces,
            "binding declared for a type the method does not return"
        );
        self.bindings.push(Binding::new(project));
        self
    }
}

/// Everything the container knows about a configuration `C`
pub struct ConfigurationManifest<C> {
    create: Arc<CreateFn<C>>,
    profiles: Vec<String>,
    methods: Vec<BeanMethod<C>>,
}
impl<C: Injectable + Default> ConfigurationManifest<C> {
    pub fn with_default() -> Self {
        Self::new(|| Ok(C::default()))
    }
}
impl<C: Injectable> ConfigurationManifest<C> {
    pub fn new(create: impl Fn() -> Result<C, DynError> + Send + Sync + 'static) -> Self {
        ConfigurationManifest {
            create: Arc::new(create),
            profiles: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Only load while the profile is active
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    pub fn bean(mut self, method: BeanMethod<C>) -> Self {
        self.methods.push(method);
        self
    }
}

type ErasedInvoke =
    dyn Fn(&Instance, &mut Args) -> Result<Instance, InjectError> + Send + Sync;

/// Type erased provider method
#[derive(Clone)]
pub struct ProviderMethod {
    pub name: &'static str,
    pub owner: TypeInfo,
    pub produces: TypeInfo,
    pub qualifier: Qualifier,
    pub scope: Scope,
    pub params: Vec<InjectionPoint>,
    pub bindings: Vec<Binding>,
    invoke: Arc<ErasedInvoke>,
}
impl Debug for ProviderMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderMethod")
            .field("id", &self.id())
            .field("produces", &self.produces.type_name)
            .field("qualifier", &self.qualifier)
            .finish()
    }
}
impl Qualified for ProviderMethod {
    fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }
}
impl ProviderMethod {
    fn erase<C: Injectable>(method: BeanMethod<C>) -> Self {
        let owner = TypeInfo::of::<C>();
        let BeanMethod {
            name,
            produces,
            qualifier,
            scope,
            params,
            bindings,
            invoke,
        } = method;

        let erased = move |config: &Instance, args: &mut Args| {
            let config = config.downcast::<C>().map_err(|actual| {
                InjectError::Other(
                    format!("Expected configuration '{}', got '{actual}'", type_name::<C>())
                        .into(),
                )
            })?;
            invoke(&*config, args).map_err(|error| InjectError::ProviderFailed {
                product: format!("{}::{name}", owner.type_name),
                error,
            })
        };

        ProviderMethod {
            name,
            owner,
            produces,
            qualifier,
            scope,
            params,
            bindings,
            invoke: Arc::new(erased),
        }
    }

    /// Unique name of the method: `{owner}::{method}`
    pub fn id(&self) -> String {
        format!("{}::{}", self.owner.type_name, self.name)
    }

    /// Resolves the parameters and calls the method on `config`
    ///
    /// Produced beans are not intercepted, their views are plain projections.
    pub(crate) fn invoke(
        &self,
        config: &Instance,
        handle: &InjectionHandle,
    ) -> Result<InstanceSet, InjectError> {
        let mut args = resolve_points(self.produces.type_name, &self.params, handle)?;
        let primary = (self.invoke)(config, &mut args)?;

        let views = self
            .bindings
            .iter()
            .filter(|binding| !binding.is_root())
            .filter_map(|binding| binding.project(&primary))
            .collect();

        Ok(InstanceSet { primary, views })
    }
}

/// Type erased [ConfigurationManifest]
pub struct ConfigurationDescriptor {
    pub info: TypeInfo,
    pub profiles: Vec<String>,
    pub methods: Vec<ProviderMethod>,
    create: Arc<dyn Fn() -> Result<Instance, DynError> + Send + Sync>,
}
impl Debug for ConfigurationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationDescriptor")
            .field("type", &self.info.type_name)
            .field("methods", &self.methods)
            .finish()
    }
}
impl ConfigurationDescriptor {
    pub fn of<C: Configuration>() -> Self {
        let ConfigurationManifest {
            create,
            profiles,
            methods,
        } = C::manifest();

        ConfigurationDescriptor {
            info: TypeInfo::of::<C>(),
            profiles,
            methods: methods.into_iter().map(ProviderMethod::erase).collect(),
            create: Arc::new(move || create().map(Instance::new)),
        }
    }

    /// Creates the configuration instance
    pub(crate) fn create(&self) -> Result<Instance, DynError> {
        (self.create)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Settings {
        prefix: String,
    }

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }
    struct Hello(String);
    impl Greeter for Hello {
        fn greet(&self) -> String {
            format!("{}hello", self.0)
        }
    }

    impl Configuration for Settings {
        fn manifest() -> ConfigurationManifest<Self> {
            ConfigurationManifest::new(|| {
                Ok(Settings {
                    prefix: "> ".into(),
                })
            })
            .bean(
                BeanMethod::new("hello", |settings: &Settings, _| {
                    Ok(Hello(settings.prefix.clone()))
                })
                .qualifier("loud")
                .provides(|hello: Arc<Hello>| hello as Arc<dyn Greeter>),
            )
        }
    }

    #[test]
    fn provider_methods_are_erased_with_ids() {
        let descriptor = ConfigurationDescriptor::of::<Settings>();
        let method = &descriptor.methods[0];

        assert_eq!(
            method.id(),
            format!("{}::hello", type_name::<Settings>())
        );
        assert_eq!(method.produces, TypeInfo::of::<Hello>());
        assert_eq!(method.qualifier, "loud");
        assert_eq!(method.bindings[0].info, TypeInfo::of::<dyn Greeter>());
    }

    #[test]
    fn configuration_is_created_from_its_manifest() {
        let descriptor = ConfigurationDescriptor::of::<Settings>();
        let created = descriptor.create().unwrap();
        assert_eq!(created.downcast::<Settings>().unwrap().prefix, "> ");
    }
}
