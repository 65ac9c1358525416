use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use crate::qualifier::Qualifier;

/// All user supplied errors are boxed into this
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// We assume that instances are shared across worker threads
/// So anything injectable needs to be Send + Sync + 'static
///
/// Trait objects (`dyn Trait + Send + Sync`) are injectable too, they act as the abstract types of the container.
pub trait Injectable: Send + Sync + 'static {}
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Type Name and Type Id
///
/// `is_abstract` is set for unsized types, which in practice are trait objects.
/// Abstract types can never own a registration, they are only reachable through [Binding]s.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
    pub is_abstract: bool,
}
impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            // References to unsized types are fat
            is_abstract: std::mem::size_of::<&T>() != std::mem::size_of::<&()>(),
        }
    }

    /// Short name without module path, used in ids and logs
    pub fn short_name(&self) -> &'static str {
        let base = self.type_name.split('<').next().unwrap_or(self.type_name);
        match base.rfind("::") {
            Some(idx) => &self.type_name[idx + 2..],
            None => self.type_name,
        }
    }
}

/// Type erased `Arc<T>`
///
/// `T` may be unsized, so the `Arc` itself is stored inside the `Any`.
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    value: Arc<dyn Any + Send + Sync + 'static>,
}
impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: ?Sized + Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            value: Arc::new(instance),
        }
    }

    pub fn downcast<T: ?Sized + Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match self.value.downcast_ref::<Arc<T>>() {
            Some(downcasted) => Ok(downcasted.clone()),
            None => Err(self.info.type_name),
        }
    }

    /// Whether both instances point to the same allocation
    pub fn same_as(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

type Projection = dyn Fn(&Instance) -> Option<Instance> + Send + Sync;

/// Declares that a concrete type can be viewed as an abstract type
///
/// This is how the container learns about supertypes and implemented interfaces.
/// `Binding::new(|this: Arc<Impl>| this as Arc<dyn Trait>)`
#[derive(Clone)]
pub struct Binding {
    pub info: TypeInfo,
    project: Arc<Projection>,
}
impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Binding").field(&self.info.type_name).finish()
    }
}
impl Binding {
    pub fn new<T: Injectable, I: ?Sized + Injectable>(project: fn(Arc<T>) -> Arc<I>) -> Self {
        Binding {
            info: TypeInfo::of::<I>(),
            project: Arc::new(move |instance: &Instance| {
                instance
                    .downcast::<T>()
                    .ok()
                    .map(|concrete| Instance::from_arc(project(concrete)))
            }),
        }
    }

    /// Bindings onto the universal root type carry no information
    pub fn is_root(&self) -> bool {
        self.info.type_id == TypeId::of::<dyn Any + Send + Sync>()
            || self.info.type_id == TypeId::of::<dyn Any>()
    }

    pub fn project(&self, instance: &Instance) -> Option<Instance> {
        (self.project)(instance)
    }
}

/// A single built object - the concrete instance plus all of its abstract views
#[derive(Clone, Debug)]
pub struct InstanceSet {
    pub primary: Instance,
    pub views: Vec<Instance>,
}
impl InstanceSet {
    pub fn single(primary: Instance) -> Self {
        InstanceSet {
            primary,
            views: Vec::new(),
        }
    }

    /// Returns the instance matching the requested type
    pub fn get(&self, type_id: TypeId) -> Option<&Instance> {
        if self.primary.info.type_id == type_id {
            return Some(&self.primary);
        }
        self.views.iter().find(|view| view.info.type_id == type_id)
    }
}

/// Information about a dependency declared at an injection site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyInfo {
    /// The required Type
    pub type_info: TypeInfo,
    /// If it is optional or required
    pub optional: bool,
    /// If the Dependency is injected lazily
    pub lazy: bool,
    /// If all registrations of the type are injected
    pub composite: bool,
}
impl DependencyInfo {
    pub fn direct(type_info: TypeInfo) -> Self {
        DependencyInfo {
            type_info,
            optional: false,
            lazy: false,
            composite: false,
        }
    }
}

/// Singleton or Prototype
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Created once, every resolution returns the same instance
    #[default]
    Singleton,
    /// A fresh instance per resolution
    Prototype,
}

/// Key of a registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub type_id: TypeId,
    pub qualifier: Qualifier,
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Speaker: Send + Sync {
        fn speak(&self) -> String;
    }
    struct Dog;
    impl Speaker for Dog {
        fn speak(&self) -> String {
            "woof".into()
        }
    }

    #[test]
    fn trait_objects_are_abstract() {
        assert!(TypeInfo::of::<dyn Speaker>().is_abstract);
        assert!(!TypeInfo::of::<Dog>().is_abstract);
        assert_eq!(TypeInfo::of::<Dog>().short_name(), "Dog");
    }

    #[test]
    fn binding_projects_concrete_instance() {
        let binding = Binding::new(|dog: Arc<Dog>| dog as Arc<dyn Speaker>);
        let instance = Instance::new(Dog);

        let view = binding.project(&instance).expect("dog is a speaker");
        let speaker = view.downcast::<dyn Speaker>().unwrap();
        assert_eq!(speaker.speak(), "woof");
        assert!(binding.project(&Instance::new(5_u32)).is_none());
    }

    #[test]
    fn instance_downcast_reports_actual_type() {
        let instance = Instance::new(String::from("value"));
        assert!(instance.downcast::<String>().is_ok());
        assert_eq!(
            instance.downcast::<u32>().unwrap_err(),
            std::any::type_name::<String>()
        );
    }
}
