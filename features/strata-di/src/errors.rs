use std::sync::Arc;

use thiserror::Error;

use crate::{
    dependency_graph::DependencyGraphErrors,
    qualifier::Qualifier,
    types::{DynError, TypeInfo},
};

/// Errors while resolving or building an instance
#[derive(Error, Debug)]
pub enum InjectError {
    /// Could not require the type
    #[error(transparent)]
    RequireError(#[from] RequireError),
    /// Resolution would have registered something invalid
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// No constructor of the type could have all its parameters resolved
    #[error("Could not construct '{product}', unresolved parameters: {params:?}")]
    UnresolvedParameters {
        product: &'static str,
        params: Vec<&'static str>,
        #[source]
        cause: Box<InjectError>,
    },
    /// The manifest declares no constructor
    #[error("'{0}' declares no constructor")]
    NoConstructor(&'static str),
    /// The user constructor returned an error
    #[error("Constructor of '{product}' failed - error: {error}")]
    ConstructorFailed {
        product: &'static str,
        error: DynError,
    },
    /// A provider method or provider function returned an error
    #[error("Provider of '{product}' failed - error: {error}")]
    ProviderFailed { product: String, error: DynError },
    /// A field value could not be applied
    #[error("Field '{field}' of '{product}' could not be injected: {cause}")]
    FieldFailed {
        product: &'static str,
        field: &'static str,
        #[source]
        cause: Box<InjectError>,
    },
    /// A post construction hook failed
    #[error("Post construction hook '{hook}' of '{product}' failed - error: {error}")]
    HookFailed {
        product: &'static str,
        hook: &'static str,
        error: DynError,
    },
    /// The proxy factory refused to wrap an instance
    #[error("Interception of '{product}' as '{declared}' failed - error: {error}")]
    InterceptionFailed {
        product: &'static str,
        declared: &'static str,
        error: DynError,
    },
    /// The container owning a lazy dependency was dropped
    #[error("The container was dropped, did you keep a Lazy beyond its container?")]
    ContainerDropped,
    /// Generic error during Injection
    #[error("Error during injection: {0}")]
    Other(DynError),
}

/// Errors when trying to require a certain type
#[derive(Error, Debug, Clone)]
pub enum RequireError {
    /// The required type is not registered
    #[error("The required type '{type_name}' ({qualifier}) is not registered.")]
    TypeMissing {
        type_name: &'static str,
        qualifier: Qualifier,
    },
    /// More than one registration matches an abstract type
    #[error("The required type '{type_name}' ({qualifier}) is ambiguous, candidates: {candidates:?}")]
    Ambiguous {
        type_name: &'static str,
        qualifier: Qualifier,
        candidates: Vec<&'static str>,
    },
    /// The container is not loaded
    #[error("The container is not loaded.")]
    NotLoaded,
    /// Container failed to load
    #[error(transparent)]
    InitError(#[from] InitError),

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },
}

/// Invalid registrations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// Only concrete types can own a registration
    #[error("'{0}' is abstract and can not be registered directly")]
    AbstractType(TypeInfo),
    /// At most one registration per type and qualifier
    #[error("'{owner}' is already registered with qualifier '{qualifier}'")]
    Duplicate { owner: TypeInfo, qualifier: Qualifier },
    /// A type reappeared while resolving its own dependency chain
    #[error("Circular registration: {}", join_chain(.chain))]
    CircularRegistration { chain: Vec<TypeInfo> },
    /// The container is not loaded
    #[error("The container is not loaded.")]
    NotLoaded,
}

/// Errors while loading the container
#[derive(Error, Debug, Clone)]
pub enum InitError {
    /// There are issues with the dependency graph
    #[error(transparent)]
    DependencyGraphError(#[from] DependencyGraphErrors),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// A component failed to build
    #[error("Component '{product}' failed - error: {error}")]
    ComponentFailed {
        product: &'static str,
        error: Arc<InjectError>,
    },
    /// A provider method failed to build
    #[error("Bean '{bean}' failed - error: {error}")]
    BeanFailed {
        bean: String,
        error: Arc<InjectError>,
    },
    /// A configuration type could not be created
    #[error("Configuration '{configuration}' failed - error: {error:?}")]
    ConfigurationFailed {
        configuration: &'static str,
        error: Arc<DynError>,
    },
    /// A worker panicked while building
    #[error("Task for '{product}' panicked")]
    TaskPanicked { product: String },
    /// The fixed worker pool could not be started
    #[error("Worker pool could not be started - error: {0}")]
    PoolUnavailable(Arc<std::io::Error>),
    /// The container was unloaded or dropped before it finished loading
    #[error("The container was unloaded")]
    Unloaded,
    /// Loading was aborted
    #[error("Load aborted")]
    Aborted,
    /// Initiation timed out
    #[error("Initiation timed out")]
    Timeout,
}

pub(crate) fn join_chain(chain: &[TypeInfo]) -> String {
    chain
        .iter()
        .map(|info| info.type_name)
        .collect::<Vec<_>>()
        .join(" -> ")
}
