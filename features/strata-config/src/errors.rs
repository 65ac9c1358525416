use strata_di::TypeInfo;

/// Errors of the config registry
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The required Config is not known
    #[error("The required Config type '{0}' is not known")]
    Missing(TypeInfo),
    /// The Config type is already registered
    #[error("The Config type '{0}' is already registered")]
    AlreadyRegistered(TypeInfo),
    /// A stored value could not be cast back to its type
    #[error("The Config stored for '{0}' has an unexpected type")]
    Mismatch(TypeInfo),
}
