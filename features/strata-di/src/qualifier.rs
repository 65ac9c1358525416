use std::{borrow::Borrow, fmt, ops::Deref, sync::Arc};

/// Tag used when nothing else was declared
pub const DEFAULT_QUALIFIER: &str = "default";

/// String discriminator between several registrations of the same type
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier(Arc<str>);

impl Qualifier {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Qualifier(Arc::from(tag.as_ref()))
    }

    /// Returns the declared tag, or the default one if nothing (or an empty tag) was declared
    pub fn resolve(declared: Option<&str>) -> Self {
        match declared {
            Some(tag) if !tag.trim().is_empty() => Qualifier::new(tag.trim()),
            _ => Qualifier::default(),
        }
    }

    pub fn is_default(&self) -> bool {
        &*self.0 == DEFAULT_QUALIFIER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Default for Qualifier {
    fn default() -> Self {
        Qualifier::new(DEFAULT_QUALIFIER)
    }
}
impl Deref for Qualifier {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Borrow<str> for Qualifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}
impl From<&str> for Qualifier {
    fn from(value: &str) -> Self {
        Qualifier::resolve(Some(value))
    }
}
impl From<String> for Qualifier {
    fn from(value: String) -> Self {
        Qualifier::resolve(Some(&value))
    }
}
impl PartialEq<str> for Qualifier {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}
impl PartialEq<&str> for Qualifier {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}
impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl fmt::Debug for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Anything that carries a qualifier - component descriptors, injection sites and provider methods
pub trait Qualified {
    fn qualifier(&self) -> &Qualifier;

    fn matches(&self, qualifier: &Qualifier) -> bool {
        self.qualifier() == qualifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_tags_resolve_to_default() {
        assert_eq!(Qualifier::resolve(None), DEFAULT_QUALIFIER);
        assert_eq!(Qualifier::resolve(Some("  ")), DEFAULT_QUALIFIER);
        assert!(Qualifier::from("").is_default());
    }

    #[test]
    fn declared_tags_are_kept() {
        let alt = Qualifier::from(" alt ");
        assert_eq!(alt, "alt");
        assert!(!alt.is_default());
        assert_eq!(alt.to_string(), "alt");
    }
}
