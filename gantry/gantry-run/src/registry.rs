//! The capability registry: symbolic selectors to constructor functions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::builder::{Args, Component};
use crate::error::{Result, RunError};

/// A constructor: consumes node arguments, produces a component.
///
/// The registry is passed back in so a factory can resolve capabilities
/// its node names symbolically (an optimizer naming its algorithm by
/// string, for instance). Factories are cheap to clone and shareable
/// across threads; the registry hands out clones on every resolution.
pub type Factory = Arc<dyn Fn(&CapabilityRegistry, Args) -> Result<Component> + Send + Sync>;

/// How a specification names a capability.
///
/// A [`Selector::Name`] is looked up in the registry; a
/// [`Selector::Reference`] carries the factory directly and never consults
/// the registry at all, which is how a test injects a stub without
/// registering it.
#[derive(Clone)]
pub enum Selector {
    /// A symbolic name resolved through the registry.
    Name(String),
    /// A direct factory reference, bypassing resolution.
    Reference(Factory),
}

impl Selector {
    /// Creates a symbolic selector.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Creates a direct-reference selector.
    #[must_use]
    pub fn reference(factory: Factory) -> Self {
        Self::Reference(factory)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Reference(_) => f.write_str("Reference(<factory>)"),
        }
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Maps capability names to factories across two namespaces.
///
/// The framework namespace holds the built-in capabilities; the extension
/// namespace holds user registrations. Resolution consults the framework
/// namespace first, so an extension cannot shadow a built-in name.
///
/// # Example
///
/// ```
/// use gantry_run::{CapabilityRegistry, Selector};
///
/// let registry = CapabilityRegistry::with_defaults();
/// assert!(registry.contains("Linear"));
/// assert!(registry.resolve(&Selector::name("nope")).is_err());
/// ```
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    framework: BTreeMap<String, Factory>,
    extensions: BTreeMap<String, Factory>,
}

impl CapabilityRegistry {
    /// Creates a registry with no capabilities at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the built-in capabilities:
    /// networks, criteria, update algorithms, providers, stores, the
    /// trainable unit, and the runner.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        crate::builtins::register(&mut registry);
        registry
    }

    pub(crate) fn register_framework(&mut self, name: impl Into<String>, factory: Factory) {
        self.framework.insert(name.into(), factory);
    }

    /// Registers an extension capability, replacing any previous extension
    /// under the same name. Framework names cannot be shadowed.
    pub fn register(&mut self, name: impl Into<String>, factory: Factory) {
        self.extensions.insert(name.into(), factory);
    }

    /// Returns true if either namespace knows the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.framework.contains_key(name) || self.extensions.contains_key(name)
    }

    /// Returns every registered capability name, sorted, framework first.
    #[must_use]
    pub fn capability_names(&self) -> Vec<&str> {
        self.framework
            .keys()
            .chain(self.extensions.keys())
            .map(String::as_str)
            .collect()
    }

    /// Resolves a selector to a factory.
    ///
    /// Direct references resolve to themselves without touching either
    /// namespace. Symbolic names consult the framework namespace, then the
    /// extension namespace.
    ///
    /// # Errors
    ///
    /// Returns `RunError::UnknownCapability` naming the selector when no
    /// factory is registered under it.
    pub fn resolve(&self, selector: &Selector) -> Result<Factory> {
        match selector {
            Selector::Reference(factory) => Ok(factory.clone()),
            Selector::Name(name) => self
                .framework
                .get(name)
                .or_else(|| self.extensions.get(name))
                .cloned()
                .ok_or_else(|| RunError::unknown_capability(name.clone())),
        }
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("framework", &self.framework.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
