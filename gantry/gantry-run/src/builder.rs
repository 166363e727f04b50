//! Recursive assembly of object graphs from declarative specifications.
//!
//! A specification node is a JSON mapping with a `func` key naming the
//! capability to construct and an optional `name` key. Every other entry is
//! a constructor argument: nested nodes (and arrays of nodes) are built
//! depth-first into live components, everything else passes through as a
//! plain value. Construction order is children before parents, and the
//! builder itself draws no randomness; anything stochastic belongs to the
//! constructed components.

use std::collections::BTreeMap;
use std::fmt;

use gantry_net::{Criterion, Network};
use gantry_store::DocumentStore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::data::DataProvider;
use crate::error::{Result, RunError};
use crate::model::Model;
use crate::optimizer::{Algorithm, OptimizerAdapter};
use crate::registry::{CapabilityRegistry, Selector};
use crate::runner::Runner;

/// A constructed piece of the object graph.
pub enum Component {
    /// A computation network.
    Network(Box<dyn Network>),
    /// A loss criterion.
    Criterion(Box<dyn Criterion>),
    /// A bare parameter-update algorithm, not yet bound.
    Algorithm(Box<dyn Algorithm>),
    /// An optimizer adapter wrapping an algorithm.
    Optimizer(OptimizerAdapter),
    /// A batch provider.
    Provider(Box<dyn DataProvider>),
    /// A checkpoint document store.
    Store(Box<dyn DocumentStore>),
    /// An assembled trainable unit.
    Model(Model),
    /// A fully assembled run controller.
    Runner(Runner),
}

impl Component {
    /// Returns a short noun for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Criterion(_) => "criterion",
            Self::Algorithm(_) => "algorithm",
            Self::Optimizer(_) => "optimizer",
            Self::Provider(_) => "provider",
            Self::Store(_) => "store",
            Self::Model(_) => "model",
            Self::Runner(_) => "runner",
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component::{}", self.kind())
    }
}

/// Arguments handed to a factory for one specification node.
///
/// Factories consume arguments with the `take`/`require` accessors and end
/// with [`Args::finish`], which rejects anything left over so that a typo
/// in a specification key surfaces as an error at the offending dotted
/// path instead of being silently ignored.
pub struct Args {
    path: String,
    name: Option<String>,
    values: BTreeMap<String, Value>,
    components: BTreeMap<String, Component>,
    lists: BTreeMap<String, Vec<Component>>,
}

impl Args {
    /// Creates an empty argument bundle for a node at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
            values: BTreeMap::new(),
            components: BTreeMap::new(),
            lists: BTreeMap::new(),
        }
    }

    /// Returns the dotted path of the node being constructed.
    #[must_use]
    pub fn path(&self) -> &str {
        if self.path.is_empty() {
            "<root>"
        } else {
            &self.path
        }
    }

    /// Returns the node's `name` entry, if it had one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Sets the node name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Adds a plain value argument.
    pub fn insert_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Adds a constructed component argument.
    pub fn insert_component(&mut self, key: impl Into<String>, component: Component) {
        self.components.insert(key.into(), component);
    }

    /// Adds a sequence of constructed components.
    pub fn insert_components(&mut self, key: impl Into<String>, components: Vec<Component>) {
        self.lists.insert(key.into(), components);
    }

    fn child(&self, key: &str) -> String {
        child_path(&self.path, key)
    }

    /// Takes and deserializes an optional plain value.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` at the argument's dotted
    /// path when the value does not deserialize to `T`.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.values.remove(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| RunError::invalid_config(self.child(key), e.to_string())),
        }
    }

    /// Takes and deserializes a required plain value.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when the argument is absent
    /// or does not deserialize to `T`.
    pub fn require<T: DeserializeOwned>(&mut self, key: &str) -> Result<T> {
        self.take(key)?.ok_or_else(|| {
            RunError::invalid_config(self.child(key), "missing required argument")
        })
    }

    /// Takes a constructed component argument.
    pub fn take_component(&mut self, key: &str) -> Option<Component> {
        self.components.remove(key)
    }

    /// Takes a sequence of constructed components.
    pub fn take_components(&mut self, key: &str) -> Option<Vec<Component>> {
        self.lists.remove(key)
    }

    fn component_err(&self, key: &str, expected: &str, got: Option<&Component>) -> RunError {
        match got {
            Some(component) => RunError::invalid_config(
                self.child(key),
                format!("expected a {expected}, got a {}", component.kind()),
            ),
            None => RunError::invalid_config(
                self.child(key),
                format!("missing required {expected} argument"),
            ),
        }
    }

    /// Takes a required network component.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when absent or of another
    /// kind.
    pub fn require_network(&mut self, key: &str) -> Result<Box<dyn Network>> {
        match self.take_component(key) {
            Some(Component::Network(net)) => Ok(net),
            other => Err(self.component_err(key, "network", other.as_ref())),
        }
    }

    /// Takes a required criterion component.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when absent or of another
    /// kind.
    pub fn require_criterion(&mut self, key: &str) -> Result<Box<dyn Criterion>> {
        match self.take_component(key) {
            Some(Component::Criterion(criterion)) => Ok(criterion),
            other => Err(self.component_err(key, "criterion", other.as_ref())),
        }
    }

    /// Takes a required optimizer argument.
    ///
    /// A bare update algorithm is accepted and wrapped in an unbound
    /// adapter, so a node may name `SGD` directly where an optimizer is
    /// expected.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when absent or of another
    /// kind.
    pub fn require_optimizer(&mut self, key: &str) -> Result<OptimizerAdapter> {
        match self.take_component(key) {
            Some(Component::Optimizer(adapter)) => Ok(adapter),
            Some(Component::Algorithm(algorithm)) => Ok(OptimizerAdapter::new(algorithm)),
            other => Err(self.component_err(key, "optimizer", other.as_ref())),
        }
    }

    /// Takes a required data provider component.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when absent or of another
    /// kind.
    pub fn require_provider(&mut self, key: &str) -> Result<Box<dyn DataProvider>> {
        match self.take_component(key) {
            Some(Component::Provider(provider)) => Ok(provider),
            other => Err(self.component_err(key, "provider", other.as_ref())),
        }
    }

    /// Takes a required document store component.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when absent or of another
    /// kind.
    pub fn require_store(&mut self, key: &str) -> Result<Box<dyn DocumentStore>> {
        match self.take_component(key) {
            Some(Component::Store(store)) => Ok(store),
            other => Err(self.component_err(key, "store", other.as_ref())),
        }
    }

    /// Takes a required trainable-unit component.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when absent or of another
    /// kind.
    pub fn require_model(&mut self, key: &str) -> Result<Model> {
        match self.take_component(key) {
            Some(Component::Model(model)) => Ok(model),
            other => Err(self.component_err(key, "model", other.as_ref())),
        }
    }

    /// Rejects any argument that was not consumed.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` at the dotted path of the
    /// first leftover key.
    pub fn finish(&self) -> Result<()> {
        if let Some(key) = self
            .values
            .keys()
            .chain(self.components.keys())
            .chain(self.lists.keys())
            .next()
        {
            return Err(RunError::invalid_config(
                self.child(key),
                "unknown constructor argument",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("lists", &self.lists.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn is_node(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.contains_key("func"))
}

/// Builds object graphs from specification nodes against a registry.
///
/// # Example
///
/// ```
/// use gantry_run::{CapabilityRegistry, GraphBuilder};
/// use serde_json::json;
///
/// let registry = CapabilityRegistry::with_defaults();
/// let spec = json!({"func": "Linear", "in_dim": 4, "out_dim": 2});
/// let component = GraphBuilder::new(&registry).build(&spec).unwrap();
/// assert_eq!(component.kind(), "network");
/// ```
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    registry: &'a CapabilityRegistry,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder over a registry.
    #[must_use]
    pub const fn new(registry: &'a CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Builds the component described by a specification node, depth-first.
    ///
    /// # Errors
    ///
    /// Returns `RunError::UnknownCapability` for an unregistered `func`,
    /// and `RunError::InvalidConfiguration` carrying the dotted path of the
    /// offending node for malformed structure. Failures in nested nodes
    /// surface with their own deeper path.
    pub fn build(&self, spec: &Value) -> Result<Component> {
        self.build_at("", spec)
    }

    fn build_at(&self, path: &str, node: &Value) -> Result<Component> {
        let Value::Object(map) = node else {
            return Err(RunError::invalid_config(
                display_path(path),
                "specification node must be a mapping",
            ));
        };
        let func = match map.get("func") {
            Some(Value::String(func)) => func.clone(),
            Some(_) => {
                return Err(RunError::invalid_config(
                    display_path(path),
                    "'func' must be a string",
                ))
            }
            None => {
                return Err(RunError::invalid_config(
                    display_path(path),
                    "missing 'func' key",
                ))
            }
        };

        let mut args = Args::new(path);
        match map.get("name") {
            Some(Value::String(name)) => args.set_name(name),
            Some(_) => {
                return Err(RunError::invalid_config(
                    display_path(path),
                    "'name' must be a string",
                ))
            }
            None => {}
        }

        for (key, value) in map {
            if key == "func" || key == "name" {
                continue;
            }
            let child = child_path(path, key);
            if is_node(value) {
                args.insert_component(key, self.build_at(&child, value)?);
            } else if let Value::Array(items) = value {
                if !items.is_empty() && items.iter().all(is_node) {
                    let mut built = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        built.push(self.build_at(&format!("{child}[{i}]"), item)?);
                    }
                    args.insert_components(key, built);
                } else {
                    args.insert_value(key, value.clone());
                }
            } else {
                args.insert_value(key, value.clone());
            }
        }

        debug!(path = display_path(path), func = %func, "building node");
        let factory = self.registry.resolve(&Selector::Name(func))?;
        factory(self.registry, args)
    }
}
