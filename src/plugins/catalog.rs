//! Named plugin factories.

use std::collections::BTreeMap;
use std::fmt;

use super::Plugin;

/// Builds a fresh plugin instance. Errors become load failures.
pub type Factory = Box<dyn Fn() -> anyhow::Result<Box<dyn Plugin>>>;

/// Everything the registry can load, by name.
#[derive(Default)]
pub struct Catalog {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Plugin>> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// `None` when no factory is registered under `name`.
    pub(crate) fn instantiate(&self, name: &str) -> Option<anyhow::Result<Box<dyn Plugin>>> {
        self.factories.get(name).map(|factory| factory())
    }
}
