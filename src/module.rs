// ============================================================================
// prism-props - Module Registration
// The plug-in entry point: modules publish their properties into a registry
// ============================================================================

use std::any::Any;
use std::collections::HashMap;

use crate::core::error::RegistryError;
use crate::primitives::property::Property;

/// A consumer module: a named bundle of properties published into a host
/// registry at initialization time.
pub trait Module: Send + Sync {
    /// Unique module name, used for logging and diagnostics.
    fn name(&self) -> &str;

    /// Publish this module's properties into the registry.
    fn register(&self, registry: &mut ModuleRegistry) -> Result<(), RegistryError>;
}

/// A flat name-to-property map. Entries are type-erased handle clones;
/// [`get`](Self::get) recovers the typed handle, which shares state with the
/// publisher's.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a property under a name. Names are registry-global; a
    /// duplicate is rejected rather than shadowed.
    pub fn publish<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        property: &Property<T>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateProperty(name));
        }
        self.entries.insert(name, Box::new(property.clone()));
        Ok(())
    }

    /// Look up a published property by name and value type. Returns None
    /// when the name is unknown or the type does not match.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Property<T>> {
        self.entries
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Property<T>>())
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of every published property, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Run a module's registration hook against a registry.
pub fn register_module(
    registry: &mut ModuleRegistry,
    module: &dyn Module,
) -> Result<(), RegistryError> {
    module.register(registry)?;
    tracing::info!(module = module.name(), "module registered");
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
