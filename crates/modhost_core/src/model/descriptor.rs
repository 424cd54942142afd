//! Module descriptor model.
//!
//! # Responsibility
//! - Describe one optional feature unit: identity, presentation metadata,
//!   dependencies and the implementation units that make it up.
//!
//! # Invariants
//! - `id` is stable and never remapped at runtime.
//! - `category` is presentation-only and carries no behavior.

use serde::{Deserialize, Serialize};

/// Stable identifier for one module, e.g. `hours` or `role_sync`.
pub type ModuleId = String;

/// Default presentation group for modules that do not name one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Code-defined catalog entry for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Stable key used by the settings store and error surface.
    pub id: ModuleId,
    /// Human-readable display name.
    pub name: String,
    pub description: String,
    /// Presentation-only grouping.
    pub category: String,
    /// Ids of modules that must be enabled for this module to work.
    pub dependencies: Vec<ModuleId>,
    /// Locators resolved through the unit catalog, loaded in order.
    pub units: Vec<String>,
    pub has_admin_page: bool,
    /// External host plugin that must be active before enabling.
    pub required_plugin: Option<String>,
    /// Warning shown to operators before enabling.
    pub security_warning: Option<String>,
}

impl ModuleDescriptor {
    /// Creates a descriptor with no dependencies and no implementation units.
    pub fn new(id: impl Into<ModuleId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            dependencies: Vec::new(),
            units: Vec::new(),
            has_admin_page: false,
            required_plugin: None,
            security_warning: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ModuleId>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.units.extend(units.into_iter().map(Into::into));
        self
    }

    pub fn with_admin_page(mut self) -> Self {
        self.has_admin_page = true;
        self
    }

    pub fn requires_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.required_plugin = Some(plugin.into());
        self
    }

    pub fn with_security_warning(mut self, warning: impl Into<String>) -> Self {
        self.security_warning = Some(warning.into());
        self
    }

    /// Returns whether `other` appears in this module's dependency list.
    pub fn depends_on_module(&self, other: &str) -> bool {
        self.dependencies.iter().any(|dep| dep == other)
    }
}

#[cfg(test)]
mod tests {
    use super::{ModuleDescriptor, DEFAULT_CATEGORY};

    #[test]
    fn new_descriptor_has_no_dependencies_or_units() {
        let descriptor = ModuleDescriptor::new("hours", "Hours");
        assert_eq!(descriptor.category, DEFAULT_CATEGORY);
        assert!(descriptor.dependencies.is_empty());
        assert!(descriptor.units.is_empty());
        assert!(!descriptor.has_admin_page);
    }

    #[test]
    fn builder_collects_dependencies_and_units() {
        let descriptor = ModuleDescriptor::new("role_sync", "Role sync")
            .depends_on(["hours", "markers"])
            .with_units(["role_sync.core"])
            .requires_plugin("membership");

        assert!(descriptor.depends_on_module("hours"));
        assert!(descriptor.depends_on_module("markers"));
        assert!(!descriptor.depends_on_module("role_sync"));
        assert_eq!(descriptor.units, vec!["role_sync.core".to_string()]);
        assert_eq!(descriptor.required_plugin.as_deref(), Some("membership"));
    }
}
