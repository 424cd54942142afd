//! Static module catalog.
//!
//! # Responsibility
//! - Hold the code-defined module descriptors in registration order.
//! - Validate catalog invariants once, at construction.
//!
//! # Invariants
//! - Ids are unique and match `[a-z0-9]` segments joined by single `.`, `_`
//!   or `-` separators.
//! - Every dependency names a registered module; the dependency graph is
//!   acyclic.
//! - The catalog is read-only after construction.

use crate::deps::topological_order;
use crate::model::descriptor::{ModuleDescriptor, ModuleId};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static MODULE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("valid module id regex"));

/// Returns whether `value` is a well-formed module id.
pub fn is_valid_module_id(value: &str) -> bool {
    MODULE_ID_RE.is_match(value)
}

/// Read-only catalog of module descriptors.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleDescriptor>,
    index: BTreeMap<ModuleId, usize>,
    load_order: Vec<usize>,
}

impl ModuleRegistry {
    /// Builds a validated catalog from descriptors in registration order.
    pub fn new(
        descriptors: impl IntoIterator<Item = ModuleDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut entries = Vec::new();
        let mut index = BTreeMap::new();

        for descriptor in descriptors {
            validate_descriptor(&descriptor)?;
            if index.contains_key(descriptor.id.as_str()) {
                return Err(RegistryError::DuplicateModuleId(descriptor.id));
            }
            index.insert(descriptor.id.clone(), entries.len());
            entries.push(descriptor);
        }

        for descriptor in &entries {
            for dependency in &descriptor.dependencies {
                if dependency == &descriptor.id {
                    return Err(RegistryError::SelfDependency(descriptor.id.clone()));
                }
                if !index.contains_key(dependency.as_str()) {
                    return Err(RegistryError::UnknownDependency {
                        module_id: descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let load_order = topological_order(&entries).map_err(RegistryError::DependencyCycle)?;

        Ok(Self {
            entries,
            index,
            load_order,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all descriptors in registration order.
    pub fn all(&self) -> &[ModuleDescriptor] {
        &self.entries
    }

    pub fn get(&self, module_id: &str) -> Option<&ModuleDescriptor> {
        self.index
            .get(module_id)
            .and_then(|position| self.entries.get(*position))
    }

    /// Returns one descriptor or `NotFound`.
    pub fn require(&self, module_id: &str) -> Result<&ModuleDescriptor, RegistryError> {
        self.get(module_id)
            .ok_or_else(|| RegistryError::NotFound(module_id.to_string()))
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.index.contains_key(module_id)
    }

    /// Returns descriptors in dependency-first order.
    pub fn in_load_order(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.load_order
            .iter()
            .filter_map(|position| self.entries.get(*position))
    }

    /// Groups descriptors by presentation category, keeping registration
    /// order inside each group.
    pub fn by_category(&self) -> BTreeMap<&str, Vec<&ModuleDescriptor>> {
        let mut groups: BTreeMap<&str, Vec<&ModuleDescriptor>> = BTreeMap::new();
        for descriptor in &self.entries {
            groups
                .entry(descriptor.category.as_str())
                .or_default()
                .push(descriptor);
        }
        groups
    }

    /// Returns every registered module listing `module_id` as a dependency.
    pub fn dependents_of(&self, module_id: &str) -> Vec<&ModuleDescriptor> {
        self.entries
            .iter()
            .filter(|descriptor| descriptor.depends_on_module(module_id))
            .collect()
    }
}

fn validate_descriptor(descriptor: &ModuleDescriptor) -> Result<(), RegistryError> {
    if !is_valid_module_id(descriptor.id.as_str()) {
        return Err(RegistryError::InvalidModuleId(descriptor.id.clone()));
    }
    if descriptor.name.trim().is_empty() {
        return Err(RegistryError::EmptyName(descriptor.id.clone()));
    }
    if descriptor.units.iter().any(|unit| unit.trim().is_empty()) {
        return Err(RegistryError::EmptyUnitLocator(descriptor.id.clone()));
    }
    Ok(())
}

/// Catalog construction and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidModuleId(String),
    EmptyName(ModuleId),
    EmptyUnitLocator(ModuleId),
    DuplicateModuleId(ModuleId),
    SelfDependency(ModuleId),
    UnknownDependency {
        module_id: ModuleId,
        dependency: ModuleId,
    },
    DependencyCycle(Vec<ModuleId>),
    NotFound(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidModuleId(value) => write!(f, "module id is invalid: {value}"),
            Self::EmptyName(id) => write!(f, "module name must not be empty: {id}"),
            Self::EmptyUnitLocator(id) => {
                write!(f, "module declares an empty unit locator: {id}")
            }
            Self::DuplicateModuleId(id) => write!(f, "module id already registered: {id}"),
            Self::SelfDependency(id) => write!(f, "module depends on itself: {id}"),
            Self::UnknownDependency {
                module_id,
                dependency,
            } => write!(
                f,
                "module {module_id} depends on unregistered module {dependency}"
            ),
            Self::DependencyCycle(ids) => {
                write!(f, "module dependency cycle among: {}", ids.join(", "))
            }
            Self::NotFound(id) => write!(f, "module not found: {id}"),
        }
    }
}

impl Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::{is_valid_module_id, ModuleRegistry, RegistryError};
    use crate::model::descriptor::ModuleDescriptor;

    #[test]
    fn accepts_well_formed_ids() {
        for id in ["hours", "role_sync", "dashboard.widget", "a-1"] {
            assert!(is_valid_module_id(id), "{id} should be valid");
        }
        for id in ["", "Hours", "role__sync", "trailing-", ".leading", "with space"] {
            assert!(!is_valid_module_id(id), "{id} should be invalid");
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = ModuleRegistry::new([
            ModuleDescriptor::new("hours", "Hours"),
            ModuleDescriptor::new("hours", "Hours again"),
        ])
        .expect_err("duplicate id must fail");
        assert_eq!(err, RegistryError::DuplicateModuleId("hours".to_string()));
    }

    #[test]
    fn rejects_unknown_and_self_dependencies() {
        let err = ModuleRegistry::new([ModuleDescriptor::new("a", "A").depends_on(["ghost"])])
            .expect_err("unknown dependency must fail");
        assert!(matches!(err, RegistryError::UnknownDependency { .. }));

        let err = ModuleRegistry::new([ModuleDescriptor::new("a", "A").depends_on(["a"])])
            .expect_err("self dependency must fail");
        assert_eq!(err, RegistryError::SelfDependency("a".to_string()));
    }

    #[test]
    fn rejects_dependency_cycles() {
        let err = ModuleRegistry::new([
            ModuleDescriptor::new("a", "A").depends_on(["b"]),
            ModuleDescriptor::new("b", "B").depends_on(["a"]),
        ])
        .expect_err("cycle must fail");
        assert!(matches!(err, RegistryError::DependencyCycle(_)));
    }

    #[test]
    fn lookup_and_grouping() {
        let registry = ModuleRegistry::new([
            ModuleDescriptor::new("hours", "Hours").in_category("time"),
            ModuleDescriptor::new("markers", "Markers").in_category("time"),
            ModuleDescriptor::new("roles", "Roles").in_category("people"),
        ])
        .expect("valid catalog");

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.require("roles").expect("roles").name, "Roles");
        assert_eq!(
            registry.require("ghost").expect_err("missing id"),
            RegistryError::NotFound("ghost".to_string())
        );

        let groups = registry.by_category();
        assert_eq!(groups["time"].len(), 2);
        assert_eq!(groups["time"][0].id, "hours");
        assert_eq!(groups["people"].len(), 1);
    }
}
