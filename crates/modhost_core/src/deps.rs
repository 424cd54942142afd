//! Dependency resolution over the module catalog.
//!
//! # Responsibility
//! - Compute dependency-first load order for the whole catalog.
//! - Find enabled dependents that block a disable.
//!
//! # Invariants
//! - Load order places every dependency before its dependents; ties keep
//!   registry insertion order.
//! - Dependency checks never mutate the settings store.

use crate::model::descriptor::{ModuleDescriptor, ModuleId};
use crate::repo::RepoResult;
use std::collections::{BTreeMap, BTreeSet};

/// Returns catalog indices in dependency-first order.
///
/// Returns the ids left unresolved when the graph contains a cycle.
/// Dependencies on ids outside `descriptors` are ignored here; the registry
/// rejects them before ordering.
pub fn topological_order(descriptors: &[ModuleDescriptor]) -> Result<Vec<usize>, Vec<ModuleId>> {
    let index_of: BTreeMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| (descriptor.id.as_str(), index))
        .collect();

    let mut pending = vec![0usize; descriptors.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    for (index, descriptor) in descriptors.iter().enumerate() {
        let deps: BTreeSet<usize> = descriptor
            .dependencies
            .iter()
            .filter_map(|dep| index_of.get(dep.as_str()).copied())
            .collect();
        pending[index] = deps.len();
        for dep in deps {
            dependents[dep].push(index);
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| index)
        .collect();
    let mut order = Vec::with_capacity(descriptors.len());

    while let Some(index) = ready.pop_first() {
        order.push(index);
        for &dependent in &dependents[index] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == descriptors.len() {
        return Ok(order);
    }

    Err(pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(index, _)| descriptors[index].id.clone())
        .collect())
}

/// Returns ids of enabled modules whose dependency list contains `module_id`.
///
/// `is_enabled` is consulted once per candidate dependent.
pub fn enabled_dependents<'a, E>(
    descriptors: impl IntoIterator<Item = &'a ModuleDescriptor>,
    module_id: &str,
    mut is_enabled: E,
) -> RepoResult<Vec<ModuleId>>
where
    E: FnMut(&str) -> RepoResult<bool>,
{
    let mut blocking = Vec::new();
    for descriptor in descriptors {
        if descriptor.id == module_id || !descriptor.depends_on_module(module_id) {
            continue;
        }
        if is_enabled(descriptor.id.as_str())? {
            blocking.push(descriptor.id.clone());
        }
    }
    Ok(blocking)
}

#[cfg(test)]
mod tests {
    use super::{enabled_dependents, topological_order};
    use crate::model::descriptor::ModuleDescriptor;

    fn ids(descriptors: &[ModuleDescriptor], order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|index| descriptors[*index].id.clone())
            .collect()
    }

    #[test]
    fn dependencies_load_before_dependents() {
        let descriptors = vec![
            ModuleDescriptor::new("widget", "Widget").depends_on(["hours"]),
            ModuleDescriptor::new("markers", "Markers"),
            ModuleDescriptor::new("hours", "Hours"),
        ];

        let order = topological_order(&descriptors).expect("acyclic graph");
        assert_eq!(ids(&descriptors, &order), vec!["markers", "hours", "widget"]);
    }

    #[test]
    fn independent_modules_keep_insertion_order() {
        let descriptors = vec![
            ModuleDescriptor::new("c", "C"),
            ModuleDescriptor::new("a", "A"),
            ModuleDescriptor::new("b", "B"),
        ];

        let order = topological_order(&descriptors).expect("acyclic graph");
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn reports_modules_on_a_cycle() {
        let descriptors = vec![
            ModuleDescriptor::new("a", "A").depends_on(["b"]),
            ModuleDescriptor::new("b", "B").depends_on(["a"]),
            ModuleDescriptor::new("c", "C"),
        ];

        let unresolved = topological_order(&descriptors).expect_err("cycle must be reported");
        assert_eq!(unresolved, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn only_enabled_dependents_block() {
        let descriptors = vec![
            ModuleDescriptor::new("b", "B"),
            ModuleDescriptor::new("a", "A").depends_on(["b"]),
            ModuleDescriptor::new("c", "C").depends_on(["b"]),
        ];

        let blocking = enabled_dependents(&descriptors, "b", |id| Ok(id == "a"))
            .expect("lookup should not fail");
        assert_eq!(blocking, vec!["a".to_string()]);
    }
}
