//! Per-process host runtime shared by loaded modules.
//!
//! # Responsibility
//! - Track symbols and deep self-test hooks registered by module units.
//! - Track which external host plugins are active.
//!
//! # Invariants
//! - A symbol has exactly one owning module; re-registration by another
//!   module is rejected.
//! - `retract` removes everything one module registered, so a failed or
//!   disabled module leaves no residue.

use crate::model::descriptor::ModuleId;
use crate::selftest::DeepContext;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};

/// Deep self-test hook invoked by name during deferred testing.
pub type SelfTestHook = Box<dyn Fn(&DeepContext<'_>) -> Result<(), String>>;

/// Returns the hook name a module's deep self-test is registered under.
pub fn self_test_hook_name(module_id: &str) -> String {
    format!("{module_id}.self_test")
}

struct RegisteredHook {
    owner: ModuleId,
    hook: SelfTestHook,
}

/// Symbols, hooks and host plugins visible to modules in this process.
#[derive(Default)]
pub struct HostRuntime {
    symbols: BTreeMap<String, ModuleId>,
    hooks: BTreeMap<String, RegisteredHook>,
    active_plugins: BTreeSet<String>,
}

impl Debug for HostRuntime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRuntime")
            .field("symbols", &self.symbols)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("active_plugins", &self.active_plugins)
            .finish()
    }
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runtime that reports the given host plugins as active.
    pub fn with_active_plugins<I, S>(plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active_plugins: plugins.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn is_plugin_active(&self, plugin: &str) -> bool {
        self.active_plugins.contains(plugin)
    }

    pub fn activate_plugin(&mut self, plugin: impl Into<String>) {
        self.active_plugins.insert(plugin.into());
    }

    pub fn deactivate_plugin(&mut self, plugin: &str) {
        self.active_plugins.remove(plugin);
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// Returns the module that registered `symbol`.
    pub fn symbol_owner(&self, symbol: &str) -> Option<&str> {
        self.symbols.get(symbol).map(String::as_str)
    }

    /// Returns symbols registered by one module, sorted.
    pub fn symbols_of(&self, module_id: &str) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|(_, owner)| owner.as_str() == module_id)
            .map(|(symbol, _)| symbol.as_str())
            .collect()
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub(crate) fn hook(&self, name: &str) -> Option<&SelfTestHook> {
        self.hooks.get(name).map(|entry| &entry.hook)
    }

    /// Registers `symbol` for `owner`. Returns the current owner on conflict.
    pub(crate) fn insert_symbol(&mut self, owner: &str, symbol: &str) -> Result<(), String> {
        if let Some(existing) = self.symbols.get(symbol) {
            return Err(existing.clone());
        }
        self.symbols.insert(symbol.to_string(), owner.to_string());
        Ok(())
    }

    pub(crate) fn insert_hook(&mut self, owner: &str, name: String, hook: SelfTestHook) {
        self.hooks.insert(
            name,
            RegisteredHook {
                owner: owner.to_string(),
                hook,
            },
        );
    }

    /// Removes every symbol and hook registered by `module_id`.
    ///
    /// Returns how many entries were removed.
    pub fn retract(&mut self, module_id: &str) -> usize {
        let before = self.symbols.len() + self.hooks.len();
        self.symbols.retain(|_, owner| owner.as_str() != module_id);
        self.hooks.retain(|_, entry| entry.owner.as_str() != module_id);
        before - (self.symbols.len() + self.hooks.len())
    }
}
