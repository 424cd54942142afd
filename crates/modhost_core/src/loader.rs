//! Module loader and implementation unit catalog.
//!
//! # Responsibility
//! - Map unit locators to typed `ModuleUnit` implementations.
//! - Load a module's units in declared order inside fault containment.
//!
//! # Invariants
//! - A missing unit aborts the load before any unit of the module runs.
//! - On any failure, everything the module registered in the host runtime is
//!   retracted before `load_module` returns.

use crate::fault::contain;
use crate::model::descriptor::ModuleDescriptor;
use crate::model::state::FaultKind;
use crate::runtime::{self_test_hook_name, HostRuntime, SelfTestHook};
use crate::selftest::DeepContext;
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Error a unit returns to refuse loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitError {
    message: String,
}

impl UnitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for UnitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for UnitError {}

/// Registration surface handed to a unit while it loads.
pub struct UnitContext<'a> {
    module_id: &'a str,
    runtime: &'a mut HostRuntime,
}

impl<'a> UnitContext<'a> {
    pub(crate) fn new(module_id: &'a str, runtime: &'a mut HostRuntime) -> Self {
        Self { module_id, runtime }
    }

    /// Makes `symbol` discoverable by self-tests and other modules.
    pub fn provide(&mut self, symbol: &str) -> Result<(), UnitError> {
        self.runtime
            .insert_symbol(self.module_id, symbol)
            .map_err(|owner| {
                UnitError::new(format!("symbol `{symbol}` is already provided by `{owner}`"))
            })
    }

    /// Returns whether another loaded module already provides `symbol`.
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.runtime.has_symbol(symbol)
    }

    /// Registers this module's deep self-test hook.
    pub fn register_self_test<F>(&mut self, hook: F)
    where
        F: Fn(&DeepContext<'_>) -> Result<(), String> + 'static,
    {
        let boxed: SelfTestHook = Box::new(hook);
        self.runtime
            .insert_hook(self.module_id, self_test_hook_name(self.module_id), boxed);
    }
}

/// One loadable implementation unit.
pub trait ModuleUnit {
    fn load(&self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError>;
}

impl<F> ModuleUnit for F
where
    F: Fn(&mut UnitContext<'_>) -> Result<(), UnitError>,
{
    fn load(&self, ctx: &mut UnitContext<'_>) -> Result<(), UnitError> {
        self(ctx)
    }
}

/// Typed catalog of implementation units keyed by locator.
#[derive(Default)]
pub struct UnitCatalog {
    units: BTreeMap<String, Box<dyn ModuleUnit>>,
}

impl UnitCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the unit behind `locator`.
    pub fn register(&mut self, locator: impl Into<String>, unit: impl ModuleUnit + 'static) {
        self.units.insert(locator.into(), Box::new(unit));
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.units.contains_key(locator)
    }

    pub fn resolve(&self, locator: &str) -> Option<&dyn ModuleUnit> {
        self.units.get(locator).map(|unit| unit.as_ref())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Why a module failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// `MissingResource` or `LoadFault`.
    pub kind: FaultKind,
    /// Locator of the unit that failed.
    pub unit: String,
    pub message: String,
}

impl Display for LoadFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FaultKind::MissingResource => {
                write!(f, "implementation unit not found: {}", self.unit)
            }
            _ => write!(f, "unit `{}` failed to load: {}", self.unit, self.message),
        }
    }
}

impl Error for LoadFailure {}

/// Retracts a module's runtime registrations on drop unless disarmed.
struct RetractGuard<'a> {
    module_id: &'a str,
    runtime: &'a mut HostRuntime,
    armed: bool,
}

impl<'a> RetractGuard<'a> {
    fn new(module_id: &'a str, runtime: &'a mut HostRuntime) -> Self {
        Self {
            module_id,
            runtime,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RetractGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let removed = self.runtime.retract(self.module_id);
            if removed > 0 {
                info!(
                    "event=module_rollback module=loader status=ok module_id={} removed={}",
                    self.module_id, removed
                );
            }
        }
    }
}

/// Loads every implementation unit of `descriptor` in declared order.
///
/// Returns the number of units loaded. A module with no units loads
/// vacuously.
pub fn load_module(
    descriptor: &ModuleDescriptor,
    catalog: &UnitCatalog,
    runtime: &mut HostRuntime,
) -> Result<usize, LoadFailure> {
    let started_at = Instant::now();
    let module_id = descriptor.id.as_str();

    let mut resolved = Vec::with_capacity(descriptor.units.len());
    for locator in &descriptor.units {
        let Some(unit) = catalog.resolve(locator) else {
            warn!(
                "event=module_load module=loader status=error module_id={} error_code=missing_resource unit={}",
                module_id, locator
            );
            return Err(LoadFailure {
                kind: FaultKind::MissingResource,
                unit: locator.clone(),
                message: format!("implementation unit not found: {locator}"),
            });
        };
        resolved.push((locator, unit));
    }

    let guard = RetractGuard::new(module_id, runtime);
    for (locator, unit) in resolved {
        let mut ctx = UnitContext::new(module_id, &mut *guard.runtime);
        if let Err(fault) = contain(|| unit.load(&mut ctx)) {
            warn!(
                "event=module_load module=loader status=error module_id={} error_code=load_fault unit={} panicked={} duration_ms={}",
                module_id,
                locator,
                fault.panicked,
                started_at.elapsed().as_millis()
            );
            return Err(LoadFailure {
                kind: FaultKind::LoadFault,
                unit: locator.clone(),
                message: fault.to_string(),
            });
        }
    }
    guard.disarm();

    info!(
        "event=module_load module=loader status=ok module_id={} units={} duration_ms={}",
        module_id,
        descriptor.units.len(),
        started_at.elapsed().as_millis()
    );
    Ok(descriptor.units.len())
}

#[cfg(test)]
mod tests {
    use super::{load_module, UnitCatalog, UnitContext, UnitError};
    use crate::model::descriptor::ModuleDescriptor;
    use crate::model::state::FaultKind;
    use crate::runtime::HostRuntime;

    fn provide(symbol: &'static str) -> impl Fn(&mut UnitContext<'_>) -> Result<(), UnitError> {
        move |ctx| ctx.provide(symbol)
    }

    #[test]
    fn loads_units_in_order() {
        let mut catalog = UnitCatalog::new();
        catalog.register("hours.core", provide("hours.core"));
        catalog.register("hours.widget", |ctx: &mut UnitContext<'_>| {
            if ctx.has_symbol("hours.core") {
                ctx.provide("hours.widget")
            } else {
                Err(UnitError::new("core unit must load first"))
            }
        });
        let descriptor =
            ModuleDescriptor::new("hours", "Hours").with_units(["hours.core", "hours.widget"]);
        let mut runtime = HostRuntime::new();

        let loaded = load_module(&descriptor, &catalog, &mut runtime).expect("load succeeds");
        assert_eq!(loaded, 2);
        assert_eq!(runtime.symbols_of("hours"), vec!["hours.core", "hours.widget"]);
    }

    #[test]
    fn missing_unit_aborts_before_running_any_unit() {
        let mut catalog = UnitCatalog::new();
        catalog.register("hours.core", provide("hours.core"));
        let descriptor =
            ModuleDescriptor::new("hours", "Hours").with_units(["hours.core", "hours.gone"]);
        let mut runtime = HostRuntime::new();

        let failure = load_module(&descriptor, &catalog, &mut runtime).expect_err("must fail");
        assert_eq!(failure.kind, FaultKind::MissingResource);
        assert_eq!(failure.unit, "hours.gone");
        assert!(!runtime.has_symbol("hours.core"));
    }

    #[test]
    fn panicking_unit_rolls_back_earlier_units() {
        let mut catalog = UnitCatalog::new();
        catalog.register("hours.core", provide("hours.core"));
        catalog.register("hours.bad", |_ctx: &mut UnitContext<'_>| -> Result<(), UnitError> {
            panic!("bad unit")
        });
        let descriptor =
            ModuleDescriptor::new("hours", "Hours").with_units(["hours.core", "hours.bad"]);
        let mut runtime = HostRuntime::new();

        let failure = load_module(&descriptor, &catalog, &mut runtime).expect_err("must fail");
        assert_eq!(failure.kind, FaultKind::LoadFault);
        assert!(failure.message.contains("bad unit"));
        assert!(!runtime.has_symbol("hours.core"));
    }

    #[test]
    fn module_without_units_loads_vacuously() {
        let catalog = UnitCatalog::new();
        let descriptor = ModuleDescriptor::new("notes", "Notes");
        let mut runtime = HostRuntime::new();

        assert_eq!(load_module(&descriptor, &catalog, &mut runtime), Ok(0));
    }
}
