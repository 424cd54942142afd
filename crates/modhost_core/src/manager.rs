//! Module lifecycle manager.
//!
//! # Responsibility
//! - Own the registry, store, unit catalog, self-test table and host runtime
//!   for one request/process.
//! - Drive the per-module state machine through boot, enable, disable and
//!   deferred self-tests.
//!
//! # Invariants
//! - A module is loaded only if it is enabled, every unit loaded, and no
//!   fault occurred.
//! - Load and immediate self-test failures end with flag=false and a recorded
//!   error, written in one store transaction.
//! - `disable` mutates nothing while an enabled module depends on the target.
//! - Dependencies load before dependents.
//! - Deferred self-test failures disable for later requests only; the module
//!   stays loaded for this manager.
//! - A successful enable clears the module's recorded error, including when
//!   the module was already loaded.

use crate::deps::enabled_dependents;
use crate::loader::{load_module, UnitCatalog};
use crate::model::descriptor::{ModuleDescriptor, ModuleId};
use crate::model::state::{
    now_epoch_ms, FaultKind, ModuleErrorRecord, ModuleLifecycle, ModuleState,
};
use crate::registry::{ModuleRegistry, RegistryError};
use crate::repo::{ModuleStore, RepoError};
use crate::runtime::HostRuntime;
use crate::selftest::{DeepContext, RequestKind, SelfTestRegistry};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Synchronous failures of manager operations.
///
/// Module faults are not errors here: they are recorded and reported through
/// `LoadOutcome::Failed`.
#[derive(Debug)]
pub enum ManagerError {
    /// Id is not in the registry.
    NotFound(String),
    /// Disable refused while enabled modules depend on the target.
    DependencyBlocked {
        module_id: ModuleId,
        dependents: Vec<ModuleId>,
    },
    /// Enable refused while a dependency is disabled.
    DependencyDisabled {
        module_id: ModuleId,
        dependency: ModuleId,
    },
    /// Enable refused while the required host plugin is inactive.
    RequiredPluginInactive { module_id: ModuleId, plugin: String },
    Registry(RegistryError),
    Repo(RepoError),
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "module not found: {id}"),
            Self::DependencyBlocked {
                module_id,
                dependents,
            } => write!(
                f,
                "module {module_id} has enabled dependents: {}",
                dependents.join(", ")
            ),
            Self::DependencyDisabled {
                module_id,
                dependency,
            } => write!(
                f,
                "module {module_id} requires disabled module {dependency}"
            ),
            Self::RequiredPluginInactive { module_id, plugin } => write!(
                f,
                "module {module_id} requires inactive plugin {plugin}"
            ),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ManagerError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<RegistryError> for ManagerError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::NotFound(id) => Self::NotFound(id),
            other => Self::Registry(other),
        }
    }
}

/// Terminal state reached by one load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Auto-disabled with the recorded failure.
    Failed(ModuleErrorRecord),
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    pub fn lifecycle(&self) -> ModuleLifecycle {
        match self {
            Self::Loaded => ModuleLifecycle::Loaded,
            Self::Failed(_) => ModuleLifecycle::Disabled,
        }
    }
}

/// How boot treats enabled modules whose required host plugin is inactive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootMode {
    /// Auto-disable them with a `MissingResource` record.
    #[default]
    Enforce,
    /// Leave them and their dependents unloaded, flag and error surface
    /// untouched. For callers that only inspect state.
    Inspect,
}

/// Result of one boot pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootReport {
    /// Modules loaded, in load order.
    pub loaded: Vec<ModuleId>,
    /// Modules auto-disabled during boot.
    pub failed: Vec<ModuleErrorRecord>,
    /// Enabled ids in the settings blob that the registry does not know.
    pub unknown: Vec<ModuleId>,
    /// Modules left unloaded by `BootMode::Inspect`.
    pub skipped: Vec<ModuleId>,
}

/// Result of one deferred self-test pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeferredReport {
    /// `false` when the pass was skipped (ordinary request or already run).
    pub ran: bool,
    /// Modules that passed deferred validation.
    pub passed: Vec<ModuleId>,
    /// Modules disabled for later requests.
    pub failed: Vec<ModuleErrorRecord>,
}

/// Explicit lifecycle context for one request.
pub struct ModuleManager<S: ModuleStore> {
    registry: ModuleRegistry,
    store: S,
    units: UnitCatalog,
    self_tests: SelfTestRegistry,
    runtime: HostRuntime,
    lifecycle: BTreeMap<ModuleId, ModuleLifecycle>,
    deferred_ran: bool,
    session_id: Uuid,
}

impl<S: ModuleStore> ModuleManager<S> {
    pub fn new(
        registry: ModuleRegistry,
        store: S,
        units: UnitCatalog,
        self_tests: SelfTestRegistry,
    ) -> Self {
        Self {
            registry,
            store,
            units,
            self_tests,
            runtime: HostRuntime::new(),
            lifecycle: BTreeMap::new(),
            deferred_ran: false,
            session_id: Uuid::new_v4(),
        }
    }

    /// Replaces the host runtime, e.g. to declare active host plugins.
    pub fn with_runtime(mut self, runtime: HostRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn runtime(&self) -> &HostRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut HostRuntime {
        &mut self.runtime
    }

    /// Id correlating log lines and error records of this manager.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn lifecycle(&self, module_id: &str) -> ModuleLifecycle {
        self.lifecycle
            .get(module_id)
            .copied()
            .unwrap_or(ModuleLifecycle::Unloaded)
    }

    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.lifecycle(module_id) == ModuleLifecycle::Loaded
    }

    /// Returns loaded module ids in registry load order.
    pub fn loaded_ids(&self) -> Vec<ModuleId> {
        self.registry
            .in_load_order()
            .filter(|descriptor| self.is_loaded(&descriptor.id))
            .map(|descriptor| descriptor.id.clone())
            .collect()
    }

    pub fn is_enabled(&self, module_id: &str) -> ManagerResult<bool> {
        Ok(self.store.is_enabled(module_id)?)
    }

    /// Returns the combined persisted and in-process state of one module.
    pub fn state(&self, module_id: &str) -> ManagerResult<ModuleState> {
        self.registry.require(module_id)?;
        Ok(ModuleState {
            enabled: self.store.is_enabled(module_id)?,
            loaded: self.is_loaded(module_id),
            lifecycle: self.lifecycle(module_id),
            last_error: self.store.get_error(module_id, now_epoch_ms())?,
        })
    }

    /// Loads every enabled module in dependency-first order.
    pub fn boot(&mut self) -> ManagerResult<BootReport> {
        self.boot_with(BootMode::Enforce)
    }

    /// Same as `boot`, with an explicit policy for inactive host plugins.
    pub fn boot_with(&mut self, mode: BootMode) -> ManagerResult<BootReport> {
        let started_at = Instant::now();
        let now = now_epoch_ms();
        let purged = self.store.purge_expired(now)?;
        let enabled = self.store.enabled_ids()?;
        info!(
            "event=boot module=manager status=start session_id={} enabled={} purged_errors={}",
            self.session_id,
            enabled.len(),
            purged
        );

        let mut report = BootReport {
            unknown: enabled
                .iter()
                .filter(|id| !self.registry.contains(id))
                .cloned()
                .collect(),
            ..BootReport::default()
        };
        for id in &report.unknown {
            warn!(
                "event=boot module=manager status=skipped module_id={} reason=unregistered",
                id
            );
        }

        let order: Vec<ModuleDescriptor> = self
            .registry
            .in_load_order()
            .filter(|descriptor| enabled.contains(&descriptor.id))
            .filter(|descriptor| !self.is_loaded(&descriptor.id))
            .cloned()
            .collect();

        for descriptor in &order {
            if mode == BootMode::Inspect {
                if let Some(reason) = self.inspect_skip_reason(descriptor, &report.skipped) {
                    info!(
                        "event=boot module=manager status=skipped module_id={} reason={}",
                        descriptor.id, reason
                    );
                    report.skipped.push(descriptor.id.clone());
                    continue;
                }
            }
            match self.load_one(descriptor)? {
                LoadOutcome::Loaded => report.loaded.push(descriptor.id.clone()),
                LoadOutcome::Failed(record) => report.failed.push(record),
            }
        }

        info!(
            "event=boot module=manager status=ok session_id={} loaded={} failed={} skipped={} duration_ms={}",
            self.session_id,
            report.loaded.len(),
            report.failed.len(),
            report.skipped.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Enables one module and loads it, with any enabled-but-unloaded
    /// dependencies, if this process has not loaded it yet.
    ///
    /// Returns the terminal state, not only the flag flip: a load or
    /// immediate self-test failure yields `LoadOutcome::Failed` with the flag
    /// back at `false`.
    pub fn enable(&mut self, module_id: &str) -> ManagerResult<LoadOutcome> {
        let descriptor = self.registry.require(module_id)?.clone();

        for dependency in &descriptor.dependencies {
            if !self.store.is_enabled(dependency)? {
                return Err(ManagerError::DependencyDisabled {
                    module_id: descriptor.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        if let Some(plugin) = &descriptor.required_plugin {
            if !self.runtime.is_plugin_active(plugin) {
                return Err(ManagerError::RequiredPluginInactive {
                    module_id: descriptor.id.clone(),
                    plugin: plugin.clone(),
                });
            }
        }

        self.store.set_enabled(module_id, true)?;
        info!(
            "event=module_enable module=manager status=flag_set module_id={}",
            module_id
        );

        if self.is_loaded(module_id) {
            self.clear_stale_error(module_id)?;
            return Ok(LoadOutcome::Loaded);
        }

        let closure = self.dependency_closure(&descriptor);
        let candidates: Vec<ModuleDescriptor> = self
            .registry
            .in_load_order()
            .filter(|candidate| closure.contains(&candidate.id))
            .filter(|candidate| !self.is_loaded(&candidate.id))
            .cloned()
            .collect();
        for dependency in &candidates {
            if self.store.is_enabled(&dependency.id)? {
                self.load_one(dependency)?;
            }
        }

        self.load_one(&descriptor)
    }

    /// Disables one module unless an enabled module depends on it.
    pub fn disable(&mut self, module_id: &str) -> ManagerResult<()> {
        let descriptor = self.registry.require(module_id)?;

        let store = &self.store;
        let dependents = enabled_dependents(self.registry.all(), &descriptor.id, |id| {
            store.is_enabled(id)
        })?;
        if !dependents.is_empty() {
            info!(
                "event=module_disable module=manager status=blocked module_id={} dependents={}",
                module_id,
                dependents.join(",")
            );
            return Err(ManagerError::DependencyBlocked {
                module_id: module_id.to_string(),
                dependents,
            });
        }

        self.store.set_enabled(module_id, false)?;
        let removed = self.runtime.retract(module_id);
        self.transition(module_id, ModuleLifecycle::Disabled);
        info!(
            "event=module_disable module=manager status=ok module_id={} retracted={}",
            module_id, removed
        );
        Ok(())
    }

    /// Lists unexpired failure records after purging expired ones.
    pub fn list_errors(&self) -> ManagerResult<Vec<ModuleErrorRecord>> {
        let now = now_epoch_ms();
        self.store.purge_expired(now)?;
        Ok(self.store.list_errors(now)?)
    }

    /// Clears one failure record. Returns `false` when none was recorded.
    pub fn clear_error(&self, module_id: &str) -> ManagerResult<bool> {
        let cleared = self.store.clear_error(module_id)?;
        debug!(
            "event=module_error_clear module=manager status=ok module_id={} cleared={}",
            module_id, cleared
        );
        Ok(cleared)
    }

    /// Runs deferred self-tests for loaded modules at most once per manager,
    /// and only for privileged requests.
    pub fn run_deferred_self_tests(&mut self, request: RequestKind) -> ManagerResult<DeferredReport> {
        if !request.is_privileged() {
            debug!(
                "event=deferred_self_test module=manager status=skipped request={} reason=unprivileged",
                request.as_str()
            );
            return Ok(DeferredReport::default());
        }
        if self.deferred_ran {
            debug!(
                "event=deferred_self_test module=manager status=skipped request={} reason=already_ran",
                request.as_str()
            );
            return Ok(DeferredReport::default());
        }
        self.deferred_ran = true;

        let started_at = Instant::now();
        let mut report = DeferredReport {
            ran: true,
            ..DeferredReport::default()
        };
        let mut failures = Vec::new();
        {
            let ctx = DeepContext {
                runtime: &self.runtime,
                schema: &self.store,
                request,
            };
            for descriptor in self.registry.in_load_order() {
                if self.lifecycle(&descriptor.id) != ModuleLifecycle::Loaded {
                    continue;
                }
                match self.self_tests.validate_deep(&descriptor.id, &ctx) {
                    Ok(_) => report.passed.push(descriptor.id.clone()),
                    Err(failure) => failures.push(
                        ModuleErrorRecord::new(
                            descriptor.id.clone(),
                            descriptor.name.clone(),
                            FaultKind::DeferredSelfTest,
                            failure.to_string(),
                        )
                        .with_session(self.session_id),
                    ),
                }
            }
        }

        for record in failures {
            self.store.disable_with_error(&record)?;
            warn!(
                "event=deferred_self_test module=manager status=error module_id={} request={} error={}",
                record.module_id,
                request.as_str(),
                record.message
            );
            report.failed.push(record);
        }

        info!(
            "event=deferred_self_test module=manager status=ok request={} passed={} failed={} duration_ms={}",
            request.as_str(),
            report.passed.len(),
            report.failed.len(),
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn dependency_closure(&self, descriptor: &ModuleDescriptor) -> BTreeSet<ModuleId> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<&str> = descriptor.dependencies.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if !closure.insert(id.to_string()) {
                continue;
            }
            if let Some(dependency) = self.registry.get(id) {
                stack.extend(dependency.dependencies.iter().map(String::as_str));
            }
        }
        closure
    }

    /// Loads one module whose flag is already true and runs immediate
    /// self-tests, auto-disabling on any failure.
    fn load_one(&mut self, descriptor: &ModuleDescriptor) -> ManagerResult<LoadOutcome> {
        let module_id = descriptor.id.as_str();
        self.transition(module_id, ModuleLifecycle::Loading);

        if let Some(dependency) = descriptor
            .dependencies
            .iter()
            .find(|dependency| !self.is_loaded(dependency))
        {
            let message = format!("dependency `{dependency}` is not loaded");
            self.transition(module_id, ModuleLifecycle::FailedLoad);
            return self.fail(descriptor, FaultKind::DependencyUnavailable, message);
        }
        if let Some(plugin) = descriptor
            .required_plugin
            .as_deref()
            .filter(|plugin| !self.runtime.is_plugin_active(plugin))
        {
            let message = format!("required plugin `{plugin}` is not active");
            self.transition(module_id, ModuleLifecycle::FailedLoad);
            return self.fail(descriptor, FaultKind::MissingResource, message);
        }

        if let Err(failure) = load_module(descriptor, &self.units, &mut self.runtime) {
            self.transition(module_id, ModuleLifecycle::FailedLoad);
            return self.fail(descriptor, failure.kind, failure.to_string());
        }
        self.transition(module_id, ModuleLifecycle::Loaded);

        match self.self_tests.validate_after_load(module_id, &self.runtime) {
            Ok(checks) => {
                debug!(
                    "event=immediate_self_test module=manager status=ok module_id={} checks={}",
                    module_id, checks
                );
            }
            Err(failure) => {
                self.runtime.retract(module_id);
                self.transition(module_id, ModuleLifecycle::FailedSelfTest);
                return self.fail(descriptor, FaultKind::ImmediateSelfTest, failure.to_string());
            }
        }

        self.clear_stale_error(module_id)?;
        Ok(LoadOutcome::Loaded)
    }

    fn clear_stale_error(&self, module_id: &str) -> ManagerResult<()> {
        if self.store.clear_error(module_id)? {
            info!(
                "event=module_error_clear module=manager status=ok module_id={} reason=loaded",
                module_id
            );
        }
        Ok(())
    }

    fn inspect_skip_reason(
        &self,
        descriptor: &ModuleDescriptor,
        skipped: &[ModuleId],
    ) -> Option<&'static str> {
        let plugin_inactive = descriptor
            .required_plugin
            .as_deref()
            .is_some_and(|plugin| !self.runtime.is_plugin_active(plugin));
        if plugin_inactive {
            return Some("plugin_inactive");
        }
        descriptor
            .dependencies
            .iter()
            .any(|dependency| skipped.contains(dependency))
            .then_some("dependency_skipped")
    }

    fn fail(
        &mut self,
        descriptor: &ModuleDescriptor,
        kind: FaultKind,
        message: String,
    ) -> ManagerResult<LoadOutcome> {
        let record = ModuleErrorRecord::new(
            descriptor.id.clone(),
            descriptor.name.clone(),
            kind,
            message,
        )
        .with_session(self.session_id);
        self.store.disable_with_error(&record)?;
        self.transition(&descriptor.id, ModuleLifecycle::Disabled);
        warn!(
            "event=module_fault module=manager status=disabled module_id={} kind={} session_id={} error={}",
            record.module_id,
            kind.as_str(),
            self.session_id,
            record.message
        );
        Ok(LoadOutcome::Failed(record))
    }

    fn transition(&mut self, module_id: &str, next: ModuleLifecycle) {
        let current = self.lifecycle(module_id);
        if !current.can_transition_to(next) {
            warn!(
                "event=module_transition module=manager status=rejected module_id={} from={} to={}",
                module_id,
                current.as_str(),
                next.as_str()
            );
            return;
        }
        debug!(
            "event=module_transition module=manager status=ok module_id={} from={} to={}",
            module_id,
            current.as_str(),
            next.as_str()
        );
        self.lifecycle.insert(module_id.to_string(), next);
    }
}
