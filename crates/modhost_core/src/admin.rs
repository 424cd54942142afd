//! Administrative surface over the lifecycle manager.
//!
//! # Responsibility
//! - Expose module listing, toggling, error listing and clearing as stable
//!   response envelopes.
//! - Enforce the module-management privilege.
//!
//! # Invariants
//! - Privilege is checked before any state change.
//! - Operations never panic; every failure is returned as an envelope with
//!   `ok=false`, a machine code and a human-readable message.

use crate::manager::{DeferredReport, LoadOutcome, ManagerError, ModuleManager};
use crate::model::descriptor::ModuleId;
use crate::model::state::{ModuleErrorRecord, ModuleLifecycle};
use crate::repo::ModuleStore;
use crate::selftest::RequestKind;
use log::{info, warn};
use serde::Serialize;

/// Identity of the administrative caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminCaller {
    pub can_manage_modules: bool,
}

impl AdminCaller {
    pub fn privileged() -> Self {
        Self {
            can_manage_modules: true,
        }
    }

    pub fn unprivileged() -> Self {
        Self {
            can_manage_modules: false,
        }
    }
}

/// Machine-readable failure code of an admin envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminErrorCode {
    PermissionDenied,
    NotFound,
    DependencyBlocked,
    DependencyDisabled,
    RequiredPluginInactive,
    /// The module was enabled but auto-disabled by a load or self-test fault.
    LoadFailed,
    Storage,
    Internal,
}

impl From<&ManagerError> for AdminErrorCode {
    fn from(value: &ManagerError) -> Self {
        match value {
            ManagerError::NotFound(_) => Self::NotFound,
            ManagerError::DependencyBlocked { .. } => Self::DependencyBlocked,
            ManagerError::DependencyDisabled { .. } => Self::DependencyDisabled,
            ManagerError::RequiredPluginInactive { .. } => Self::RequiredPluginInactive,
            ManagerError::Registry(_) => Self::Internal,
            ManagerError::Repo(_) => Self::Storage,
        }
    }
}

/// Response envelope shared by every admin operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminResponse<T> {
    pub ok: bool,
    /// Set only when `ok` is false.
    pub code: Option<AdminErrorCode>,
    /// Human-readable message for diagnostics/UI.
    pub message: String,
    pub data: Option<T>,
}

impl<T> AdminResponse<T> {
    fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            ok: true,
            code: None,
            message: message.into(),
            data: Some(data),
        }
    }

    fn failure(code: AdminErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }

    fn from_error(operation: &str, err: &ManagerError) -> Self {
        Self::failure(AdminErrorCode::from(err), format!("{operation} failed: {err}"))
    }
}

/// One row of the module listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleListing {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub enabled: bool,
    pub loaded: bool,
    pub lifecycle: ModuleLifecycle,
    pub dependencies: Vec<ModuleId>,
    /// Modules that declare this one as a dependency.
    pub dependents: Vec<ModuleId>,
    pub has_admin_page: bool,
    pub required_plugin: Option<String>,
    pub required_plugin_active: Option<bool>,
    pub security_warning: Option<String>,
    pub last_error: Option<ModuleErrorRecord>,
}

/// Privileged administrative entry points for one manager.
pub struct AdminSurface<S: ModuleStore> {
    manager: ModuleManager<S>,
    caller: AdminCaller,
}

impl<S: ModuleStore> AdminSurface<S> {
    pub fn new(manager: ModuleManager<S>, caller: AdminCaller) -> Self {
        Self { manager, caller }
    }

    pub fn manager(&self) -> &ModuleManager<S> {
        &self.manager
    }

    /// Lists every registered module with its persisted and in-process state,
    /// grouped by category and in registration order inside each group.
    pub fn list_modules(&self) -> AdminResponse<Vec<ModuleListing>> {
        let registry = self.manager.registry();
        let mut listings = Vec::with_capacity(registry.len());
        for descriptor in registry.by_category().into_values().flatten() {
            let state = match self.manager.state(&descriptor.id) {
                Ok(state) => state,
                Err(err) => return AdminResponse::from_error("list_modules", &err),
            };
            listings.push(ModuleListing {
                id: descriptor.id.clone(),
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                category: descriptor.category.clone(),
                enabled: state.enabled,
                loaded: state.loaded,
                lifecycle: state.lifecycle,
                dependencies: descriptor.dependencies.clone(),
                dependents: registry
                    .dependents_of(&descriptor.id)
                    .into_iter()
                    .map(|dependent| dependent.id.clone())
                    .collect(),
                has_admin_page: descriptor.has_admin_page,
                required_plugin: descriptor.required_plugin.clone(),
                required_plugin_active: descriptor
                    .required_plugin
                    .as_deref()
                    .map(|plugin| self.manager.runtime().is_plugin_active(plugin)),
                security_warning: descriptor.security_warning.clone(),
                last_error: state.last_error,
            });
        }

        let message = format!("Found {} module(s).", listings.len());
        AdminResponse::success(message, listings)
    }

    /// Enables or disables one module and reports its lifecycle afterwards.
    pub fn toggle(&mut self, module_id: &str, enabled: bool) -> AdminResponse<ModuleLifecycle> {
        if let Some(denied) = self.deny("toggle", module_id) {
            return denied;
        }

        if !enabled {
            return match self.manager.disable(module_id) {
                Ok(()) => AdminResponse::success(
                    format!("Module {module_id} disabled."),
                    self.manager.lifecycle(module_id),
                ),
                Err(err) => AdminResponse::from_error("disable", &err),
            };
        }

        match self.manager.enable(module_id) {
            Ok(LoadOutcome::Loaded) => AdminResponse::success(
                format!("Module {module_id} enabled."),
                ModuleLifecycle::Loaded,
            ),
            Ok(LoadOutcome::Failed(record)) => AdminResponse {
                ok: false,
                code: Some(AdminErrorCode::LoadFailed),
                message: format!(
                    "Module {module_id} was disabled after a {} fault: {}",
                    record.kind.as_str(),
                    record.message
                ),
                data: Some(ModuleLifecycle::Disabled),
            },
            Err(err) => AdminResponse::from_error("enable", &err),
        }
    }

    /// Lists unexpired failure records.
    pub fn list_errors(&self) -> AdminResponse<Vec<ModuleErrorRecord>> {
        match self.manager.list_errors() {
            Ok(records) => {
                let message = if records.is_empty() {
                    "No module errors.".to_string()
                } else {
                    format!("Found {} module error(s).", records.len())
                };
                AdminResponse::success(message, records)
            }
            Err(err) => AdminResponse::from_error("list_errors", &err),
        }
    }

    /// Clears the failure record of one module.
    pub fn clear_error(&mut self, module_id: &str) -> AdminResponse<()> {
        if let Some(denied) = self.deny("clear_error", module_id) {
            return denied;
        }

        match self.manager.clear_error(module_id) {
            Ok(true) => AdminResponse::success(format!("Error for {module_id} cleared."), ()),
            Ok(false) => AdminResponse::failure(
                AdminErrorCode::NotFound,
                format!("No error recorded for {module_id}."),
            ),
            Err(err) => AdminResponse::from_error("clear_error", &err),
        }
    }

    /// Runs deferred self-tests in the admin request context.
    pub fn run_self_tests(&mut self) -> AdminResponse<DeferredReport> {
        if let Some(denied) = self.deny("run_self_tests", "*") {
            return denied;
        }

        match self.manager.run_deferred_self_tests(RequestKind::Admin) {
            Ok(report) if !report.ran => {
                AdminResponse::success("Deferred self-tests already ran.", report)
            }
            Ok(report) => {
                let message = format!(
                    "Deferred self-tests: {} passed, {} failed.",
                    report.passed.len(),
                    report.failed.len()
                );
                AdminResponse::success(message, report)
            }
            Err(err) => AdminResponse::from_error("run_self_tests", &err),
        }
    }

    fn deny<T>(&self, operation: &str, module_id: &str) -> Option<AdminResponse<T>> {
        if self.caller.can_manage_modules {
            info!(
                "event=admin_request module=admin status=authorized operation={} module_id={}",
                operation, module_id
            );
            return None;
        }
        warn!(
            "event=admin_request module=admin status=denied operation={} module_id={}",
            operation, module_id
        );
        Some(AdminResponse::failure(
            AdminErrorCode::PermissionDenied,
            format!("{operation} requires the module management privilege."),
        ))
    }
}
