//! Core lifecycle logic for modhost.
//! This crate owns module activation state, fault containment and self-tests.

pub mod admin;
pub mod config;
pub mod db;
pub mod deps;
pub mod fault;
pub mod loader;
pub mod logging;
pub mod manager;
pub mod model;
pub mod registry;
pub mod repo;
pub mod runtime;
pub mod selftest;

pub use admin::{AdminCaller, AdminErrorCode, AdminResponse, AdminSurface, ModuleListing};
pub use config::{ConfigError, HostConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use fault::{contain, ContainedFault};
pub use loader::{load_module, LoadFailure, ModuleUnit, UnitCatalog, UnitContext, UnitError};
pub use logging::{
    default_log_level, init_logging, install_panic_hook, logging_status, normalize_level,
};
pub use manager::{
    BootMode, BootReport, DeferredReport, LoadOutcome, ManagerError, ManagerResult,
    ModuleManager,
};
pub use model::descriptor::{ModuleDescriptor, ModuleId};
pub use model::state::{FaultKind, ModuleErrorRecord, ModuleLifecycle, ModuleState};
pub use registry::{ModuleRegistry, RegistryError};
pub use repo::error_repo::{ErrorStore, DEFAULT_ERROR_RETENTION};
pub use repo::settings_repo::SettingsStore;
pub use repo::{ModuleStore, RepoError, RepoResult, SqliteModuleStore};
pub use runtime::HostRuntime;
pub use selftest::{
    DeepContext, DeferredCheck, ImmediateCheck, RequestKind, SchemaProbe, SelfTestFailure,
    SelfTestRegistry,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
