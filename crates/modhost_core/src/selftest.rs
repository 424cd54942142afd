//! Post-load self-test expectations and runner.
//!
//! # Responsibility
//! - Register per-module expectations for the immediate and deferred phases.
//! - Evaluate them inside fault containment and name the failed expectation.
//!
//! # Invariants
//! - Immediate checks only see the host runtime; they never touch storage.
//! - Deferred checks run only for privileged requests (`RequestKind::Admin`
//!   or `RequestKind::Scheduled`); the caller decides when to invoke them.
//! - A module with no expectations passes vacuously.

use crate::db::table_exists;
use crate::fault::contain;
use crate::model::descriptor::ModuleId;
use crate::repo::RepoResult;
use crate::runtime::{self_test_hook_name, HostRuntime};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Kind of request the host is serving when deferred tests are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Regular traffic; deferred tests are never run.
    Ordinary,
    /// Administrative surface.
    Admin,
    /// Scheduled/background execution.
    Scheduled,
}

impl RequestKind {
    pub fn is_privileged(self) -> bool {
        matches!(self, Self::Admin | Self::Scheduled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Admin => "admin",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Self-test phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Immediate,
    Deferred,
}

impl TestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
        }
    }
}

/// Read-only schema access for deferred checks.
pub trait SchemaProbe {
    fn table_exists(&self, table: &str) -> RepoResult<bool>;
}

impl SchemaProbe for Connection {
    fn table_exists(&self, table: &str) -> RepoResult<bool> {
        Ok(table_exists(self, table)?)
    }
}

/// Everything a deferred check or deep self-test hook may inspect.
pub struct DeepContext<'a> {
    pub runtime: &'a HostRuntime,
    pub schema: &'a dyn SchemaProbe,
    pub request: RequestKind,
}

type RuntimePredicate = Box<dyn Fn(&HostRuntime) -> bool>;
type DeepPredicate = Box<dyn Fn(&DeepContext<'_>) -> bool>;

/// Check evaluated right after a successful load.
pub enum ImmediateCheck {
    /// A symbol the module must have registered.
    Symbol(String),
    /// Named predicate over the host runtime.
    Predicate {
        label: String,
        check: RuntimePredicate,
    },
}

impl ImmediateCheck {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self::Symbol(symbol.into())
    }

    pub fn predicate<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&HostRuntime) -> bool + 'static,
    {
        Self::Predicate {
            label: label.into(),
            check: Box::new(check),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Symbol(symbol) => format!("symbol `{symbol}` exists"),
            Self::Predicate { label, .. } => label.clone(),
        }
    }

    fn evaluate(&self, runtime: &HostRuntime) -> bool {
        match self {
            Self::Symbol(symbol) => runtime.has_symbol(symbol),
            Self::Predicate { check, .. } => check(runtime),
        }
    }
}

/// Check that needs full runtime readiness.
pub enum DeferredCheck {
    /// A symbol, usually of a companion subsystem, must exist.
    Symbol(String),
    /// A persistent table must exist.
    Table(String),
    /// Named predicate over the deep context.
    Predicate { label: String, check: DeepPredicate },
}

impl DeferredCheck {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self::Symbol(symbol.into())
    }

    pub fn table(table: impl Into<String>) -> Self {
        Self::Table(table.into())
    }

    pub fn predicate<F>(label: impl Into<String>, check: F) -> Self
    where
        F: Fn(&DeepContext<'_>) -> bool + 'static,
    {
        Self::Predicate {
            label: label.into(),
            check: Box::new(check),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Symbol(symbol) => format!("symbol `{symbol}` exists"),
            Self::Table(table) => format!("table `{table}` exists"),
            Self::Predicate { label, .. } => label.clone(),
        }
    }

    fn evaluate(&self, ctx: &DeepContext<'_>) -> Result<bool, String> {
        match self {
            Self::Symbol(symbol) => Ok(ctx.runtime.has_symbol(symbol)),
            Self::Table(table) => ctx.schema.table_exists(table).map_err(|err| err.to_string()),
            Self::Predicate { check, .. } => Ok(check(ctx)),
        }
    }
}

/// Failed expectation, named for the error surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestFailure {
    pub phase: TestPhase,
    /// Description of the failed expectation.
    pub expectation: String,
    /// Set when the check faulted instead of returning false.
    pub fault: Option<String>,
}

impl Display for SelfTestFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} self-test failed: expected {}",
            self.phase.as_str(),
            self.expectation
        )?;
        if let Some(fault) = &self.fault {
            write!(f, " ({fault})")?;
        }
        Ok(())
    }
}

impl Error for SelfTestFailure {}

#[derive(Default)]
struct ModuleExpectations {
    immediate: Vec<ImmediateCheck>,
    deferred: Vec<DeferredCheck>,
}

/// Per-module expectation table.
#[derive(Default)]
pub struct SelfTestRegistry {
    by_module: BTreeMap<ModuleId, ModuleExpectations>,
}

impl SelfTestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_immediate(&mut self, module_id: impl Into<ModuleId>, check: ImmediateCheck) {
        self.by_module
            .entry(module_id.into())
            .or_default()
            .immediate
            .push(check);
    }

    pub fn expect_deferred(&mut self, module_id: impl Into<ModuleId>, check: DeferredCheck) {
        self.by_module
            .entry(module_id.into())
            .or_default()
            .deferred
            .push(check);
    }

    /// Runs immediate checks. Returns how many checks ran.
    pub fn validate_after_load(
        &self,
        module_id: &str,
        runtime: &HostRuntime,
    ) -> Result<usize, SelfTestFailure> {
        let Some(expectations) = self.by_module.get(module_id) else {
            return Ok(0);
        };

        for check in &expectations.immediate {
            let outcome = contain(|| Ok::<_, String>(check.evaluate(runtime)));
            settle(TestPhase::Immediate, check.describe(), outcome)?;
        }
        Ok(expectations.immediate.len())
    }

    /// Runs deferred checks, then the module's deep self-test hook if one is
    /// registered. Returns how many checks ran, counting the hook.
    pub fn validate_deep(
        &self,
        module_id: &str,
        ctx: &DeepContext<'_>,
    ) -> Result<usize, SelfTestFailure> {
        let mut ran = 0;
        if let Some(expectations) = self.by_module.get(module_id) {
            for check in &expectations.deferred {
                let outcome = contain(|| check.evaluate(ctx));
                settle(TestPhase::Deferred, check.describe(), outcome)?;
                ran += 1;
            }
        }

        let hook_name = self_test_hook_name(module_id);
        if let Some(hook) = ctx.runtime.hook(&hook_name) {
            let expectation = format!("hook `{hook_name}` passes");
            match contain(|| hook(ctx)) {
                Ok(()) => {}
                Err(fault) => {
                    return Err(SelfTestFailure {
                        phase: TestPhase::Deferred,
                        expectation,
                        fault: Some(fault.to_string()),
                    });
                }
            }
            ran += 1;
        }
        Ok(ran)
    }
}

fn settle(
    phase: TestPhase,
    expectation: String,
    outcome: Result<bool, crate::fault::ContainedFault>,
) -> Result<(), SelfTestFailure> {
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => Err(SelfTestFailure {
            phase,
            expectation,
            fault: None,
        }),
        Err(fault) => Err(SelfTestFailure {
            phase,
            expectation,
            fault: Some(fault.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DeepContext, DeferredCheck, ImmediateCheck, RequestKind, SelfTestRegistry, TestPhase,
    };
    use crate::db::open_db_in_memory;
    use crate::runtime::HostRuntime;

    #[test]
    fn module_without_expectations_passes_vacuously() {
        let registry = SelfTestRegistry::new();
        let runtime = HostRuntime::new();
        assert_eq!(registry.validate_after_load("notes", &runtime), Ok(0));
    }

    #[test]
    fn immediate_failure_names_the_expectation() {
        let mut registry = SelfTestRegistry::new();
        registry.expect_immediate("hours", ImmediateCheck::symbol("hours.widget"));
        let runtime = HostRuntime::new();

        let failure = registry
            .validate_after_load("hours", &runtime)
            .expect_err("missing symbol must fail");
        assert_eq!(failure.phase, TestPhase::Immediate);
        assert!(failure.to_string().contains("hours.widget"));
    }

    #[test]
    fn panicking_predicate_is_reported_as_failure() {
        let mut registry = SelfTestRegistry::new();
        registry.expect_immediate(
            "hours",
            ImmediateCheck::predicate("clock is sane", |_| panic!("clock exploded")),
        );
        let runtime = HostRuntime::new();

        let failure = registry
            .validate_after_load("hours", &runtime)
            .expect_err("panic must fail the check");
        assert_eq!(failure.expectation, "clock is sane");
        assert!(failure
            .fault
            .as_deref()
            .is_some_and(|fault| fault.contains("clock exploded")));
    }

    #[test]
    fn deferred_table_check_uses_schema() {
        let conn = open_db_in_memory().expect("open db");
        let mut registry = SelfTestRegistry::new();
        registry.expect_deferred("hours", DeferredCheck::table("module_errors"));
        registry.expect_deferred("markers", DeferredCheck::table("markers_log"));
        let runtime = HostRuntime::new();
        let ctx = DeepContext {
            runtime: &runtime,
            schema: &conn,
            request: RequestKind::Admin,
        };

        assert_eq!(registry.validate_deep("hours", &ctx), Ok(1));
        let failure = registry
            .validate_deep("markers", &ctx)
            .expect_err("missing table must fail");
        assert!(failure.to_string().contains("markers_log"));
    }

    #[test]
    fn only_admin_and_scheduled_requests_are_privileged() {
        assert!(!RequestKind::Ordinary.is_privileged());
        assert!(RequestKind::Admin.is_privileged());
        assert!(RequestKind::Scheduled.is_privileged());
    }
}
