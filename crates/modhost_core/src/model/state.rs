//! Module lifecycle state and failure records.
//!
//! # Responsibility
//! - Define the per-process lifecycle state machine.
//! - Define the persisted failure record shown on the error surface.
//!
//! # Invariants
//! - `FailedLoad` and `FailedSelfTest` are transient and always converge to
//!   `Disabled` within the same manager call.
//! - Terminal per-process states are `Loaded` and `Disabled`.

use crate::model::descriptor::ModuleId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Per-process lifecycle position of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleLifecycle {
    /// Not touched by this process yet.
    Unloaded,
    /// Implementation units are being loaded.
    Loading,
    /// Loaded and passed immediate self-tests.
    Loaded,
    /// A unit was missing or faulted during load.
    FailedLoad,
    /// Loaded, but a self-test rejected it.
    FailedSelfTest,
    /// Flag is false; only an explicit enable re-enters `Loading`.
    Disabled,
}

impl ModuleLifecycle {
    /// Returns whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ModuleLifecycle) -> bool {
        use ModuleLifecycle::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Unloaded, Disabled)
                | (Loading, Loaded)
                | (Loading, FailedLoad)
                | (Loaded, Loaded)
                | (Loaded, FailedSelfTest)
                | (Loaded, Disabled)
                | (FailedLoad, Disabled)
                | (FailedSelfTest, Disabled)
                | (Disabled, Loading)
                | (Disabled, Disabled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::FailedLoad => "failed_load",
            Self::FailedSelfTest => "failed_self_test",
            Self::Disabled => "disabled",
        }
    }
}

/// Classification of a recorded module failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// A declared implementation unit is not in the unit catalog.
    MissingResource,
    /// A unit panicked or returned an error while loading.
    LoadFault,
    /// An immediate self-test expectation failed or faulted.
    ImmediateSelfTest,
    /// A deferred self-test expectation failed or faulted.
    DeferredSelfTest,
    /// A dependency was not loaded when this module's turn came at boot.
    DependencyUnavailable,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingResource => "missing_resource",
            Self::LoadFault => "load_fault",
            Self::ImmediateSelfTest => "immediate_self_test",
            Self::DeferredSelfTest => "deferred_self_test",
            Self::DependencyUnavailable => "dependency_unavailable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "missing_resource" => Some(Self::MissingResource),
            "load_fault" => Some(Self::LoadFault),
            "immediate_self_test" => Some(Self::ImmediateSelfTest),
            "deferred_self_test" => Some(Self::DeferredSelfTest),
            "dependency_unavailable" => Some(Self::DependencyUnavailable),
            _ => None,
        }
    }
}

/// Persisted failure record for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleErrorRecord {
    pub module_id: ModuleId,
    pub module_name: String,
    pub kind: FaultKind,
    /// Human-readable message naming the failed unit or expectation.
    pub message: String,
    /// Unix epoch milliseconds.
    pub recorded_at: i64,
    /// Manager session that recorded the failure, for log correlation.
    pub session_id: Option<Uuid>,
}

impl ModuleErrorRecord {
    /// Creates a record stamped with the current wall-clock time.
    pub fn new(
        module_id: impl Into<ModuleId>,
        module_name: impl Into<String>,
        kind: FaultKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            module_name: module_name.into(),
            kind,
            message: message.into(),
            recorded_at: now_epoch_ms(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Combined persisted and per-process view of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleState {
    pub enabled: bool,
    pub loaded: bool,
    pub lifecycle: ModuleLifecycle,
    pub last_error: Option<ModuleErrorRecord>,
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
