//! Fault containment for module load and self-test calls.
//!
//! # Responsibility
//! - Run module-supplied code inside a protected region.
//! - Convert panics and module-raised errors into one `ContainedFault` value.
//!
//! # Invariants
//! - A panic inside `contain` never unwinds past it.
//! - The containment marker is restored on every exit path, including
//!   unwinding, so nested and sequential calls see consistent state.
//! - Fault messages are single-line and length-capped.

use std::any::Any;
use std::cell::Cell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};

const MAX_FAULT_MESSAGE_CHARS: usize = 240;

thread_local! {
    static CONTAINMENT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Returns whether the current thread is inside `contain`.
///
/// The logging panic hook uses this to report contained panics as warnings
/// instead of crashes.
pub fn in_contained_region() -> bool {
    CONTAINMENT_DEPTH.with(|depth| depth.get() > 0)
}

/// Failure captured at a containment boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedFault {
    /// Sanitized failure message.
    pub message: String,
    /// `true` when the failure was a panic rather than a returned error.
    pub panicked: bool,
}

impl Display for ContainedFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.panicked {
            write!(f, "panic: {}", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl Error for ContainedFault {}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        CONTAINMENT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CONTAINMENT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Runs `f`, converting both returned errors and panics into
/// `ContainedFault`.
pub fn contain<T, E, F>(f: F) -> Result<T, ContainedFault>
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    let outcome = {
        let _guard = DepthGuard::enter();
        catch_unwind(AssertUnwindSafe(f))
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ContainedFault {
            message: sanitize_message(&err.to_string(), MAX_FAULT_MESSAGE_CHARS),
            panicked: false,
        }),
        Err(payload) => Err(ContainedFault {
            message: sanitize_message(&panic_payload_text(payload.as_ref()), MAX_FAULT_MESSAGE_CHARS),
            panicked: true,
        }),
    }
}

/// Extracts a printable message from a panic payload.
pub fn panic_payload_text(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Flattens newlines and caps length at `max_chars` characters.
pub fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::{contain, in_contained_region, sanitize_message};

    #[test]
    fn passes_through_success() {
        let value = contain(|| Ok::<_, String>(7)).expect("success passes through");
        assert_eq!(value, 7);
    }

    #[test]
    fn converts_returned_error() {
        let fault = contain(|| Err::<(), _>("unit refused")).expect_err("error is contained");
        assert!(!fault.panicked);
        assert_eq!(fault.message, "unit refused");
    }

    #[test]
    fn converts_panic_and_restores_marker() {
        assert!(!in_contained_region());
        let fault = contain(|| -> Result<(), String> {
            assert!(in_contained_region());
            panic!("unit exploded\nwith detail");
        })
        .expect_err("panic is contained");
        assert!(fault.panicked);
        assert_eq!(fault.message, "unit exploded with detail");
        assert!(!in_contained_region());
    }

    #[test]
    fn sanitize_message_removes_newlines_and_truncates() {
        let sanitized = sanitize_message("line1\nline2\rline3", 8);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
        assert!(sanitized.ends_with("..."));
    }
}
