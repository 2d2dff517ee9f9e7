//! Runtime invariants of the capture path
//!
//! Production code asserts the resource-ownership rules below through
//! [`assert_invariant!`]; every check is recorded in a thread-local log so a
//! test can prove with [`contract_test`] that the rule was actually exercised
//! by the scenario it ran, not just that nothing panicked.
//!
//! ```rust,ignore
//! use boothcam::invariant_ppt::*;
//!
//! assert_invariant!(live_tracks <= 1, SINGLE_CAPTURE_SOURCE, "client::controller");
//!
//! #[test]
//! fn contract_controller() {
//!     // ... drive the controller ...
//!     contract_test("controller", &[SINGLE_CAPTURE_SOURCE, RELEASE_BEFORE_ATTEMPT]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

/// At most one direct capture track is alive at any time.
pub const SINGLE_CAPTURE_SOURCE: &str = "At most one capture track is active";
/// A capability attempt never starts while a previous track is still held.
pub const RELEASE_BEFORE_ATTEMPT: &str = "Previous capture track released before a new attempt";
/// The preview is bound to exactly one of direct track, daemon stream or placeholder.
pub const SINGLE_PREVIEW_SOURCE: &str = "Preview shows a single source";
/// Snapshot frames come from a fresh capture, never from the cache.
pub const SNAPSHOT_IS_FRESH: &str = "Snapshot returns a newly captured frame";

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("Invariant violated in {}: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Whether `invariant` has been checked on this thread since the last clear.
pub fn invariant_checked(invariant: &str) -> bool {
    INVARIANT_LOG.with(|log| log.borrow().contains(invariant))
}

/// Check that specific invariants were verified during test execution.
///
/// # Panics
/// Panics listing every required invariant that was never checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !invariant_checked(invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Clear the invariant log of the current thread
pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().clear();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariants_are_recorded() {
        clear_invariant_log();
        assert_invariant!(true, SINGLE_CAPTURE_SOURCE, "test");
        assert!(invariant_checked(SINGLE_CAPTURE_SOURCE));
        assert!(!invariant_checked(SNAPSHOT_IS_FRESH));
        contract_test("recorded", &[SINGLE_CAPTURE_SOURCE]);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_contract_reports_unchecked() {
        clear_invariant_log();
        contract_test("unchecked", &[RELEASE_BEFORE_ATTEMPT]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [test]")]
    fn test_violation_panics() {
        assert_invariant!(false, SINGLE_PREVIEW_SOURCE, "test");
    }
}
