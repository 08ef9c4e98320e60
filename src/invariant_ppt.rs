//! Runtime invariants for the capture pipeline
//!
//! Hot paths such as the pending audio queue and the per-track timeline
//! state their invariants with [`assert_invariant!`]. Each check is counted
//! in a per-thread log, so a test can drive the code and then demand with
//! [`contract_test`] that the invariants it cares about were actually
//! exercised rather than skipped by an early return.
//!
//! ```rust,ignore
//! use crabcast::invariant_ppt::{clear_invariant_log, contract_test};
//!
//! clear_invariant_log();
//! let queue = PendingFrameQueue::with_capacity(2);
//! queue.push_back(frame);
//! contract_test("pending queue bound", &["Pending queue never exceeds its capacity"]);
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;

thread_local! {
    static CHECKED: RefCell<BTreeMap<String, usize>> = RefCell::new(BTreeMap::new());
}

/// Check a pipeline invariant, recording that it was evaluated.
///
/// The optional third argument names the component that owns the invariant
/// and appears in the panic message. A false condition panics in every
/// build profile.
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
    CHECKED.with(|checked| {
        *checked.borrow_mut().entry(message.to_owned()).or_insert(0) += 1;
    });

    if !condition {
        panic!(
            "INVARIANT VIOLATION [{}]: {}",
            context.unwrap_or("unknown"),
            message
        );
    }
}

/// How many times `message` was checked on this thread since the last clear
pub fn invariant_check_count(message: &str) -> usize {
    CHECKED.with(|checked| checked.borrow().get(message).copied().unwrap_or(0))
}

/// Panic unless every invariant in `required` was checked on this thread.
///
/// The panic lists the unchecked invariants in sorted order.
pub fn contract_test(name: &str, required: &[&str]) {
    let mut unchecked: Vec<&str> = required
        .iter()
        .copied()
        .filter(|message| invariant_check_count(message) == 0)
        .collect();
    if unchecked.is_empty() {
        return;
    }
    unchecked.sort_unstable();
    unchecked.dedup();
    panic!(
        "CONTRACT FAILURE [{}]: never checked:\n  - {}",
        name,
        unchecked.join("\n  - ")
    );
}

/// Forget every check recorded on this thread
pub fn clear_invariant_log() {
    CHECKED.with(|checked| checked.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PendingAudioFrame, PendingFrameQueue};
    use std::time::Instant;

    const QUEUE_BOUND: &str = "Pending queue never exceeds its capacity";

    #[test]
    fn test_queue_push_counts_each_check() {
        clear_invariant_log();
        let queue = PendingFrameQueue::with_capacity(2);
        for _ in 0..3 {
            queue.push_back(PendingAudioFrame::new(vec![0u8; 4], Instant::now()));
        }

        // The third push is dropped before the bound is checked
        assert_eq!(invariant_check_count(QUEUE_BOUND), 2);
        contract_test("queue bound", &[QUEUE_BOUND]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [recording::timeline]: Track timestamps never decrease")]
    fn test_violation_names_owning_component() {
        crate::assert_invariant!(false, "Track timestamps never decrease", "recording::timeline");
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE [teardown]")]
    fn test_unchecked_invariant_fails_contract() {
        clear_invariant_log();
        crate::assert_invariant!(true, QUEUE_BOUND);
        contract_test("teardown", &[QUEUE_BOUND, "Track timestamps never decrease"]);
    }

    #[test]
    fn test_checks_on_other_threads_are_not_visible() {
        clear_invariant_log();
        std::thread::spawn(|| crate::assert_invariant!(true, QUEUE_BOUND))
            .join()
            .unwrap();
        assert_eq!(invariant_check_count(QUEUE_BOUND), 0);

        crate::assert_invariant!(true, QUEUE_BOUND);
        clear_invariant_log();
        assert_eq!(invariant_check_count(QUEUE_BOUND), 0);
    }
}
