//! Maps batch results to the process exit outcome.

use crate::ProcessExit;

/// Determines the process exit outcome from done and failed item counts.
///
/// Skipped items count as done.
pub(crate) fn determine_exit_outcome(done: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if done > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
