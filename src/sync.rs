//! Thin helpers over `std::sync::Condvar`, standing in for the condition
//! variable substrate the distilled spec treats as externally supplied
//! (`wait`, `timedwait`, `broadcast` — see SPEC_FULL §6.3).
//!
//! Every wait in this crate releases and reacquires the single kernel mutex
//! (`Kernel::state`), matching the "kernel mutex held across every syscall
//! body except during explicit wait" model the distilled spec calls for on a
//! preemptive/multi-core substrate.

use std::sync::{Condvar, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of a timed wait, mirroring `timedwait(cv, tag, timeout) ->
/// {signaled, timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Fetch the condvar to wait on out of the guarded state. Taking a closure
/// rather than a bare `&Condvar` lets callers re-derive the reference *after*
/// the guard has been reacquired on each loop iteration, instead of trying to
/// hold a borrow of `guard`'s contents across the point where `guard` itself
/// is moved into `Condvar::wait` — which the borrow checker rejects (and
/// rightly so: the two would alias). The arena backing every condvar boxes
/// its slots (see `arena::Arena`) so the pointer handed out here stays valid
/// across any unrelated insert/remove that happens on another thread while
/// we're parked.
fn cv_ptr<T>(guard: &MutexGuard<'_, T>, get_cv: &impl Fn(&T) -> &Condvar) -> *const Condvar {
    get_cv(&guard) as *const Condvar
}

/// Wait on the condvar `get_cv` locates until `predicate(state)` no longer
/// holds.
pub fn wait_while<'a, T, C, F>(
    mut guard: MutexGuard<'a, T>,
    get_cv: C,
    mut predicate: F,
) -> MutexGuard<'a, T>
where
    C: Fn(&T) -> &Condvar,
    F: FnMut(&T) -> bool,
{
    while predicate(&guard) {
        let cv = cv_ptr(&guard, &get_cv);
        // SAFETY: `cv` points into a boxed arena slot that is never moved or
        // freed while any handle (including this in-progress wait) could
        // still reference it; see `Arena`'s slot-boxing invariant.
        guard = unsafe { &*cv }.wait(guard).expect("kernel mutex poisoned");
    }
    guard
}

/// Timed variant of [`wait_while`]. Stops retrying once `deadline` elapses,
/// returning the outcome of the final check via [`WaitOutcome`].
pub fn wait_while_timeout<'a, T, C, F>(
    mut guard: MutexGuard<'a, T>,
    get_cv: C,
    timeout: Duration,
    mut predicate: F,
) -> (MutexGuard<'a, T>, WaitOutcome)
where
    C: Fn(&T) -> &Condvar,
    F: FnMut(&T) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if !predicate(&guard) {
            return (guard, WaitOutcome::Signaled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return (guard, WaitOutcome::TimedOut);
        }
        let cv = cv_ptr(&guard, &get_cv);
        // SAFETY: see `wait_while`.
        let (next_guard, result) = unsafe { &*cv }
            .wait_timeout(guard, remaining)
            .expect("kernel mutex poisoned");
        guard = next_guard;
        if !predicate(&guard) {
            return (guard, WaitOutcome::Signaled);
        }
        if result.timed_out() {
            return (guard, WaitOutcome::TimedOut);
        }
        // Spurious wakeup with time still on the clock: loop and re-wait
        // against the same deadline.
    }
}
