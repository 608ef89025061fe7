//! Stack growth for deeply recursive parsing and evaluation.
//!
//! Every recursive descent step runs through [`ensure_sufficient_stack`], so
//! the interpreter's own call-depth limit is always hit before the native
//! stack overflows.

/// Minimum stack space to keep available before recursing further.
const RED_ZONE: usize = 128 * 1024;

/// Stack space to allocate when growing.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
