//! Native stack growth for the evaluator's recursion.
//!
//! Nesting depth in a program (parentheses, list literals, calls inside
//! loops inside calls) maps directly onto Rust recursion, so every
//! recursive entry point runs through [`ensure_sufficient_stack`].

/// Grow when less than this remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
