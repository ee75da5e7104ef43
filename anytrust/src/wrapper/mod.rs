//! Decorators over [Reader], [Storage] and [Writer].
//!
//! Each wrapper holds an inner implementation of the same trait, so they compose freely. The
//! order matters: a [Timeout] should wrap each backend directly (so every backend call gets its
//! own deadline), a [Fallback] combines the bounded backends, and a [FailFast] (if any) goes on
//! the outside so that it sees the final outcome of a read rather than a single backend miss.
//! [layered] builds this stack for the common read path.

use crate::{Reader, Storage};
use commonware_runtime::Clock;
use std::time::Duration;

pub mod fallback;
pub use fallback::Fallback;
mod fail_fast;
pub use fail_fast::FailFast;
mod timeout;
pub use timeout::Timeout;

/// Wraps `primary` and `backup` in per-call deadlines, reads through to `backup` on a miss, and
/// panics on any error other than cancellation.
pub fn layered<E: Clock, P: Storage, B: Reader>(
    context: E,
    primary: P,
    backup: B,
    request_timeout: Duration,
    cfg: fallback::Config,
) -> FailFast<Fallback<E, Timeout<E, P>, Timeout<E, B>>> {
    FailFast::new(Fallback::new(
        context.clone(),
        Timeout::new(context.clone(), primary, request_timeout),
        Timeout::new(context, backup, request_timeout),
        cfg,
    ))
}
