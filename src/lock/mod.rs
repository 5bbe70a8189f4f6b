//! Optimistic concurrency control.

mod guard;

pub use guard::OptimisticLockGuard;
