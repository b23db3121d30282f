//! Concurrency primitives shared by the controller
//!
//! `LockedValue` guards a single value behind a mutex, `DoubleBuffer` keeps an
//! inner slot for one owning thread and an outer slot that any thread may
//! append to under a short lock.

mod double_buffer;
mod locked;

pub use double_buffer::{AfterSwap, Clear, ClearInner, ClearOuter, DoubleBuffer, OuterGuard};
pub use locked::LockedValue;
