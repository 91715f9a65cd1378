//! A thread-safe, memoizing lazy value container.
//!
//! [`Lazy<T>`] wraps a zero-argument computation (the *producer*) and
//! defers it until first demand. No matter how many threads race, the
//! producer runs at most once; its outcome - success or failure - is then
//! frozen for the life of the cell, and the producer is dropped so
//! whatever it captured is released.
//!
//! Failure handling distinguishes the caller that actually ran the
//! producer from everyone else:
//!
//! - the computing call gets the original failure back unmodified
//!   ([`LazyError::Producer`]), and a panicking producer resumes its panic
//!   on that thread alone;
//! - every other call gets the derived [`LazyError::Failed`] wrapping the
//!   recorded cause - a failed cell stays failed forever.
//!
//! # Features
//!
//! - **Lock-free fast path**: reading a settled cell is a single atomic load.
//! - **Efficient blocking**: contending threads park futex-style while one
//!   of them runs the producer.
//! - **Async waiting**: [`Lazy::get_async`] and [`Lazy::actualize_async`]
//!   (features `async-tokio`/`async-tokio-mt`) await a contended cell
//!   without blocking the runtime.
//! - **Composition**: [`Lazy::map`] and [`Lazy::flat_map`] derive new cells
//!   with no additional locking.
//!
//! # Examples
//!
//! ```rust
//! use lazy_once::lazy;
//!
//! let cell = lazy(|| 1024);
//! assert!(!cell.is_actualized());
//! assert_eq!(cell.to_string(), "1024"); // Display forces actualization
//! assert_eq!(cell.get().unwrap(), &1024);
//! ```
//!
//! ```rust
//! use lazy_once::Lazy;
//!
//! let cell: Lazy<String> = Lazy::fallible(|| Err("backend down".into()));
//! assert!(cell.get().is_err());
//! assert!(cell.has_failed()); // and it will stay that way
//! ```

/// Failure taxonomy for actualization.
mod error;

/// The lazy cell implementation.
mod lazy;

/// Internal synchronization state management.
mod state;

pub use error::{BoxError, Cause, LazyError, ProducerPanicked};
pub use lazy::Lazy;

/// Convenience factory, equivalent to [`Lazy::new`].
pub fn lazy<T, F>(producer: F) -> Lazy<T>
where
   F: FnOnce() -> T + Send + 'static,
{
   Lazy::new(producer)
}
