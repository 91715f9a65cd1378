//! The memoizing lazy cell.
//!
//! [`Lazy<T>`] holds either a producer (before actualization) or a frozen
//! outcome (forever after). The first demand runs the producer under the
//! cell's lock; everything afterwards is a lock-free read of the published
//! outcome. See the `state` module for the atomic protocol.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem;
use core::sync::atomic::Ordering;
use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{BoxError, Cause, LazyError, ProducerPanicked};
use crate::state::{CellState, SettleGuard};

/// The stored computation: runs once, then is dropped.
type Producer<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send>;

/// What the cell holds. `Pending` before actualization, `Settled` forever
/// after; the producer and an outcome cannot coexist.
enum Slot<T> {
   Pending(Producer<T>),
   Settled(Outcome<T>),
}

enum Outcome<T> {
   Success(T),
   Failure(Cause),
}

/// A thread-safe, memoizing wrapper around a deferred computation.
///
/// The producer passed at construction runs at most once, on first demand,
/// no matter how many threads race for it. Its outcome - the value or the
/// failure - is then frozen for the life of the cell, and the producer is
/// dropped right after the attempt so anything it captured is released.
///
/// Failures are terminal and never swallowed. The call that actually ran
/// the producer observes the original failure ([`LazyError::Producer`]);
/// every later observer gets the derived [`LazyError::Failed`] wrapping the
/// recorded cause. A panicking producer poisons the cell, and the panic
/// resumes only on the thread that ran it.
///
/// # Examples
///
/// ```rust
/// use lazy_once::Lazy;
///
/// let cell = Lazy::new(|| "expensive".to_string());
/// assert!(!cell.is_actualized());
/// assert_eq!(cell.get().unwrap(), "expensive");
/// assert!(cell.is_actualized());
/// ```
pub struct Lazy<T> {
   slot: UnsafeCell<Slot<T>>,
   state: CellState,
}

// SAFETY:
// Sharing a `&Lazy<T>` lets one thread run the (Send) producer and move the
// resulting value into the slot while other threads later read `&T`, so
// both `T: Send` and `T: Sync` are required. The slot is only written under
// the actualization lock and only read after SETTLED is published.
unsafe impl<T: Send + Sync> Sync for Lazy<T> {}
// SAFETY:
// Moving the cell moves the producer (Send by construction) or the value,
// so `T: Send` suffices.
unsafe impl<T: Send> Send for Lazy<T> {}

impl<T> Lazy<T> {
   /// Wraps an infallible producer.
   pub fn new<F>(producer: F) -> Self
   where
      F: FnOnce() -> T + Send + 'static,
   {
      Self::fallible(move || Ok(producer()))
   }

   /// Wraps a producer that may fail.
   ///
   /// The returned error becomes the recorded cause of the (terminal)
   /// failure outcome.
   pub fn fallible<F>(producer: F) -> Self
   where
      F: FnOnce() -> Result<T, BoxError> + Send + 'static,
   {
      Self {
         slot: UnsafeCell::new(Slot::Pending(Box::new(producer))),
         state: CellState::new(),
      }
   }

   /// Creates a cell that is born actualized with `value`.
   pub fn with_value(value: T) -> Self {
      Self {
         slot: UnsafeCell::new(Slot::Settled(Outcome::Success(value))),
         state: CellState::settled(),
      }
   }

   /// Checks whether the cell holds a terminal outcome.
   ///
   /// This method never blocks.
   #[inline]
   pub fn is_actualized(&self) -> bool {
      self.state.is_settled(Ordering::Relaxed)
   }

   /// Checks whether actualization ran and failed.
   ///
   /// Never blocks; `false` both before actualization and after a
   /// successful one.
   #[inline]
   pub fn has_failed(&self) -> bool {
      self.state.has_failed(Ordering::Relaxed)
   }

   /// The settled outcome, if any. The `Acquire` load pairs with the
   /// `Release` publish in `CellState::settle`, making the slot write
   /// visible before we dereference it.
   #[inline]
   fn outcome(&self) -> Option<&Outcome<T>> {
      if !self.state.is_settled(Ordering::Acquire) {
         return None;
      }
      // SAFETY: SETTLED is published only after the slot write and is never
      // retracted, so the slot holds a `Settled` variant and will not be
      // mutated again for the life of the cell.
      match unsafe { &*self.slot.get() } {
         Slot::Settled(outcome) => Some(outcome),
         Slot::Pending(_) => unreachable!("settled cell left a pending slot"),
      }
   }

   /// Returns the settled value, if actualization succeeded.
   ///
   /// Never blocks and never forces actualization.
   pub fn actualized(&self) -> Option<&T> {
      match self.outcome() {
         Some(Outcome::Success(value)) => Some(value),
         _ => None,
      }
   }

   /// Returns the recorded cause, if actualization failed.
   ///
   /// Never blocks and never forces actualization.
   pub fn error(&self) -> Option<Cause> {
      match self.outcome() {
         Some(Outcome::Failure(cause)) => Some(Arc::clone(cause)),
         _ => None,
      }
   }

   /// Runs the producer if no outcome has been published yet.
   ///
   /// Exactly one call ever executes the producer; concurrent callers block
   /// until the attempt finishes, and anyone arriving after it returns
   /// immediately. Once this returns (or panics) the cell is settled,
   /// permanently.
   ///
   /// Only the call that ran the producer can return `Err`, and it returns
   /// the original failure ([`LazyError::Producer`]). Every other call
   /// returns `Ok(())`, including calls on an already-failed cell. A panic
   /// in the producer is recorded as a [`ProducerPanicked`] cause and then
   /// resumed on this thread.
   pub fn actualize(&self) -> Result<(), LazyError> {
      if self.state.is_settled(Ordering::Acquire) {
         return Ok(());
      }
      self.actualize_slow()
   }

   #[cold]
   fn actualize_slow(&self) -> Result<(), LazyError> {
      match self.state.lock() {
         Some(guard) => self.attempt(guard),
         // Settled while we were waiting for the lock.
         None => Ok(()),
      }
   }

   /// Runs the producer under the held lock and publishes the outcome.
   fn attempt(&self, guard: SettleGuard<'_>) -> Result<(), LazyError> {
      // SAFETY: We hold the actualization lock and SETTLED is unpublished,
      // so no other reference to the slot can exist.
      let slot = unsafe { &mut *self.slot.get() };

      // Take the producer out, dropping it (and everything it captured) at
      // the end of this attempt regardless of how the attempt ends. The
      // poison left behind keeps the slot coherent with the guard's drop
      // backstop.
      let poison = Slot::Settled(Outcome::Failure(Arc::new(ProducerPanicked::unknown())));
      let producer = match mem::replace(slot, poison) {
         Slot::Pending(producer) => producer,
         Slot::Settled(_) => unreachable!("lock acquired on a settled cell"),
      };

      match panic::catch_unwind(AssertUnwindSafe(producer)) {
         Ok(Ok(value)) => {
            *slot = Slot::Settled(Outcome::Success(value));
            guard.commit(false);
            Ok(())
         }
         Ok(Err(error)) => {
            let cause: Cause = Arc::from(error);
            *slot = Slot::Settled(Outcome::Failure(Arc::clone(&cause)));
            guard.commit(true);
            Err(LazyError::Producer(cause))
         }
         Err(payload) => {
            let cause = ProducerPanicked::from_payload(payload.as_ref());
            *slot = Slot::Settled(Outcome::Failure(Arc::new(cause)));
            guard.commit(true);
            // The computing thread keeps its own panic, unmodified.
            panic::resume_unwind(payload)
         }
      }
   }

   /// Reads the published outcome. Callers must have settled the cell.
   fn settled_value(&self) -> Result<&T, LazyError> {
      match self.outcome() {
         Some(Outcome::Success(value)) => Ok(value),
         Some(Outcome::Failure(cause)) => Err(LazyError::Failed(Arc::clone(cause))),
         None => unreachable!("cell demanded before settling"),
      }
   }

   /// Demands the value, actualizing first if needed.
   ///
   /// When this very call runs the producer and the producer fails, the
   /// failure comes back unmodified as [`LazyError::Producer`]. When the
   /// cell already failed, the derived [`LazyError::Failed`] is returned
   /// instead - the stored failure is never replayed as if it had just
   /// happened on this thread.
   pub fn get(&self) -> Result<&T, LazyError> {
      if !self.state.is_settled(Ordering::Acquire) {
         self.actualize()?;
      }
      self.settled_value()
   }

   /// Demands the value, panicking if actualization failed.
   ///
   /// This is what the forcing trait impls (`PartialEq`, `Hash`, `Display`)
   /// go through, since those interfaces cannot report errors.
   ///
   /// # Panics
   ///
   /// Panics with the [`LazyError`] message if the producer failed, now or
   /// in any earlier call.
   pub fn force(&self) -> &T {
      match self.get() {
         Ok(value) => value,
         Err(error) => panic!("{error}"),
      }
   }

   /// Consumes the cell and moves the value out, actualizing first if
   /// needed. Failure reporting matches [`get`](Self::get).
   pub fn into_value(self) -> Result<T, LazyError> {
      self.actualize()?;
      match self.slot.into_inner() {
         Slot::Settled(Outcome::Success(value)) => Ok(value),
         Slot::Settled(Outcome::Failure(cause)) => Err(LazyError::Failed(cause)),
         Slot::Pending(_) => unreachable!("cell consumed before settling"),
      }
   }

   /// Derives a cell whose producer forces this one and transforms the
   /// value. Nothing runs until the derived cell is itself demanded.
   ///
   /// ```rust
   /// use std::sync::Arc;
   /// use lazy_once::Lazy;
   ///
   /// let a = Arc::new(Lazy::new(|| 1));
   /// let b = a.map(|x| x + 1);
   /// assert!(!a.is_actualized());
   /// assert_eq!(b.get().unwrap(), &2);
   /// assert!(a.is_actualized());
   /// ```
   ///
   /// A failure in this cell propagates through the derived producer per
   /// the [`get`](Self::get) rules, with no extra wrapping of its own.
   pub fn map<U, F>(self: &Arc<Self>, transform: F) -> Lazy<U>
   where
      T: Send + Sync + 'static,
      F: FnOnce(&T) -> U + Send + 'static,
   {
      let source = Arc::clone(self);
      Lazy::fallible(move || Ok(transform(source.get()?)))
   }

   /// As [`map`](Self::map), but the transform yields another cell; the
   /// derived producer forces this cell, then the inner one, and keeps the
   /// inner value. The transform and the intermediate cell are both dropped
   /// once the derived cell settles.
   pub fn flat_map<U, F>(self: &Arc<Self>, transform: F) -> Lazy<U>
   where
      T: Send + Sync + 'static,
      F: FnOnce(&T) -> Lazy<U> + Send + 'static,
   {
      let source = Arc::clone(self);
      Lazy::fallible(move || Ok(transform(source.get()?).into_value()?))
   }
}

#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
impl<T> Lazy<T> {
   /// As [`actualize`](Self::actualize), but a contended lock is awaited
   /// cooperatively (yielding to the runtime, with a `block_in_place`
   /// fallback) instead of parking the worker thread. The producer itself
   /// still runs synchronously once the lock is held.
   pub async fn actualize_async(&self) -> Result<(), LazyError> {
      if self.state.is_settled(Ordering::Acquire) {
         return Ok(());
      }
      match self.state.lock_async().await {
         Some(guard) => self.attempt(guard),
         None => Ok(()),
      }
   }

   /// As [`get`](Self::get), awaiting a contended lock cooperatively.
   pub async fn get_async(&self) -> Result<&T, LazyError> {
      if !self.state.is_settled(Ordering::Acquire) {
         self.actualize_async().await?;
      }
      self.settled_value()
   }
}

// --- Trait Implementations ---

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
   /// Non-forcing: an unset cell renders as `Lazy(<unset>)`.
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("Lazy");
      match self.outcome() {
         Some(Outcome::Success(value)) => d.field(value),
         Some(Outcome::Failure(cause)) => d.field(&format_args!("<failed: {cause}>")),
         None => d.field(&format_args!("<unset>")),
      };
      d.finish()
   }
}

impl<T: fmt::Display> fmt::Display for Lazy<T> {
   /// Forces actualization and renders the resolved value.
   ///
   /// # Panics
   ///
   /// Panics if actualization fails; see [`Lazy::force`].
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      fmt::Display::fmt(self.force(), f)
   }
}

impl<T: PartialEq> PartialEq for Lazy<T> {
   /// Forces both sides and compares the resolved values; a cell is equal
   /// to itself without forcing. Unresolved state never takes part in the
   /// comparison.
   ///
   /// # Panics
   ///
   /// Panics if forcing either side fails; see [`Lazy::force`].
   fn eq(&self, other: &Self) -> bool {
      core::ptr::eq(self, other) || self.force() == other.force()
   }
}

impl<T: Eq> Eq for Lazy<T> {}

impl<T: Hash> Hash for Lazy<T> {
   /// Forces actualization and hashes the resolved value.
   ///
   /// # Panics
   ///
   /// Panics if actualization fails; see [`Lazy::force`].
   fn hash<H: Hasher>(&self, state: &mut H) {
      self.force().hash(state);
   }
}

impl<T> From<T> for Lazy<T> {
   /// Equivalent to [`Lazy::with_value`].
   #[inline]
   fn from(value: T) -> Self {
      Self::with_value(value)
   }
}

impl<T: Default + 'static> Default for Lazy<T> {
   /// A cell producing `T::default()` on first demand.
   #[inline]
   fn default() -> Self {
      Self::new(T::default)
   }
}
