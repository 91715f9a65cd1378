//! Synchronization core for the lazy cell.
//!
//! A single packed `AtomicU8` carries the whole lifecycle of a cell:
//! - Bit 0: SETTLED - a terminal outcome has been published
//! - Bit 1: FAILED  - the terminal outcome is a failure
//! - Bit 2: LOCKED  - one caller is running the actualization attempt
//! - Bit 3: WAITING - at least one thread is parked on this cell
//!
//! The state only ever moves forward: unset -> locked -> settled. There is
//! no reset path; a failed attempt settles the cell exactly like a
//! successful one, so no epoch/generation counter is needed. Contending
//! threads park on the atomic's own address via `parking_lot_core`'s
//! futex-style API, and reads of a settled cell stay lock-free.

use core::mem;
use core::sync::atomic::{self, AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Atomic lifecycle state of a lazy cell.
#[repr(transparent)]
pub(crate) struct CellState(AtomicU8);

impl CellState {
   /// Bit flag: a terminal outcome has been published.
   const SETTLED: u8 = 1;
   /// Bit flag: the terminal outcome is a failure. Only set together with SETTLED.
   const FAILED: u8 = 2;
   /// Bit flag: one caller holds the actualization lock.
   const LOCKED: u8 = 4;
   /// Bit flag: at least one thread is parked waiting for the attempt to finish.
   const WAITING: u8 = 8;

   /// Creates the state for a cell that has not been actualized.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   /// Creates the state for a cell that is born settled with a success.
   #[inline]
   pub(crate) const fn settled() -> Self {
      Self(AtomicU8::new(Self::SETTLED))
   }

   /// Checks whether a terminal outcome has been published.
   ///
   /// Callers that go on to read the slot must use `Acquire` so the slot
   /// write in `settle` is visible; pure boolean probes can use `Relaxed`.
   #[inline]
   pub(crate) fn is_settled(&self, ordering: Ordering) -> bool {
      self.0.load(ordering) & Self::SETTLED != 0
   }

   /// Checks whether the published outcome is a failure.
   #[inline]
   pub(crate) fn has_failed(&self, ordering: Ordering) -> bool {
      self.0.load(ordering) & Self::FAILED != 0
   }

   /// Publishes the terminal outcome and wakes every parked thread.
   ///
   /// Release ordering ensures the slot write happens-before any `Acquire`
   /// load that observes SETTLED.
   #[inline]
   fn settle(&self, failed: bool) {
      let new_state = if failed {
         Self::SETTLED | Self::FAILED
      } else {
         Self::SETTLED
      };
      let prev_state = self.0.swap(new_state, Ordering::Release);
      debug_assert!(prev_state & Self::SETTLED == 0, "cell settled twice");

      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// Notifies all waiting threads. Uses `parking_lot_core` futex wait/wake.
   #[inline]
   fn notify_all(&self) {
      // SAFETY: The address passed to unpark must match the address used for
      // park. We consistently use the address of the AtomicU8.
      unsafe {
         parking_lot_core::unpark_all(self.0.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks the current thread until the state changes from `expected_state`.
   #[inline]
   fn wait(&self, expected_state: u8) {
      // SAFETY: See safety comment in `notify_all`.
      unsafe {
         // park() re-checks the condition closure before sleeping and only
         // sleeps while the state is still the one we observed.
         let _ = parking_lot_core::park(
            self.0.as_ptr() as usize,
            || self.0.load(atomic::Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
         // Wake-ups may be spurious; the caller's loop re-checks the state.
      }
   }

   /// One acquisition round.
   ///
   /// Returns:
   ///   - `Ok(None)`: the cell settled; the caller reads the published outcome.
   ///   - `Ok(Some(guard))`: lock acquired; the caller runs the attempt.
   ///   - `Err(state)`: held by another thread; `state` includes WAITING and
   ///     is the value to park against.
   #[inline]
   fn lock_step(&self) -> Result<Option<SettleGuard<'_>>, u8> {
      loop {
         // Acquire so a settled observation licenses reading the slot.
         let current_state = self.0.load(Ordering::Acquire);
         if current_state & Self::SETTLED != 0 {
            return Ok(None);
         }

         if current_state & Self::LOCKED == 0 {
            match self.0.compare_exchange_weak(
               current_state,
               current_state | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Ok(Some(SettleGuard { state: self })),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         // Lock is held; make sure the holder will wake us before we park.
         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.0.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  // State moved under us; it may have settled. Retry.
                  std::hint::spin_loop();
                  continue;
               }
            }
         }
         return Err(current_state);
      }
   }

   /// Acquires the actualization lock, parking if another thread holds it.
   ///
   /// Returns `None` if the cell settled while we were trying; the caller
   /// then reads the published outcome instead of computing.
   #[inline]
   pub(crate) fn lock(&self) -> Option<SettleGuard<'_>> {
      match self.lock_step() {
         Ok(guard) => guard,
         Err(mut observed) => loop {
            // Park only while the state is still the one lock_step saw.
            self.wait(observed);
            match self.lock_step() {
               Ok(guard) => return guard,
               Err(next) => observed = next,
            }
         },
      }
   }

   /// Acquires the actualization lock asynchronously.
   ///
   /// Tries yielding to the runtime first, then falls back to
   /// `block_in_place` for a genuinely long-running attempt.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub(crate) async fn lock_async(&self) -> Option<SettleGuard<'_>> {
      #[allow(clippy::never_loop)]
      loop {
         for _ in 0..16 {
            match self.lock_step() {
               Ok(guard) => return guard,
               Err(observed) => {
                  // Yield so the holder's task can finish the attempt.
                  for _ in 0..32 {
                     tokio::task::yield_now().await;
                     if self.0.load(Ordering::Relaxed) != observed {
                        break;
                     }
                  }
               }
            }
         }

         #[cfg(feature = "async-tokio-mt")]
         {
            return match self.lock_step() {
               Ok(guard) => guard,
               Err(observed) => tokio::task::block_in_place(|| {
                  self.wait(observed);
                  self.lock()
               }),
            };
         }
      }
   }
}

/// RAII guard for the single actualization attempt.
///
/// The holder publishes the outcome via [`commit`](Self::commit). Dropping
/// the guard without committing settles the cell as failed: the caller
/// pre-poisons the slot before running the producer, so an unwind through
/// the attempt cannot strand parked waiters or reopen the cell.
pub(crate) struct SettleGuard<'a> {
   state: &'a CellState,
}

impl SettleGuard<'_> {
   /// Publishes the terminal outcome, consumes the guard and wakes waiters.
   #[inline]
   pub(crate) fn commit(self, failed: bool) {
      self.state.settle(failed);
      mem::forget(self); // Skip the drop backstop
   }
}

impl Drop for SettleGuard<'_> {
   #[inline]
   fn drop(&mut self) {
      self.state.settle(true);
   }
}
