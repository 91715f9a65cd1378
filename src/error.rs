//! Failure taxonomy for actualization.
//!
//! A failed actualization records its cause once, as a shared [`Cause`],
//! and everything that later reports the failure hands out the same
//! allocation. The call that actually ran the producer sees the original
//! failure ([`LazyError::Producer`]); every other observer sees the derived
//! [`LazyError::Failed`] wrapping that cause.

use core::fmt;
use std::any::Any;
use std::error::Error;
use std::sync::Arc;

/// Boxed error accepted from fallible producers.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// The recorded cause of a failed actualization.
///
/// Shared between the cell and every error derived from it, so
/// `Arc::ptr_eq` identifies the original failure across observers.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Error returned by [`Lazy::get`](crate::Lazy::get) and
/// [`Lazy::actualize`](crate::Lazy::actualize).
#[derive(Debug, Clone)]
pub enum LazyError {
   /// The producer failed during this very call. Only the call that ran the
   /// producer ever sees this variant; it carries the original failure
   /// unmodified, and its `Display`/`source` delegate to it transparently.
   Producer(Cause),
   /// A previous actualization attempt failed. Every later observer gets
   /// this derived error, wrapping the recorded cause.
   Failed(Cause),
}

impl LazyError {
   /// The recorded original failure, whichever variant carries it.
   #[inline]
   pub fn cause(&self) -> &Cause {
      match self {
         Self::Producer(cause) | Self::Failed(cause) => cause,
      }
   }
}

impl fmt::Display for LazyError {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Producer(cause) => fmt::Display::fmt(cause, f),
         Self::Failed(cause) => write!(f, "actualization failed: {cause}"),
      }
   }
}

impl Error for LazyError {
   fn source(&self) -> Option<&(dyn Error + 'static)> {
      match self {
         Self::Producer(cause) => cause.source(),
         Self::Failed(cause) => Some(&**cause),
      }
   }
}

/// Recorded cause when the producer panicked instead of returning.
///
/// The panic payload itself is resumed on the computing thread; everyone
/// else gets this marker, carrying the payload message when one could be
/// extracted.
#[derive(Debug)]
pub struct ProducerPanicked {
   message: Option<String>,
}

impl ProducerPanicked {
   /// Placeholder cause written before the attempt runs; only observable if
   /// the attempt dies without publishing a real outcome.
   #[inline]
   pub(crate) fn unknown() -> Self {
      Self { message: None }
   }

   pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
      let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
         Some((*s).to_owned())
      } else if let Some(s) = payload.downcast_ref::<String>() {
         Some(s.clone())
      } else {
         None
      };
      Self { message }
   }

   /// The panic message, when the payload was a string.
   #[inline]
   pub fn message(&self) -> Option<&str> {
      self.message.as_deref()
   }
}

impl fmt::Display for ProducerPanicked {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match &self.message {
         Some(message) => write!(f, "producer panicked: {message}"),
         None => f.write_str("producer panicked"),
      }
   }
}

impl Error for ProducerPanicked {}
