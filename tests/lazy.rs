use std::error::Error as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use lazy_once::{lazy, Lazy, LazyError, ProducerPanicked};

#[derive(Debug)]
struct Unsupported;

impl std::fmt::Display for Unsupported {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str("unsupported operation")
   }
}

impl std::error::Error for Unsupported {}

#[test]
fn test_new_cell_is_not_actualized() {
   let cell = lazy(|| 42);
   assert!(!cell.is_actualized());
   assert!(!cell.has_failed());
   assert!(cell.actualized().is_none());
   assert!(cell.error().is_none());
}

#[test]
fn test_with_value_is_born_actualized() {
   let cell = Lazy::with_value(7);
   assert!(cell.is_actualized());
   assert!(!cell.has_failed());
   assert_eq!(cell.get().unwrap(), &7);
   assert_eq!(cell.actualized(), Some(&7));
}

#[test]
fn test_get_runs_the_producer_once() {
   let counter = Arc::new(AtomicUsize::new(0));
   let counter_clone = Arc::clone(&counter);
   let cell = lazy(move || {
      counter_clone.fetch_add(1, Ordering::SeqCst);
      42
   });

   assert_eq!(cell.get().unwrap(), &42);
   assert_eq!(cell.get().unwrap(), &42);
   assert_eq!(counter.load(Ordering::SeqCst), 1);
   assert_eq!(cell.actualized(), Some(&42));
}

#[test]
fn test_actualize_is_idempotent() {
   let counter = Arc::new(AtomicUsize::new(0));
   let counter_clone = Arc::clone(&counter);
   let cell = lazy(move || {
      counter_clone.fetch_add(1, Ordering::SeqCst);
      "value"
   });

   cell.actualize().unwrap();
   cell.actualize().unwrap();
   cell.actualize().unwrap();

   assert_eq!(counter.load(Ordering::SeqCst), 1);
   assert_eq!(cell.get().unwrap(), &"value");
}

#[test]
fn test_first_get_returns_the_original_failure_later_gets_the_derived_one() {
   let cell: Lazy<i32> = Lazy::fallible(|| Err(Box::new(Unsupported)));

   let first = cell.get().unwrap_err();
   match &first {
      LazyError::Producer(cause) => {
         assert!(cause.downcast_ref::<Unsupported>().is_some());
      }
      other => panic!("expected the original failure, got {other:?}"),
   }

   let second = cell.get().unwrap_err();
   match (&first, &second) {
      (LazyError::Producer(original), LazyError::Failed(wrapped)) => {
         // The derived error wraps the very same recorded cause.
         assert!(Arc::ptr_eq(original, wrapped));
      }
      other => panic!("unexpected error pair: {other:?}"),
   }

   assert!(cell.has_failed());
   assert!(cell
      .error()
      .unwrap()
      .downcast_ref::<Unsupported>()
      .is_some());
   assert!(cell.actualized().is_none());
}

#[test]
fn test_producer_runs_just_once_even_when_failing() {
   let counter = Arc::new(AtomicUsize::new(0));
   let counter_clone = Arc::clone(&counter);
   let cell: Lazy<i32> = Lazy::fallible(move || {
      counter_clone.fetch_add(1, Ordering::SeqCst);
      Err("boom".into())
   });

   assert!(cell.get().is_err());
   assert!(cell.get().is_err());
   assert!(cell.get().is_err());
   assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_actualize_raises_nothing_once_settled() {
   let cell: Lazy<i32> = Lazy::fallible(|| Err("boom".into()));

   // The computing call surfaces the original failure...
   assert!(matches!(cell.actualize(), Err(LazyError::Producer(_))));
   // ...but later calls are plain no-ops.
   assert!(cell.actualize().is_ok());
   assert!(cell.actualize().is_ok());
   assert!(cell.has_failed());
}

#[test]
fn test_derived_failure_exposes_the_cause_via_source() {
   let cell: Lazy<i32> = Lazy::fallible(|| Err("root cause".into()));
   let _ = cell.get();

   let derived = cell.get().unwrap_err();
   assert!(matches!(derived, LazyError::Failed(_)));
   assert_eq!(derived.source().unwrap().to_string(), "root cause");
   assert_eq!(derived.to_string(), "actualization failed: root cause");
}

#[test]
fn test_concurrent_get_runs_the_producer_exactly_once() {
   for _ in 0..50 {
      let counter = Arc::new(AtomicUsize::new(0));
      let counter_clone = Arc::clone(&counter);
      let cell = Arc::new(lazy(move || {
         let calls = counter_clone.fetch_add(1, Ordering::SeqCst);
         assert_eq!(calls, 0, "producer ran twice");
         // Give racing threads a chance to pile up on the lock.
         thread::yield_now();
         "value".to_string()
      }));

      let barrier = Arc::new(Barrier::new(8));
      let handles: Vec<_> = (0..8)
         .map(|_| {
            let cell = Arc::clone(&cell);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
               barrier.wait();
               cell.get().unwrap().clone()
            })
         })
         .collect();

      for handle in handles {
         assert_eq!(handle.join().unwrap(), "value");
      }
      assert_eq!(counter.load(Ordering::SeqCst), 1);
   }
}

#[test]
fn test_exactly_one_caller_observes_the_original_failure() {
   let cell: Arc<Lazy<i32>> = Arc::new(Lazy::fallible(|| {
      // Hold the lock long enough for the losers to start waiting.
      thread::sleep(Duration::from_millis(20));
      Err("no luck".into())
   }));

   let barrier = Arc::new(Barrier::new(4));
   let handles: Vec<_> = (0..4)
      .map(|_| {
         let cell = Arc::clone(&cell);
         let barrier = Arc::clone(&barrier);
         thread::spawn(move || {
            barrier.wait();
            cell.get().unwrap_err()
         })
      })
      .collect();
   let errors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

   let originals = errors
      .iter()
      .filter(|e| matches!(e, LazyError::Producer(_)))
      .count();
   let derived = errors
      .iter()
      .filter(|e| matches!(e, LazyError::Failed(_)))
      .count();
   assert_eq!(originals, 1);
   assert_eq!(derived, 3);

   // Everyone references the same recorded cause.
   let recorded = cell.error().unwrap();
   for error in &errors {
      assert!(Arc::ptr_eq(error.cause(), &recorded));
   }
}

#[test]
fn test_panicking_producer_poisons_the_cell_and_resumes_on_the_computing_thread() {
   let cell: Arc<Lazy<String>> = Arc::new(lazy(|| panic!("interrupted")));

   let computing = {
      let cell = Arc::clone(&cell);
      thread::spawn(move || cell.get().map(String::clone))
   };

   // The computing thread keeps its own panic payload, verbatim.
   let payload = computing.join().unwrap_err();
   assert_eq!(payload.downcast_ref::<&str>(), Some(&"interrupted"));

   // Every later observer gets the derived failure wrapping the panic.
   let error = cell.get().unwrap_err();
   match &error {
      LazyError::Failed(cause) => {
         let panicked = cause
            .downcast_ref::<ProducerPanicked>()
            .expect("panic cause recorded");
         assert_eq!(panicked.message(), Some("interrupted"));
      }
      other => panic!("expected derived failure, got {other:?}"),
   }
   assert!(cell.has_failed());
   assert!(cell.actualized().is_none());
}

#[test]
fn test_waiters_on_a_panicking_producer_get_the_derived_failure() {
   let gate = Arc::new(Barrier::new(2));
   let cell: Arc<Lazy<i32>> = {
      let gate = Arc::clone(&gate);
      Arc::new(lazy(move || {
         gate.wait(); // the waiter is now about to contend
         thread::sleep(Duration::from_millis(10));
         panic!("cancelled mid-computation")
      }))
   };

   let computing = {
      let cell = Arc::clone(&cell);
      thread::spawn(move || cell.get().map(|v| *v))
   };
   let waiter = {
      let cell = Arc::clone(&cell);
      let gate = Arc::clone(&gate);
      thread::spawn(move || {
         gate.wait();
         cell.get().map(|v| *v)
      })
   };

   assert!(computing.join().is_err()); // panicked with the original payload
   let error = waiter.join().unwrap().unwrap_err();
   assert!(matches!(error, LazyError::Failed(_)));
   assert!(error
      .cause()
      .downcast_ref::<ProducerPanicked>()
      .is_some());
}

#[test]
fn test_into_value_moves_the_value_out() {
   let cell = lazy(|| "owned".to_string());
   assert_eq!(cell.into_value().unwrap(), "owned");

   let cell = Lazy::with_value(5);
   assert_eq!(cell.into_value().unwrap(), 5);

   let cell: Lazy<i32> = Lazy::fallible(|| Err("nope".into()));
   assert!(cell.into_value().is_err());
}

#[test]
#[should_panic(expected = "actualization failed")]
fn test_force_panics_on_a_failed_cell() {
   let cell: Lazy<i32> = Lazy::fallible(|| Err("dead".into()));
   let _ = cell.get();
   cell.force();
}

#[test]
fn test_from_value_and_default() {
   let cell = Lazy::from(3);
   assert!(cell.is_actualized());
   assert_eq!(cell.get().unwrap(), &3);

   let cell: Lazy<Vec<i32>> = Lazy::default();
   assert!(!cell.is_actualized());
   assert_eq!(cell.get().unwrap(), &Vec::<i32>::new());
}

#[test]
fn test_debug_does_not_force() {
   let cell = lazy(|| 1);
   assert_eq!(format!("{cell:?}"), "Lazy(<unset>)");
   assert!(!cell.is_actualized());

   cell.actualize().unwrap();
   assert_eq!(format!("{cell:?}"), "Lazy(1)");
}

#[test]
fn test_producer_is_dropped_after_the_attempt() {
   struct DropProbe(Arc<AtomicUsize>);
   impl Drop for DropProbe {
      fn drop(&mut self) {
         self.0.fetch_add(1, Ordering::SeqCst);
      }
   }

   let drops = Arc::new(AtomicUsize::new(0));
   let probe = DropProbe(Arc::clone(&drops));
   let cell = lazy(move || {
      let _keep = &probe;
      11
   });

   assert_eq!(drops.load(Ordering::SeqCst), 0);
   cell.actualize().unwrap();
   // The producer (and the resources it captured) is gone, even though the
   // cell itself is still alive.
   assert_eq!(drops.load(Ordering::SeqCst), 1);
   assert_eq!(cell.get().unwrap(), &11);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_async_runs_the_producer_once() {
   let counter = Arc::new(AtomicUsize::new(0));
   let counter_clone = Arc::clone(&counter);
   let cell = Arc::new(lazy(move || {
      counter_clone.fetch_add(1, Ordering::SeqCst);
      42
   }));

   let tasks: Vec<_> = (0..8)
      .map(|_| {
         let cell = Arc::clone(&cell);
         tokio::spawn(async move { *cell.get_async().await.unwrap() })
      })
      .collect();

   for task in tasks {
      assert_eq!(task.await.unwrap(), 42);
   }
   assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_actualize_async_reports_the_original_failure_once() {
   let cell: Lazy<i32> = Lazy::fallible(|| Err("async boom".into()));

   assert!(matches!(
      cell.actualize_async().await,
      Err(LazyError::Producer(_))
   ));
   assert!(cell.actualize_async().await.is_ok());
   assert!(matches!(cell.get_async().await, Err(LazyError::Failed(_))));
}
