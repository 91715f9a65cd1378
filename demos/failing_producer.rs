use std::sync::Arc;

use lazy_once::{Lazy, LazyError};

fn main() {
   let cell: Arc<Lazy<String>> = Arc::new(Lazy::fallible(|| {
      println!("Attempting to produce...");
      Err("backend unreachable".into())
   }));

   // The call that runs the producer sees the original failure.
   match cell.get() {
      Err(LazyError::Producer(cause)) => println!("Computing call caught: {}", cause),
      other => panic!("expected the original failure, got {:?}", other),
   }

   // The failure is terminal; every later observer gets the derived error,
   // still carrying the recorded cause.
   match cell.get() {
      Err(error @ LazyError::Failed(_)) => {
         println!("Later observer caught: {}", error);
         println!("Recorded cause: {}", error.cause());
      }
      other => panic!("expected the derived failure, got {:?}", other),
   }

   assert!(cell.has_failed());
   assert!(cell.error().is_some());
}
