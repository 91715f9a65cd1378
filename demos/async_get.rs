use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_once::{lazy, Lazy};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
async fn main() {
   let config: Arc<Lazy<String>> = Arc::new(lazy(|| {
      COUNTER.fetch_add(1, Ordering::Relaxed);
      println!("Loading config...");
      std::thread::sleep(std::time::Duration::from_millis(25));
      "production".to_string()
   }));

   // Many tasks demand the cell; contenders yield to the runtime instead of
   // blocking a worker thread while one of them runs the producer.
   let tasks: Vec<_> = (0..4)
      .map(|i| {
         let config = Arc::clone(&config);
         tokio::spawn(async move {
            let value = config.get_async().await.unwrap().clone();
            println!("Task {} sees: {}", i, value);
         })
      })
      .collect();

   for task in tasks {
      task.await.unwrap();
   }

   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Producer ran only once
}
