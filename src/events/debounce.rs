use std::time::Duration;

use tokio::sync::mpsc;

/// Coalesces bursts of triggers into a single action.
///
/// The action runs once `window` has passed without a new trigger. Every trigger
/// inside the window restarts the wait. Dropping every clone of the debouncer
/// flushes a pending action and stops the background task.
#[derive(Clone)]
pub struct Debouncer {
  tx: mpsc::UnboundedSender<()>,
}

impl Debouncer {
  /// Spawn the debouncing task. Must be called from within a tokio runtime.
  pub fn spawn<F>(window: Duration, mut action: F) -> Self
  where
    F: FnMut() + Send + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
      while rx.recv().await.is_some() {
        loop {
          match tokio::time::timeout(window, rx.recv()).await {
            // Another trigger: restart the quiet period
            Ok(Some(())) => continue,
            Ok(None) | Err(_) => break,
          }
        }
        action();
      }
    });

    Self { tx }
  }

  pub fn trigger(&self) {
    // Ignore send errors - the task only stops once every sender is gone
    let _ = self.tx.send(());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn test_spaced_triggers_fire_separately() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let debouncer = Debouncer::spawn(Duration::from_millis(50), move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    debouncer.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;
    debouncer.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_trigger_no_action() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _debouncer = Debouncer::spawn(Duration::from_millis(50), move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }
}
