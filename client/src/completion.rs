//! Single-shot completion handle for callback-driven sources
//!
//! A callback backend may hold several clones of the handle (success,
//! failure, availability lost). The first `complete` wins; every later call
//! is rejected and reported as `false`.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub struct Completion<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

/// Create a completion handle and the receiver awaiting it
pub fn completion<T>() -> (Completion<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            sender: Arc::new(Mutex::new(Some(tx))),
        },
        rx,
    )
}

impl<T> Completion<T> {
    /// Deliver the result. Returns `false` if a result was already delivered.
    pub fn complete(&self, value: T) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            // A dropped receiver still consumes the slot
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self.sender.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let (done, rx) = completion::<u32>();
        let failure_path = done.clone();

        assert!(!done.is_completed());
        assert!(done.complete(7));
        assert!(!failure_path.complete(9));
        assert!(!done.complete(11));
        assert!(failure_path.is_completed());

        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_completion_from_another_task() {
        let (done, rx) = completion::<&'static str>();

        let handle = tokio::spawn(async move { done.complete("fix") });

        assert_eq!(rx.await.unwrap(), "fix");
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropping_all_handles_closes_receiver() {
        let (done, rx) = completion::<u8>();
        drop(done);
        assert!(rx.await.is_err());
    }
}
