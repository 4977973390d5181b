//! Lazily-initialized shared dependencies.
//!
//! Heavy collaborators (embedding model, language model client) are
//! constructed at most once, on first use, through a single
//! initialization path. The outcome is cached either way: a failed
//! initialization replays the same error to every later caller until
//! [`Lazy::reset`] clears the slot, so a misconfigured dependency fails
//! consistently instead of retrying on every request.

use crate::error::{QaError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

type Factory<T> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Arc<T>>> + Send>> + Send + Sync>;

type Slot<T> = Option<std::result::Result<Arc<T>, Arc<QaError>>>;

/// A once-only async initializer with failure caching.
pub struct Lazy<T: ?Sized> {
    factory: Factory<T>,
    slot: Mutex<Slot<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Lazy<T> {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>>> + Send + 'static,
    {
        Lazy {
            factory: Box::new(move || Box::pin(factory())),
            slot: Mutex::new(None),
        }
    }

    /// Wrap an already-constructed value; `get` never runs a factory.
    pub fn ready(value: Arc<T>) -> Self {
        Lazy {
            factory: Box::new(move || {
                let value = value.clone();
                Box::pin(async move { Ok(value) })
            }),
            slot: Mutex::new(None),
        }
    }

    /// Return the shared value, running the factory on first call.
    ///
    /// The lock is held across the factory future, so concurrent first
    /// callers serialize and exactly one initialization runs.
    pub async fn get(&self) -> Result<Arc<T>> {
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            *slot = Some((self.factory)().await.map_err(Arc::new));
        }
        match &*slot {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(QaError::Shared(error.clone())),
            None => unreachable!("slot populated above"),
        }
    }

    /// Drop the cached outcome so the next `get` re-runs the factory.
    pub async fn reset(&self) {
        *self.slot.lock().await = None;
    }

    pub async fn is_initialized(&self) -> bool {
        matches!(&*self.slot.lock().await, Some(Ok(_)))
    }
}

impl<T: ?Sized> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_factory_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lazy: Lazy<u32> = Lazy::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(42))
            }
        });

        assert!(!lazy.is_initialized().await);
        assert_eq!(*lazy.get().await.unwrap(), 42);
        assert_eq!(*lazy.get().await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lazy.is_initialized().await);
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lazy: Lazy<u32> = Lazy::new(move || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    Err(QaError::model_unavailable("first attempt fails"))
                } else {
                    Ok(Arc::new(7))
                }
            }
        });

        // Both calls see the cached failure; the factory ran once.
        assert!(lazy.get().await.unwrap_err().is_model_unavailable());
        assert!(lazy.get().await.unwrap_err().is_model_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        lazy.reset().await;
        assert_eq!(*lazy.get().await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ready_skips_factory() {
        let lazy = Lazy::ready(Arc::new("preset".to_string()));
        assert_eq!(*lazy.get().await.unwrap(), "preset");
    }
}
