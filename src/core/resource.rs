use crate::core::scope::Scoped;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Builds and tears down one kind of external resource (pool, HTTP client, API client).
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Resource: Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource>;

    async fn teardown(&self, _resource: Arc<Self::Resource>) {}
}

/// Owns zero or one live resource built by `F`.
///
/// The slot lock is held while the resource is being constructed, so callers
/// racing on the first `acquire` all receive the same instance.
pub struct ResourceHandle<F: ResourceFactory> {
    factory: F,
    slot: Mutex<Option<Arc<F::Resource>>>,
}

impl<F: ResourceFactory> ResourceHandle<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Returns the live resource, creating it on first use.
    ///
    /// A failed construction leaves the handle unset so the next call retries.
    pub async fn acquire(&self) -> Result<Arc<F::Resource>> {
        let mut slot = self.slot.lock().await;
        if let Some(resource) = slot.as_ref() {
            return Ok(Arc::clone(resource));
        }

        let resource = Arc::new(self.factory.create().await?);
        *slot = Some(Arc::clone(&resource));
        Ok(resource)
    }

    /// Tears down the live resource, if any. Calling it again is a no-op.
    pub async fn release(&self) {
        let taken = self.slot.lock().await.take();
        if let Some(resource) = taken {
            self.factory.teardown(resource).await;
        }
    }

    pub async fn is_live(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// The live resource without creating one.
    pub async fn current(&self) -> Option<Arc<F::Resource>> {
        self.slot.lock().await.clone()
    }
}

#[async_trait]
impl<F: ResourceFactory> Scoped for ResourceHandle<F> {
    async fn enter(&self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    async fn exit(&self) {
        self.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::BizError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        torn_down: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ResourceFactory for Arc<CountingFactory> {
        type Resource = usize;

        async fn create(&self) -> Result<usize> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(BizError::config("factory failure"));
            }
            tokio::task::yield_now().await;
            Ok(self.created.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn teardown(&self, _resource: Arc<usize>) {
            self.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle() -> (Arc<CountingFactory>, ResourceHandle<Arc<CountingFactory>>) {
        let factory = Arc::new(CountingFactory::default());
        (Arc::clone(&factory), ResourceHandle::new(factory))
    }

    #[tokio::test]
    async fn test_second_acquire_reuses_instance() {
        let (factory, handle) = handle();

        let first = handle.acquire().await.unwrap();
        let second = handle.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(handle.is_live().await);
    }

    #[tokio::test]
    async fn test_release_without_acquire_is_noop() {
        let (factory, handle) = handle();

        handle.release().await;
        handle.release().await;

        assert_eq!(factory.torn_down.load(Ordering::SeqCst), 0);
        assert!(!handle.is_live().await);
    }

    #[tokio::test]
    async fn test_release_then_acquire_builds_new_instance() {
        let (factory, handle) = handle();

        let first = handle.acquire().await.unwrap();
        handle.release().await;
        handle.release().await;
        let second = handle.acquire().await.unwrap();

        assert_eq!(*first, 1);
        assert_eq!(*second, 2);
        assert_eq!(factory.torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_leaves_handle_unset() {
        let (factory, handle) = handle();
        factory.fail_next.store(true, Ordering::SeqCst);

        assert!(handle.acquire().await.is_err());
        assert!(handle.current().await.is_none());

        let resource = handle.acquire().await.unwrap();
        assert_eq!(*resource, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_acquire_constructs_once() {
        let (factory, handle) = handle();
        let handle = Arc::new(handle);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = Arc::clone(&handle);
                tokio::spawn(async move { handle.acquire().await.map(|r| *r) })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }
}
