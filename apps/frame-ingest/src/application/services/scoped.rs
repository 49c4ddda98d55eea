//! Explicit scoped release of a handle.
//!
//! Releasing is an async remote call, so it cannot happen in `Drop`. A
//! [`ScopedHandle`] must be released with [`ScopedHandle::release`]; one that
//! is dropped unreleased logs a warning and stays tracked, so the client
//! still releases it on `close`.

use std::future::Future;

use crate::application::ports::ClientError;
use crate::application::services::client::DatasetClient;
use crate::domain::handle::RemoteHandle;

/// A tracked handle bound to the scope that owns it.
#[derive(Debug)]
pub struct ScopedHandle<'a> {
    client: &'a DatasetClient,
    handle: RemoteHandle,
    released: bool,
}

impl<'a> ScopedHandle<'a> {
    /// Bind `handle` to a scope.
    #[must_use]
    pub const fn new(client: &'a DatasetClient, handle: RemoteHandle) -> Self {
        Self {
            client,
            handle,
            released: false,
        }
    }

    /// The wrapped handle.
    #[must_use]
    pub const fn handle(&self) -> &RemoteHandle {
        &self.handle
    }

    /// Release the handle on the engine.
    ///
    /// # Errors
    ///
    /// Returns the release error. The handle is untracked either way.
    pub async fn release(mut self) -> Result<(), ClientError> {
        self.released = true;
        self.client.drop_handle(&self.handle).await
    }
}

impl Drop for ScopedHandle<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                handle = %self.handle,
                "Scoped handle dropped without release; it will be released on close"
            );
        }
    }
}

impl DatasetClient {
    /// Run `body` with `handle`, then release the handle on every exit path
    /// of `body`. The body's result is returned; a release failure is
    /// returned only if the body succeeded.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or the release error.
    pub async fn with_scoped<T, F, Fut>(&self, handle: RemoteHandle, body: F) -> Result<T, ClientError>
    where
        F: FnOnce(RemoteHandle) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let scoped = ScopedHandle::new(self, handle);
        let result = body(scoped.handle().clone()).await;
        let released = scoped.release().await;
        let value = result?;
        released?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::ports::MockRemoteEngine;
    use crate::application::services::client::ClientOptions;

    fn engine_with_one_handle() -> MockRemoteEngine {
        let mut engine = MockRemoteEngine::new();
        engine
            .expect_read()
            .returning(|_, _| Ok(RemoteHandle::new("h1")));
        engine.expect_drop_handle().times(1).returning(|_| Ok(()));
        engine
    }

    #[tokio::test]
    async fn released_after_body_error() {
        let client = DatasetClient::new(Arc::new(engine_with_one_handle()), ClientOptions::default());
        let handle = client.read_remote("a", &[]).await.unwrap();

        let result: Result<(), _> = client
            .with_scoped(handle.clone(), |_| async { Err(ClientError::Remote("boom".into())) })
            .await;

        assert!(matches!(result, Err(ClientError::Remote(_))));
        assert!(!client.is_tracked(&handle));
    }

    #[tokio::test]
    async fn explicit_release_untracks() {
        let client = DatasetClient::new(Arc::new(engine_with_one_handle()), ClientOptions::default());
        let handle = client.read_remote("a", &[]).await.unwrap();

        let scoped = ScopedHandle::new(&client, handle.clone());
        scoped.release().await.unwrap();
        assert!(client.active_handles().is_empty());
    }

    #[tokio::test]
    async fn unreleased_scope_stays_tracked() {
        let mut engine = MockRemoteEngine::new();
        engine
            .expect_read()
            .returning(|_, _| Ok(RemoteHandle::new("h1")));
        let client = DatasetClient::new(Arc::new(engine), ClientOptions::default());
        let handle = client.read_remote("a", &[]).await.unwrap();

        drop(ScopedHandle::new(&client, handle.clone()));
        assert!(client.is_tracked(&handle));
    }
}
