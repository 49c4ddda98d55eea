//! Optional process-wide default client.
//!
//! Code that has a [`DatasetClient`] should pass it explicitly. This holder
//! exists for call sites that cannot, and has an explicit install/teardown.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::ClientError;
use crate::application::services::client::{CloseReport, DatasetClient};

static DEFAULT_CLIENT: RwLock<Option<Arc<DatasetClient>>> = parking_lot::const_rwlock(None);

/// Make `client` the default, returning the one it replaces.
pub fn install(client: Arc<DatasetClient>) -> Option<Arc<DatasetClient>> {
    DEFAULT_CLIENT.write().replace(client)
}

/// The installed default.
///
/// # Errors
///
/// Returns [`ClientError::NoDefaultClient`] if none is installed.
pub fn get() -> Result<Arc<DatasetClient>, ClientError> {
    DEFAULT_CLIENT
        .read()
        .as_ref()
        .map(Arc::clone)
        .ok_or(ClientError::NoDefaultClient)
}

/// Uninstall the default and close it.
pub async fn teardown() -> Option<CloseReport> {
    let client = DEFAULT_CLIENT.write().take()?;
    Some(client.close().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockRemoteEngine;
    use crate::application::services::client::ClientOptions;

    #[tokio::test]
    async fn install_get_teardown() {
        let mut engine = MockRemoteEngine::new();
        engine.expect_disconnect().return_const(());
        let client = Arc::new(DatasetClient::new(Arc::new(engine), ClientOptions::default()));

        assert!(install(Arc::clone(&client)).is_none());
        assert_eq!(get().unwrap().session(), client.session());

        let report = teardown().await;
        assert_eq!(report, Some(CloseReport::default()));
        assert!(matches!(get(), Err(ClientError::NoDefaultClient)));
        assert!(client.is_closed());
    }
}
