//! Shared state handed to every HTTP handler.

use crate::services::storage_service::StorageService;
use std::{sync::Arc, time::Duration};

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,

    /// Shared secret required to upload. Empty means uploads are open.
    pub upload_token: Arc<[u8]>,

    /// Lifetime applied when an upload names none or an unusable one.
    pub default_lifetime: Duration,
}

impl AppState {
    pub fn new(storage: StorageService, upload_token: &str, default_lifetime: Duration) -> Self {
        Self {
            storage,
            upload_token: Arc::from(upload_token.as_bytes()),
            default_lifetime,
        }
    }
}
