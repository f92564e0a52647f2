//! API shared state

use std::borrow::Cow;
use std::sync::Arc;

use ip_network::IpNetwork;

use super::error::{ApiError, ApiResult};
use crate::envelope::PrivateKey;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers and middleware
#[derive(Clone)]
pub struct ApiState {
    /// Metric store every route reads from or writes to
    pub storage: Arc<dyn StorageBackend>,

    /// HMAC secret for `HashSHA256` verification and response signing
    pub key: Option<Arc<str>>,

    /// Opens RSA-sealed JSON bodies
    pub private_key: Option<Arc<PrivateKey>>,

    /// Only requests whose `X-Real-IP` falls inside are accepted
    pub trusted_subnet: Option<IpNetwork>,
}

impl ApiState {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            key: None,
            private_key: None,
            trusted_subnet: None,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key.filter(|key| !key.is_empty()).map(Arc::from);
        self
    }

    pub fn with_private_key(mut self, private_key: Option<PrivateKey>) -> Self {
        self.private_key = private_key.map(Arc::new);
        self
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<IpNetwork>) -> Self {
        self.trusted_subnet = subnet;
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Open a sealed body when a private key is configured
    pub fn open<'a>(&self, body: &'a [u8]) -> ApiResult<Cow<'a, [u8]>> {
        match &self.private_key {
            Some(private_key) => private_key
                .open(body)
                .map(Cow::Owned)
                .map_err(|e| ApiError::InvalidRequest(e.to_string())),
            None => Ok(Cow::Borrowed(body)),
        }
    }
}
