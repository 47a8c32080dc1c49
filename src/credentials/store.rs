//! Tenant configuration store seam.
//!
//! The store is a read-only lookup owned by another service. Records hold
//! ciphertext only; decryption happens in the resolver on every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{Channel, TenantId};

/// Store access failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing store could not answer.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Encrypted per-(tenant, channel) configuration record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChannelConfig {
    /// Channel disabled by the tenant; treated as not configured.
    pub enabled: bool,
    /// Platform account: phone number id, page id or Instagram account id.
    pub account_id: String,
    /// Encrypted access token, see [`super::cipher`].
    pub access_token_ciphertext: String,
}

impl std::fmt::Debug for EncryptedChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedChannelConfig")
            .field("enabled", &self.enabled)
            .field("account_id", &self.account_id)
            .field("access_token_ciphertext", &"[REDACTED]")
            .finish()
    }
}

/// Read-only lookup of tenant channel configuration.
#[async_trait]
pub trait TenantConfigStore: Send + Sync {
    /// Fetch the record for exactly this tenant and channel.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing store cannot be queried.
    async fn channel_config(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<EncryptedChannelConfig>, StoreError>;
}

#[async_trait]
impl<T: TenantConfigStore + ?Sized> TenantConfigStore for Arc<T> {
    async fn channel_config(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<EncryptedChannelConfig>, StoreError> {
        (**self).channel_config(tenant_id, channel).await
    }
}

type RecordKey = (TenantId, Channel);

/// In-memory store for embedding and tests.
#[derive(Clone, Default)]
pub struct InMemoryTenantStore {
    records: Arc<RwLock<HashMap<RecordKey, EncryptedChannelConfig>>>,
}

impl InMemoryTenantStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub async fn upsert(&self, tenant_id: TenantId, channel: Channel, config: EncryptedChannelConfig) {
        self.records.write().await.insert((tenant_id, channel), config);
    }

    /// Remove a record, returning whether one existed.
    pub async fn remove(&self, tenant_id: &TenantId, channel: Channel) -> bool {
        self.records
            .write()
            .await
            .remove(&(tenant_id.clone(), channel))
            .is_some()
    }
}

#[async_trait]
impl TenantConfigStore for InMemoryTenantStore {
    async fn channel_config(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<EncryptedChannelConfig>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&(tenant_id.clone(), channel)).cloned())
    }
}

/// Opt-in TTL cache in front of another store.
///
/// Only encrypted records are cached. The tenant-configuration-update path
/// must call [`CachingTenantStore::invalidate`] or
/// [`CachingTenantStore::invalidate_tenant`] so a reconfiguration is seen on
/// the next send.
pub struct CachingTenantStore<S> {
    inner: S,
    ttl: Duration,
    entries: RwLock<HashMap<RecordKey, (Instant, Option<EncryptedChannelConfig>)>>,
}

impl<S: TenantConfigStore> CachingTenantStore<S> {
    /// Wrap `inner`, keeping lookups for at most `ttl`.
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached record for one tenant and channel.
    pub async fn invalidate(&self, tenant_id: &TenantId, channel: Channel) {
        self.entries
            .write()
            .await
            .remove(&(tenant_id.clone(), channel));
    }

    /// Drop every cached record of a tenant.
    pub async fn invalidate_tenant(&self, tenant_id: &TenantId) {
        self.entries
            .write()
            .await
            .retain(|(cached_tenant, _), _| cached_tenant != tenant_id);
    }
}

#[async_trait]
impl<S: TenantConfigStore> TenantConfigStore for CachingTenantStore<S> {
    async fn channel_config(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<EncryptedChannelConfig>, StoreError> {
        let key = (tenant_id.clone(), channel);
        if let Some((stored_at, record)) = self.entries.read().await.get(&key) {
            if stored_at.elapsed() < self.ttl {
                return Ok(record.clone());
            }
        }

        let record = self.inner.channel_config(tenant_id, channel).await?;
        debug!(tenant_id = %tenant_id, channel = %channel, "refreshed cached channel config");
        self.entries
            .write()
            .await
            .insert(key, (Instant::now(), record.clone()));
        Ok(record)
    }
}
