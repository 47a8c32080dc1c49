//! In-memory and caching tenant stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchboard::credentials::{
    CachingTenantStore, EncryptedChannelConfig, InMemoryTenantStore, StoreError,
    TenantConfigStore,
};
use switchboard::types::{Channel, TenantId};

fn config(account: &str) -> EncryptedChannelConfig {
    EncryptedChannelConfig {
        enabled: true,
        account_id: account.to_owned(),
        access_token_ciphertext: "ciphertext".to_owned(),
    }
}

struct CountingStore {
    inner: InMemoryTenantStore,
    lookups: AtomicUsize,
}

impl CountingStore {
    fn new(inner: InMemoryTenantStore) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantConfigStore for CountingStore {
    async fn channel_config(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<EncryptedChannelConfig>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.channel_config(tenant_id, channel).await
    }
}

#[tokio::test]
async fn in_memory_store_is_keyed_by_tenant_and_channel() {
    let store = InMemoryTenantStore::new();
    let t1 = TenantId::new("t1");
    store.upsert(t1.clone(), Channel::WhatsApp, config("1099")).await;

    let hit = store
        .channel_config(&t1, Channel::WhatsApp)
        .await
        .expect("lookup");
    let other_channel = store
        .channel_config(&t1, Channel::Messenger)
        .await
        .expect("lookup");
    let other_tenant = store
        .channel_config(&TenantId::new("t2"), Channel::WhatsApp)
        .await
        .expect("lookup");

    assert_eq!(hit.map(|c| c.account_id), Some("1099".to_owned()));
    assert!(other_channel.is_none());
    assert!(other_tenant.is_none());
}

#[tokio::test]
async fn remove_reports_whether_a_record_existed() {
    let store = InMemoryTenantStore::new();
    let t1 = TenantId::new("t1");
    store.upsert(t1.clone(), Channel::Instagram, config("1784")).await;

    assert!(store.remove(&t1, Channel::Instagram).await);
    assert!(!store.remove(&t1, Channel::Instagram).await);
}

#[test]
fn debug_hides_ciphertext() {
    let rendered = format!("{:?}", config("page-1"));
    assert!(rendered.contains("page-1"));
    assert!(!rendered.contains("ciphertext\""));
    assert!(rendered.contains("[REDACTED]"));
}

#[tokio::test(start_paused = true)]
async fn cache_serves_until_ttl_expires() {
    let backing = InMemoryTenantStore::new();
    let t1 = TenantId::new("t1");
    backing.upsert(t1.clone(), Channel::Messenger, config("page-1")).await;
    let counting = Arc::new(CountingStore::new(backing.clone()));
    let cache = CachingTenantStore::new(Arc::clone(&counting), Duration::from_secs(30));

    cache.channel_config(&t1, Channel::Messenger).await.expect("lookup");
    cache.channel_config(&t1, Channel::Messenger).await.expect("lookup");
    assert_eq!(counting.lookups(), 1);

    backing.upsert(t1.clone(), Channel::Messenger, config("page-2")).await;
    tokio::time::advance(Duration::from_secs(31)).await;

    let refreshed = cache
        .channel_config(&t1, Channel::Messenger)
        .await
        .expect("lookup");
    assert_eq!(counting.lookups(), 2);
    assert_eq!(refreshed.map(|c| c.account_id), Some("page-2".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn invalidation_forces_a_fresh_lookup() {
    let backing = InMemoryTenantStore::new();
    let t1 = TenantId::new("t1");
    backing.upsert(t1.clone(), Channel::WhatsApp, config("1099")).await;
    backing.upsert(t1.clone(), Channel::Instagram, config("1784")).await;
    let counting = Arc::new(CountingStore::new(backing.clone()));
    let cache = CachingTenantStore::new(Arc::clone(&counting), Duration::from_secs(300));

    cache.channel_config(&t1, Channel::WhatsApp).await.expect("lookup");
    cache.channel_config(&t1, Channel::Instagram).await.expect("lookup");
    backing.upsert(t1.clone(), Channel::WhatsApp, config("2000")).await;

    cache.invalidate(&t1, Channel::WhatsApp).await;
    let whatsapp = cache
        .channel_config(&t1, Channel::WhatsApp)
        .await
        .expect("lookup");
    assert_eq!(whatsapp.map(|c| c.account_id), Some("2000".to_owned()));
    assert_eq!(counting.lookups(), 3);

    cache.invalidate_tenant(&t1).await;
    cache.channel_config(&t1, Channel::Instagram).await.expect("lookup");
    assert_eq!(counting.lookups(), 4);
}

#[tokio::test(start_paused = true)]
async fn missing_records_are_cached_too() {
    let counting = Arc::new(CountingStore::new(InMemoryTenantStore::new()));
    let cache = CachingTenantStore::new(Arc::clone(&counting), Duration::from_secs(30));
    let t9 = TenantId::new("t9");

    assert!(cache.channel_config(&t9, Channel::WhatsApp).await.expect("lookup").is_none());
    assert!(cache.channel_config(&t9, Channel::WhatsApp).await.expect("lookup").is_none());
    assert_eq!(counting.lookups(), 1);
}
