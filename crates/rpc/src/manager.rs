//! Per-device cache of session clients.
//!
//! [`ConnectionCache::get`] hands out one shared [`RpcClient`] per device
//! for as long as the device's connection key (address and credentials)
//! stays the same. When the key changes the stale client is replaced and
//! closed in the background. Timezone changes are applied in place since
//! they do not affect the session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use camview_core::device::DeviceIdentity;
use camview_core::types::DbId;
use camview_events::{DeviceEvent, EventBus, Subscription};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::{ClientConfig, RpcClient};
use crate::transport::Connector;

/// Time allowed for a single client to log out while closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Device {0} not found")]
    DeviceNotFound(DbId),

    #[error("Device registry error: {0}")]
    Registry(String),
}

/// Source of current device identities.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn identity(&self, device_id: DbId) -> Result<Option<DeviceIdentity>, CacheError>;
}

pub struct ConnectionCache {
    registry: Arc<dyn DeviceRegistry>,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    events: Option<Arc<EventBus>>,
    clients: Mutex<HashMap<DbId, Arc<RpcClient>>>,
    /// Serializes load-compare-replace per device.
    device_locks: Mutex<HashMap<DbId, Arc<Mutex<()>>>>,
    closing: TaskTracker,
}

impl ConnectionCache {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            config,
            events: None,
            clients: Mutex::new(HashMap::new()),
            device_locks: Mutex::new(HashMap::new()),
            closing: TaskTracker::new(),
        }
    }

    /// Clients created from now on publish their errors to `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Client for `device_id`, created or replaced as needed.
    pub async fn get(&self, device_id: DbId) -> Result<Arc<RpcClient>, CacheError> {
        let lock = self.device_lock(device_id).await;
        let _guard = lock.lock().await;

        let identity = self
            .registry
            .identity(device_id)
            .await?
            .ok_or(CacheError::DeviceNotFound(device_id))?;
        let key = identity.connection_key();

        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(&device_id) {
            if *existing.connection_key() == key {
                if existing.timezone() != identity.timezone {
                    existing.set_timezone(identity.timezone);
                }
                return Ok(Arc::clone(existing));
            }
        }

        let client = Arc::new(self.build(&identity));
        if let Some(stale) = clients.insert(device_id, Arc::clone(&client)) {
            tracing::info!(device_id, "Device connection changed, replacing client");
            self.close_in_background(stale);
        } else {
            tracing::debug!(device_id, "Created device client");
        }
        Ok(client)
    }

    /// Re-check a device after its registry entry changed.
    ///
    /// Drops the client when the device is gone or its connection key
    /// changed; otherwise only the timezone is refreshed.
    pub async fn refresh(&self, device_id: DbId) -> Result<(), CacheError> {
        let lock = self.device_lock(device_id).await;
        let _guard = lock.lock().await;

        let identity = self.registry.identity(device_id).await?;
        let mut clients = self.clients.lock().await;
        let Some(existing) = clients.get(&device_id) else {
            return Ok(());
        };

        match identity {
            Some(identity) if *existing.connection_key() == identity.connection_key() => {
                existing.set_timezone(identity.timezone);
            }
            _ => {
                if let Some(stale) = clients.remove(&device_id) {
                    tracing::info!(device_id, "Dropping stale device client");
                    self.close_in_background(stale);
                }
            }
        }
        Ok(())
    }

    /// Remove and close the client for `device_id`. Returns whether one was cached.
    pub async fn delete(&self, device_id: DbId) -> bool {
        let removed = {
            let lock = self.device_lock(device_id).await;
            let _guard = lock.lock().await;
            self.clients.lock().await.remove(&device_id)
        };
        self.forget_lock(device_id).await;

        match removed {
            Some(client) => {
                close_client(client).await;
                true
            }
            None => false,
        }
    }

    /// Close every cached client concurrently, then wait for background closes.
    pub async fn close_all(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().map(|(_, c)| c).collect();
        self.device_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);

        tracing::info!(count = clients.len(), "Closing device clients");
        futures::future::join_all(clients.into_iter().map(close_client)).await;
        self.wait_pending_closes().await;
    }

    /// Wait until every background close started so far has finished.
    pub async fn wait_pending_closes(&self) {
        self.closing.close();
        self.closing.wait().await;
        self.closing.reopen();
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub async fn contains(&self, device_id: DbId) -> bool {
        self.clients.lock().await.contains_key(&device_id)
    }

    /// Drop cached clients when devices are updated or deleted, until cancelled.
    pub async fn run_invalidation(
        &self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => event,
            };

            match event {
                Some(DeviceEvent::Updated { device_id }) => {
                    if let Err(e) = self.refresh(device_id).await {
                        tracing::warn!(device_id, error = %e, "Failed to refresh device client");
                    }
                }
                Some(DeviceEvent::Deleted { device_id }) => {
                    self.delete(device_id).await;
                }
                Some(_) => {}
                None => break,
            }
        }
        tracing::debug!("Connection cache invalidation stopped");
    }

    fn build(&self, identity: &DeviceIdentity) -> RpcClient {
        let transport = self.connector.connect(identity);
        let client = RpcClient::new(identity, transport, self.config.clone());
        match &self.events {
            Some(bus) => client.with_events(Arc::clone(bus)),
            None => client,
        }
    }

    async fn device_lock(&self, device_id: DbId) -> Arc<Mutex<()>> {
        let mut locks = self.device_locks.lock().await;
        Arc::clone(locks.entry(device_id).or_default())
    }

    /// Drop the device's lock entry unless a caller still holds a handle to it.
    ///
    /// Handles are only cloned under the map lock, so a count of one here
    /// means nobody can be waiting on it.
    async fn forget_lock(&self, device_id: DbId) {
        let mut locks = self.device_locks.lock().await;
        if locks
            .get(&device_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&device_id);
        }
    }

    fn close_in_background(&self, client: Arc<RpcClient>) {
        self.closing.spawn(close_client(client));
    }
}

async fn close_client(client: Arc<RpcClient>) {
    let device_id = client.device_id();
    match tokio::time::timeout(CLOSE_TIMEOUT, client.close()).await {
        Ok(Ok(())) => tracing::debug!(device_id, "Closed device client"),
        Ok(Err(e)) => tracing::warn!(device_id, error = %e, "Device logout failed"),
        Err(_) => tracing::warn!(device_id, "Device logout timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionState;
    use crate::testing::{FakeConnector, FakeDevice, StaticRegistry};
    use assert_matches::assert_matches;

    struct Fixture {
        device: Arc<FakeDevice>,
        registry: Arc<StaticRegistry>,
        connector: Arc<FakeConnector>,
        cache: Arc<ConnectionCache>,
    }

    fn identity(id: DbId, password: &str, tz: &str) -> DeviceIdentity {
        DeviceIdentity::new(id, "cam.test", "admin", password, tz).unwrap()
    }

    fn fixture() -> Fixture {
        let device = Arc::new(FakeDevice::new("admin", "secret"));
        let registry = Arc::new(StaticRegistry::new());
        registry.insert(identity(1, "secret", "UTC"));
        let connector = Arc::new(FakeConnector::new(Arc::clone(&device)));
        let cache = Arc::new(ConnectionCache::new(
            Arc::clone(&registry) as Arc<dyn DeviceRegistry>,
            Arc::clone(&connector) as Arc<dyn Connector>,
            ClientConfig::default(),
        ));
        Fixture {
            device,
            registry,
            connector,
            cache,
        }
    }

    #[tokio::test]
    async fn repeated_get_returns_same_client() {
        let f = fixture();
        let a = f.cache.get(1).await.unwrap();
        let b = f.cache.get(1).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(f.connector.connects(), 1);
    }

    #[tokio::test]
    async fn concurrent_gets_build_one_client() {
        let f = fixture();
        let gets = (0..20).map(|_| {
            let cache = Arc::clone(&f.cache);
            async move { cache.get(1).await.unwrap() }
        });
        let clients = futures::future::join_all(gets).await;

        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
        assert_eq!(f.connector.connects(), 1);
    }

    #[tokio::test]
    async fn credential_change_replaces_and_closes_old_client_once() {
        let f = fixture();
        let old = f.cache.get(1).await.unwrap();
        old.connect().await.unwrap();

        f.registry.insert(identity(1, "rotated", "UTC"));
        f.device.set_password("rotated");
        let new = f.cache.get(1).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));

        f.cache.wait_pending_closes().await;
        assert_eq!(old.state().await, SessionState::Closed);
        assert_eq!(f.device.calls("global.logout"), 1);

        let again = f.cache.get(1).await.unwrap();
        assert!(Arc::ptr_eq(&new, &again));
        new.connect().await.unwrap();
    }

    #[tokio::test]
    async fn timezone_change_updates_client_in_place() {
        let f = fixture();
        let before = f.cache.get(1).await.unwrap();

        f.registry.insert(identity(1, "secret", "Asia/Tokyo"));
        let after = f.cache.get(1).await.unwrap();

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.timezone(), chrono_tz::Asia::Tokyo);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let f = fixture();
        assert_matches!(f.cache.get(42).await, Err(CacheError::DeviceNotFound(42)));
    }

    #[tokio::test]
    async fn delete_closes_cached_client() {
        let f = fixture();
        let client = f.cache.get(1).await.unwrap();
        client.connect().await.unwrap();

        assert!(f.cache.delete(1).await);
        assert!(!f.cache.delete(1).await);
        assert_eq!(client.state().await, SessionState::Closed);
        assert_eq!(f.device.calls("global.logout"), 1);
    }

    #[tokio::test]
    async fn delete_keeps_lock_of_inflight_get() {
        let f = fixture();
        f.cache.get(1).await.unwrap();

        // A concurrent `get` that has fetched the lock but not yet taken it.
        let inflight = f.cache.device_lock(1).await;
        assert!(f.cache.delete(1).await);
        assert!(Arc::ptr_eq(&inflight, &f.cache.device_lock(1).await));

        drop(inflight);
        f.cache.delete(1).await;
        assert!(!f.cache.device_locks.lock().await.contains_key(&1));
    }

    #[tokio::test]
    async fn close_all_empties_cache() {
        let f = fixture();
        f.registry.insert(identity(2, "secret", "UTC"));
        let a = f.cache.get(1).await.unwrap();
        let b = f.cache.get(2).await.unwrap();

        f.cache.close_all().await;

        assert!(f.cache.is_empty().await);
        assert_eq!(a.state().await, SessionState::Closed);
        assert_eq!(b.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn delete_event_drops_client() {
        let f = fixture();
        let bus = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();
        let watcher = {
            let cache = Arc::clone(&f.cache);
            let subscription = bus.subscribe();
            let cancel = cancel.clone();
            tokio::spawn(async move { cache.run_invalidation(subscription, cancel).await })
        };

        f.cache.get(1).await.unwrap();
        f.registry.remove(1);
        bus.publish(DeviceEvent::Deleted { device_id: 1 });

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.cache.contains(1).await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("client dropped after delete event");

        cancel.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn update_event_with_same_key_keeps_client() {
        let f = fixture();
        let client = f.cache.get(1).await.unwrap();

        f.registry.insert(identity(1, "secret", "Europe/Berlin"));
        f.cache.refresh(1).await.unwrap();

        assert!(f.cache.contains(1).await);
        assert_eq!(client.timezone(), chrono_tz::Europe::Berlin);

        f.registry.insert(identity(1, "other", "Europe/Berlin"));
        f.cache.refresh(1).await.unwrap();
        assert!(!f.cache.contains(1).await);
    }
}
