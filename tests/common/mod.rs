//! Shared fakes and builders for the reconciler integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenstay_push::registration::{
    BrowserFamily, DeviceProfile, FeedGuard, InMemoryRegistry, NewRegistration, OsFamily,
    Reconciler, ReconcilerConfig, RegistrationPatch, RegistrationRecord, RegistrationRegistry,
    RegistrationStatus, RegistryError, RegistrySnapshot, TransportBinding, UserAgentSummary,
    WebPushKeys, WebPushSubscription,
};
use greenstay_push::transport::{
    BrowserPush, DeliveryTokenService, DeviceIdentityProvider, NativePushApi, NativePushTransport,
    PendingRegistration, PermissionState, TransportError, WebPushTransport,
};
use greenstay_push::MemoryCache;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

pub const USER: &str = "user-1";
pub const HOST: &str = "greenstay.example";
pub const ENDPOINT: &str = "https://push.example.com/sub/1";

pub fn subscription(endpoint: &str) -> WebPushSubscription {
    WebPushSubscription {
        endpoint: endpoint.to_string(),
        keys: WebPushKeys {
            p256dh: "test-p256dh".to_string(),
            auth: "test-auth".to_string(),
        },
    }
}

pub fn web_record(
    id: &str,
    endpoint: &str,
    token: &str,
    refreshed_at: DateTime<Utc>,
    status: RegistrationStatus,
) -> RegistrationRecord {
    RegistrationRecord {
        id: id.to_string(),
        delivery_token: token.to_string(),
        binding: TransportBinding::Web {
            subscription: subscription(endpoint),
        },
        user_agent: UserAgentSummary::default(),
        host: HOST.to_string(),
        created_at: refreshed_at,
        refreshed_at,
        status,
    }
}

pub fn native_record(
    id: &str,
    device_id: &str,
    token: &str,
    refreshed_at: DateTime<Utc>,
    status: RegistrationStatus,
) -> RegistrationRecord {
    RegistrationRecord {
        id: id.to_string(),
        delivery_token: token.to_string(),
        binding: TransportBinding::Native {
            device_id: device_id.to_string(),
        },
        user_agent: UserAgentSummary::default(),
        host: HOST.to_string(),
        created_at: refreshed_at,
        refreshed_at,
        status,
    }
}

/// Registry decorator counting mutating calls, for the idempotency
/// properties.
pub struct CountingRegistry {
    pub inner: InMemoryRegistry,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingRegistry {
    pub fn new() -> Self {
        Self {
            inner: InMemoryRegistry::new(),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> RegistrySnapshot {
        self.inner.records(USER)
    }
}

#[async_trait]
impl RegistrationRegistry for CountingRegistry {
    async fn create(
        &self,
        user_id: &str,
        registration: NewRegistration,
    ) -> Result<String, RegistryError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(user_id, registration).await
    }

    async fn update(&self, id: &str, patch: RegistrationPatch) -> Result<(), RegistryError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(id, patch).await
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    fn subscribe(
        &self,
        user_id: &str,
        feed: mpsc::UnboundedSender<RegistrySnapshot>,
    ) -> FeedGuard {
        self.inner.subscribe(user_id, feed)
    }
}

/// Browser fake with scriptable subscription state and call counters.
pub struct FakeBrowser {
    pub has_api: bool,
    pub deny_subscribe: bool,
    pub permission: Mutex<PermissionState>,
    pub subscription: Mutex<Option<WebPushSubscription>>,
    pub next_endpoint: Mutex<String>,
    pub subscribe_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            has_api: true,
            deny_subscribe: false,
            permission: Mutex::new(PermissionState::Prompt),
            subscription: Mutex::new(None),
            next_endpoint: Mutex::new(ENDPOINT.to_string()),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_subscription(self, endpoint: &str) -> Self {
        *self.subscription.lock().unwrap() = Some(subscription(endpoint));
        *self.permission.lock().unwrap() = PermissionState::Granted;
        self
    }

    pub fn current_endpoint(&self) -> Option<String> {
        self.subscription
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.endpoint.clone())
    }
}

#[async_trait]
impl BrowserPush for FakeBrowser {
    fn has_push_api(&self) -> bool {
        self.has_api
    }

    fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn service_worker_ready(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn get_subscription(&self) -> Result<Option<WebPushSubscription>, TransportError> {
        Ok(self.subscription.lock().unwrap().clone())
    }

    async fn subscribe(&self) -> Result<WebPushSubscription, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_subscribe {
            *self.permission.lock().unwrap() = PermissionState::Denied;
            return Err(TransportError::PermissionDenied);
        }
        *self.permission.lock().unwrap() = PermissionState::Granted;
        let subscription = subscription(&self.next_endpoint.lock().unwrap());
        *self.subscription.lock().unwrap() = Some(subscription.clone());
        Ok(subscription)
    }

    async fn unsubscribe(&self) -> Result<bool, TransportError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.subscription.lock().unwrap().take().is_some())
    }
}

/// Delivery backend fake: mints a fresh token per call, records
/// revocations.
pub struct FakeDelivery {
    pub revoke_ok: bool,
    pub minted: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
}

impl FakeDelivery {
    pub fn new() -> Self {
        Self {
            revoke_ok: true,
            minted: AtomicUsize::new(0),
            revoked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DeliveryTokenService for FakeDelivery {
    async fn get_or_refresh_token(
        &self,
        _subscription: &WebPushSubscription,
    ) -> Result<String, TransportError> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{}", n))
    }

    async fn revoke_token(&self, token: &str) -> bool {
        self.revoked.lock().unwrap().push(token.to_string());
        self.revoke_ok
    }
}

/// Native OS push fake.
pub struct FakeNativeApi {
    pub permission: Mutex<PermissionState>,
    pub token: String,
    pub unregister_calls: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
}

impl FakeNativeApi {
    pub fn granted(token: &str) -> Self {
        Self {
            permission: Mutex::new(PermissionState::Granted),
            token: token.to_string(),
            unregister_calls: AtomicUsize::new(0),
            revoked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NativePushApi for FakeNativeApi {
    async fn check_permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionState {
        *self.permission.lock().unwrap() = PermissionState::Granted;
        PermissionState::Granted
    }

    fn register(&self) -> PendingRegistration {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(self.token.clone()));
        PendingRegistration::new(rx, || {})
    }

    async fn unregister(&self) -> Result<(), TransportError> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DeliveryTokenService for FakeNativeApi {
    async fn get_or_refresh_token(
        &self,
        _subscription: &WebPushSubscription,
    ) -> Result<String, TransportError> {
        Ok(self.token.clone())
    }

    async fn revoke_token(&self, token: &str) -> bool {
        self.revoked.lock().unwrap().push(token.to_string());
        true
    }
}

pub struct FixedDevice(pub Option<String>);

impl DeviceIdentityProvider for FixedDevice {
    fn device_id(&self) -> Option<String> {
        self.0.clone()
    }
}

pub fn web_profile() -> DeviceProfile {
    DeviceProfile {
        is_native_app: false,
        os: OsFamily::Android,
        browser: BrowserFamily::Chrome,
        os_version: None,
        has_notification_api: true,
        has_service_worker_api: true,
        device_vendor: None,
        device_model: None,
    }
}

pub fn native_profile() -> DeviceProfile {
    DeviceProfile {
        is_native_app: true,
        os: OsFamily::Android,
        browser: BrowserFamily::Other,
        os_version: None,
        has_notification_api: false,
        has_service_worker_api: false,
        device_vendor: Some("Fairphone".to_string()),
        device_model: Some("FP3".to_string()),
    }
}

/// Everything a web-device test needs, wired together.
pub struct WebHarness {
    pub registry: Arc<CountingRegistry>,
    pub browser: Arc<FakeBrowser>,
    pub delivery: Arc<FakeDelivery>,
    pub cache: Arc<MemoryCache>,
    pub reconciler: Arc<Reconciler>,
}

pub fn web_harness(browser: FakeBrowser) -> WebHarness {
    web_harness_full(browser, FakeDelivery::new(), web_profile())
}

pub fn web_harness_full(
    browser: FakeBrowser,
    delivery: FakeDelivery,
    profile: DeviceProfile,
) -> WebHarness {
    let registry = Arc::new(CountingRegistry::new());
    let browser = Arc::new(browser);
    let delivery = Arc::new(delivery);
    let cache = Arc::new(MemoryCache::new());
    let transport = Arc::new(WebPushTransport::new(
        browser.clone(),
        delivery.clone(),
        cache.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        transport,
        delivery.clone(),
        cache.clone(),
        profile,
        USER,
        ReconcilerConfig::new(HOST),
    ));
    WebHarness {
        registry,
        browser,
        delivery,
        cache,
        reconciler,
    }
}

/// Everything a native-device test needs, wired together.
pub struct NativeHarness {
    pub registry: Arc<CountingRegistry>,
    pub api: Arc<FakeNativeApi>,
    pub cache: Arc<MemoryCache>,
    pub reconciler: Arc<Reconciler>,
}

pub fn native_harness(api: FakeNativeApi, device_id: &str) -> NativeHarness {
    let registry = Arc::new(CountingRegistry::new());
    let api = Arc::new(api);
    let cache = Arc::new(MemoryCache::new());
    let transport = Arc::new(NativePushTransport::new(
        api.clone(),
        Arc::new(FixedDevice(Some(device_id.to_string()))),
    ));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        transport,
        api.clone(),
        cache.clone(),
        native_profile(),
        USER,
        ReconcilerConfig::new(HOST),
    ));
    NativeHarness {
        registry,
        api,
        cache,
        reconciler,
    }
}
