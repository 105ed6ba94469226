//! Web push transport: browser Push API, service worker and delivery
//! backend wiring.

use crate::cache::{write_cached_subscription, CachedSubscription, SubscriptionCache};
use crate::registration::types::{TransportBinding, WebPushSubscription};
use crate::transport::{
    DeliveryTokenService, PermissionState, PushTransport, SubscriptionProbe, TransportError,
    TransportGrant, TransportKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// How long to wait for the service worker before giving up. The ready
/// promise may never resolve in some browser/dev-server combinations.
pub const SERVICE_WORKER_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Browser-side push primitives, implemented by the webview bridge of the
/// application shell.
#[async_trait]
pub trait BrowserPush: Send + Sync {
    /// Whether the Notification and Service Worker APIs are exposed at all.
    fn has_push_api(&self) -> bool;

    /// Current notification permission state.
    fn permission(&self) -> PermissionState;

    /// Resolves once the service worker is active. Callers must bound the
    /// wait; see [`SERVICE_WORKER_READY_TIMEOUT`].
    async fn service_worker_ready(&self) -> Result<(), TransportError>;

    /// The current push subscription, if any. May report an empty
    /// subscription object on some platforms; callers normalize.
    async fn get_subscription(&self) -> Result<Option<WebPushSubscription>, TransportError>;

    /// Create a push subscription, prompting for permission when it is not
    /// decided yet. Fails with [`TransportError::PermissionDenied`] on
    /// refusal.
    async fn subscribe(&self) -> Result<WebPushSubscription, TransportError>;

    /// Remove the current push subscription. Returns whether one was
    /// removed.
    async fn unsubscribe(&self) -> Result<bool, TransportError>;
}

/// Web push adapter.
///
/// Identity of a web registration is the subscription endpoint URL, which
/// stays stable while the delivery token rotates. After every successful
/// create/refresh the adapter snapshots the subscription into the local
/// cache so a later pass can detect out-of-band revocation.
pub struct WebPushTransport {
    browser: Arc<dyn BrowserPush>,
    delivery: Arc<dyn DeliveryTokenService>,
    cache: Arc<dyn SubscriptionCache>,
    ready_timeout: Duration,
}

impl WebPushTransport {
    pub fn new(
        browser: Arc<dyn BrowserPush>,
        delivery: Arc<dyn DeliveryTokenService>,
        cache: Arc<dyn SubscriptionCache>,
    ) -> Self {
        Self {
            browser,
            delivery,
            cache,
            ready_timeout: SERVICE_WORKER_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    async fn ready(&self) -> Result<(), TransportError> {
        match timeout(self.ready_timeout, self.browser.service_worker_ready()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Failed(
                "service worker was not ready within the timeout".to_string(),
            )),
        }
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Web
    }

    async fn create_or_refresh(&self) -> Result<TransportGrant, TransportError> {
        if !self.browser.has_push_api() {
            return Err(TransportError::NoSupport);
        }
        if self.browser.permission() == PermissionState::Denied {
            // Permission was blocked earlier; prompting again is futile and
            // the caller needs the distinguishable kind for its guidance.
            return Err(TransportError::PermissionDenied);
        }
        self.ready().await?;

        let existing =
            WebPushSubscription::normalize(self.browser.get_subscription().await?);
        let subscription = match existing {
            Some(subscription) => subscription,
            None => self.browser.subscribe().await?,
        };

        let delivery_token = self.delivery.get_or_refresh_token(&subscription).await?;

        let snapshot = CachedSubscription {
            delivery_token: delivery_token.clone(),
            subscription: subscription.clone(),
        };
        if let Err(e) = write_cached_subscription(self.cache.as_ref(), &snapshot) {
            log::warn!("Failed to persist the subscription cache snapshot: {}", e);
        }

        Ok(TransportGrant {
            delivery_token,
            binding: TransportBinding::Web { subscription },
        })
    }

    async fn current_subscription(&self) -> SubscriptionProbe {
        if !self.browser.has_push_api() {
            return SubscriptionProbe::Unavailable;
        }
        if self.ready().await.is_err() {
            log::warn!("Service worker not ready; local subscription state is unknown");
            return SubscriptionProbe::Unavailable;
        }
        match self.browser.get_subscription().await {
            Ok(subscription) => match WebPushSubscription::normalize(subscription) {
                Some(subscription) => {
                    SubscriptionProbe::Present(TransportBinding::Web { subscription })
                }
                None => SubscriptionProbe::Missing,
            },
            Err(e) => {
                log::warn!("Failed to read the local push subscription: {}", e);
                SubscriptionProbe::Unavailable
            }
        }
    }

    async fn teardown(&self) -> bool {
        if !self.browser.has_push_api() {
            return false;
        }
        if self.ready().await.is_err() {
            return false;
        }
        match self.browser.get_subscription().await {
            Ok(Some(_)) => match self.browser.unsubscribe().await {
                Ok(cleared) => {
                    if cleared {
                        log::info!("Local push subscription successfully unsubscribed");
                    } else {
                        log::warn!("Local push subscription was not cleared by the browser");
                    }
                    cleared
                }
                Err(e) => {
                    log::warn!("Error while unsubscribing the local push subscription: {}", e);
                    false
                }
            },
            Ok(None) => {
                log::debug!("No local push subscription to unsubscribe");
                false
            }
            Err(e) => {
                log::warn!("Could not read the local push subscription for teardown: {}", e);
                false
            }
        }
    }
}
