//! Push transport adapters: the device-local side of a registration.
//!
//! A device runs exactly one transport — web push in a browser, native
//! push inside the app shell. Both expose the same three operations so the
//! reconciler stays transport-agnostic.

pub mod delivery;
pub mod native;
pub mod web;

pub use delivery::DeliveryTokenService;
pub use native::{DeviceIdentityProvider, NativePushApi, NativePushTransport, PendingRegistration};
pub use web::{BrowserPush, WebPushTransport};

use crate::registration::types::{IdentityKey, TransportBinding, WebPushSubscription};
use async_trait::async_trait;
use thiserror::Error;

/// Browser/OS notification permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; requesting will prompt the user.
    Prompt,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The platform lacks push capability entirely. Not retried.
    #[error("push notifications are not supported on this platform")]
    NoSupport,
    /// The user or OS refused notification permission. Not retried
    /// automatically.
    #[error("notification permission was denied")]
    PermissionDenied,
    /// Transient lower-level failure (network, service worker not ready,
    /// OS registration error). Safe to retry on the next explicit user
    /// action or scheduled refresh.
    #[error("push transport failure: {0}")]
    Failed(String),
}

/// Which transport variant an adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Web,
    Native,
}

/// A successfully created or refreshed device-local subscription.
#[derive(Debug, Clone)]
pub struct TransportGrant {
    /// Routing credential issued by the push-delivery backend
    pub delivery_token: String,
    /// The record payload describing the local subscription
    pub binding: TransportBinding,
}

/// Result of probing the current device-local subscription state.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionProbe {
    /// The platform cannot report a subscription state right now
    /// (no push APIs, or the service worker never became ready). Distinct
    /// from [`SubscriptionProbe::Missing`]: repairs that rely on knowing
    /// the definite local state must not run on this answer.
    Unavailable,
    /// Push is supported and definitely no local subscription exists.
    Missing,
    /// A local subscription (web) or a resolved device identity (native).
    Present(TransportBinding),
}

impl SubscriptionProbe {
    pub fn binding(&self) -> Option<&TransportBinding> {
        match self {
            SubscriptionProbe::Present(binding) => Some(binding),
            SubscriptionProbe::Unavailable | SubscriptionProbe::Missing => None,
        }
    }

    pub fn identity(&self) -> Option<IdentityKey> {
        self.binding().map(TransportBinding::identity)
    }

    /// The local web subscription, when one exists.
    pub fn web_subscription(&self) -> Option<&WebPushSubscription> {
        match self.binding() {
            Some(TransportBinding::Web { subscription }) => Some(subscription),
            _ => None,
        }
    }

    /// Whether the probe reported a definite local state. Only then can
    /// divergence against the cached snapshot be judged.
    pub fn is_definite(&self) -> bool {
        !matches!(self, SubscriptionProbe::Unavailable)
    }
}

/// Device-local push subscription lifecycle, polymorphic over web and
/// native push.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Which transport this adapter drives.
    fn kind(&self) -> TransportKind;

    /// Establish or refresh the device-local subscription and obtain a
    /// delivery token, requesting platform permission when needed.
    async fn create_or_refresh(&self) -> Result<TransportGrant, TransportError>;

    /// Probe the current device-local subscription state. Never fails;
    /// indeterminate states degrade to [`SubscriptionProbe::Unavailable`].
    async fn current_subscription(&self) -> SubscriptionProbe;

    /// Best-effort local unsubscribe. Returns whether platform-level state
    /// was actually cleared; internal errors degrade to `false`.
    async fn teardown(&self) -> bool;
}
