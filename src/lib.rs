//! Push-notification registration lifecycle for the Greenstay community
//! travel-hosting app.
//!
//! A per-device notification subscription spans three independently
//! failing systems: the browser/OS push primitive, the push-delivery
//! backend, and the durable registry of registrations. This crate keeps
//! them consistent under multi-device use, partial failures, stale or
//! duplicate tokens, and revocation performed outside the app — by
//! reconciling local device state against the shared registry on every
//! live-feed snapshot, with idempotent repairs instead of locks or
//! cross-device calls.
//!
//! The crate is a library driven from application lifecycle hooks:
//! construct a [`registration::Reconciler`] with the platform collaborators,
//! wrap it in a [`registration::NotificationSession`] at login, and call
//! `enable`/`disable` from the user's notification toggles.

// Module declarations
pub mod cache;
pub mod registration;
pub mod transport;

pub use cache::{
    read_cached_subscription, CacheError, CachedSubscription, FileSubscriptionCache, MemoryCache,
    SubscriptionCache,
};
pub use registration::{
    DeviceProfile, EnableOutcome, InMemoryRegistry, NotificationSession, Reconciler,
    ReconcilerConfig, RegistrationRecord, RegistrationRegistry, RegistrationStatus,
};
pub use transport::{
    BrowserPush, DeliveryTokenService, DeviceIdentityProvider, NativePushApi, NativePushTransport,
    PermissionState, PushTransport, SubscriptionProbe, TransportError, TransportGrant,
    TransportKind, WebPushTransport,
};
