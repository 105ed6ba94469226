//! Push-notification registration lifecycle.
//!
//! Keeps the set of ACTIVE registration records accurately reflecting
//! reachable, working local subscriptions, self-healing divergence without
//! manual intervention and without two devices racing to create duplicate
//! records for the same endpoint.

pub mod capability;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod types;

pub use capability::{
    can_gain_push_support, enable_route, has_push_support_now, is_excluded_class, BrowserFamily,
    DeviceProfile, EnableRoute, OsFamily,
};
pub use reconciler::{
    DisableError, EnableError, EnableOutcome, PassAction, PassOutcome, Reconciler,
    ReconcilerConfig,
};
pub use registry::{
    FeedGuard, InMemoryRegistry, RegistrationPatch, RegistrationRegistry, RegistryError,
    RegistrySnapshot,
};
pub use session::NotificationSession;
pub use types::{
    IdentityKey, NewRegistration, RegistrationRecord, RegistrationStatus, TransportBinding,
    UserAgentSummary, WebPushKeys, WebPushSubscription,
};
