//! Registration reconciler: converges the registry's view of this device
//! with the actual device-local subscription state.
//!
//! The reconciler is driven by the registry's live snapshot feed, by
//! explicit user actions (enable/disable) and by the cached snapshot of
//! the last known local subscription. Every repair is idempotent: a pass
//! re-run on the snapshot produced by its own writes finds nothing left to
//! do, so the feed's echo after each write settles into a fixpoint instead
//! of looping. No locks are taken across devices; conflicting writes
//! self-correct on the next pass.

use super::capability::{enable_route, DeviceProfile, EnableRoute};
use super::registry::{RegistrationPatch, RegistrationRegistry, RegistryError, RegistrySnapshot};
use super::types::{
    IdentityKey, NewRegistration, RegistrationRecord, RegistrationStatus, TransportBinding,
    WebPushSubscription,
};
use crate::cache::{clear_cached_subscription, read_cached_subscription, SubscriptionCache};
use crate::transport::{
    DeliveryTokenService, PushTransport, TransportError, TransportGrant, TransportKind,
};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Tunables for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Origin that registrations created by this device are attributed to.
    pub host: String,
    /// Records confirmed live longer ago than this are refreshed.
    pub staleness_threshold: chrono::Duration,
    /// Upper bound on one web transport create/refresh call, including the
    /// service worker wait and the permission prompt.
    pub transport_timeout: std::time::Duration,
    /// MARKED_FOR_DELETION records untouched for longer than this may be
    /// removed by any device; the owner is presumed gone.
    pub tombstone_expiry: chrono::Duration,
}

impl ReconcilerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            staleness_threshold: chrono::Duration::hours(24),
            transport_timeout: std::time::Duration::from_secs(15),
            tombstone_expiry: chrono::Duration::days(90),
        }
    }
}

/// The most significant thing a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassAction {
    /// Nothing needed repair; the derived stores were updated.
    Settled,
    /// Completed the deletion of a record another device had marked.
    ReapedMarkedRecord,
    /// Refreshed a record past the staleness threshold.
    Refreshed,
    /// Deleted the record of a subscription revoked outside the app.
    RemovedStaleRecord,
    /// Deleted marked records whose owning device never came back.
    ExpiredTombstones(usize),
}

/// What one reconciliation pass did. The orphan teardown does not end a
/// pass, so it can accompany any action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub action: PassAction,
    pub orphan_torn_down: bool,
}

/// User-facing result of an enable attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    /// Notifications are now enabled on this device.
    Enabled,
    /// A registration for this device already existed; nothing was
    /// created. Not an error for the end user.
    AlreadyEnabled,
    /// The device needs a guided action first (e.g. installing the site to
    /// the home screen); show the setup guide instead of registering.
    GuidedSetup,
    /// This device cannot support push at all.
    Unsupported,
}

#[derive(Debug, Error)]
pub enum EnableError {
    /// Permission was refused; the caller renders platform-specific
    /// instructions to reset it.
    #[error("notification permission was denied")]
    PermissionDenied,
    #[error(transparent)]
    Transport(TransportError),
    #[error("failed to store the registration: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum DisableError {
    #[error("the delivery token could not be revoked")]
    TokenRevocationFailed,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

struct ReconcilerState {
    /// Latest snapshot delivered by the feed.
    snapshot: RegistrySnapshot,
    /// Whether any snapshot has arrived yet.
    loaded: bool,
    /// Identity created by a just-finished enable that the feed has not
    /// echoed back yet. Guards near-simultaneous enable attempts.
    recently_created: Option<IdentityKey>,
}

/// The per-device registration state machine.
///
/// One reconciler exists per authenticated session. Feed-triggered passes
/// are serialized: the state lock guarantees no two passes interleave, and
/// user actions serialize against passes at the registry-write step.
pub struct Reconciler {
    registry: Arc<dyn RegistrationRegistry>,
    transport: Arc<dyn PushTransport>,
    delivery: Arc<dyn DeliveryTokenService>,
    cache: Arc<dyn SubscriptionCache>,
    profile: DeviceProfile,
    user_id: String,
    config: ReconcilerConfig,
    state: Mutex<ReconcilerState>,
    visible_tx: watch::Sender<Vec<RegistrationRecord>>,
    enabled_tx: watch::Sender<bool>,
    loaded_tx: watch::Sender<bool>,
    enabling_tx: watch::Sender<bool>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn RegistrationRegistry>,
        transport: Arc<dyn PushTransport>,
        delivery: Arc<dyn DeliveryTokenService>,
        cache: Arc<dyn SubscriptionCache>,
        profile: DeviceProfile,
        user_id: impl Into<String>,
        config: ReconcilerConfig,
    ) -> Self {
        let (visible_tx, _) = watch::channel(Vec::new());
        let (enabled_tx, _) = watch::channel(false);
        let (loaded_tx, _) = watch::channel(false);
        let (enabling_tx, _) = watch::channel(false);
        Self {
            registry,
            transport,
            delivery,
            cache,
            profile,
            user_id: user_id.into(),
            config,
            state: Mutex::new(ReconcilerState {
                snapshot: Vec::new(),
                loaded: false,
                recently_created: None,
            }),
            visible_tx,
            enabled_tx,
            loaded_tx,
            enabling_tx,
        }
    }

    pub fn registry(&self) -> &Arc<dyn RegistrationRegistry> {
        &self.registry
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The user's registrations as shown in the UI. Records marked for
    /// deletion are an implementation detail and never appear here.
    pub fn visible_registrations(&self) -> watch::Receiver<Vec<RegistrationRecord>> {
        self.visible_tx.subscribe()
    }

    /// Whether notifications are currently enabled on this device.
    pub fn enabled_on_this_device(&self) -> watch::Receiver<bool> {
        self.enabled_tx.subscribe()
    }

    /// True once the first registry snapshot has been processed.
    pub fn loaded(&self) -> watch::Receiver<bool> {
        self.loaded_tx.subscribe()
    }

    /// Raised while an enable attempt is in flight; drives a progress
    /// indicator.
    pub fn enabling(&self) -> watch::Receiver<bool> {
        self.enabling_tx.subscribe()
    }

    /// Whether the user has or had notifications enabled on any device.
    /// Counts records marked for deletion too: their device was enabled
    /// and has not completed its cleanup yet.
    pub async fn enabled_somewhere(&self) -> bool {
        let state = self.state.lock().await;
        if !state.loaded {
            log::warn!(
                "Querying registrations that haven't loaded yet; the answer may be incomplete"
            );
        }
        !state.snapshot.is_empty()
    }

    /// Reset the derived stores to their unloaded defaults (logout).
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.snapshot.clear();
        state.loaded = false;
        state.recently_created = None;
        let _ = self.visible_tx.send(Vec::new());
        let _ = self.enabled_tx.send(false);
        let _ = self.loaded_tx.send(false);
        let _ = self.enabling_tx.send(false);
    }

    /// Run one reconciliation pass over a registry snapshot.
    ///
    /// Passes never fail: transport and registry errors are logged and the
    /// loop keeps running for the lifetime of the session. Each mutating
    /// repair ends the pass early; the registry feed re-fires with the
    /// resulting state and the follow-up pass finds nothing further to do.
    pub async fn reconcile(&self, snapshot: RegistrySnapshot) -> PassOutcome {
        let mut state = self.state.lock().await;
        state.snapshot = snapshot.clone();
        // Once the feed has caught up with a record we just created, the
        // enable race guard has served its purpose.
        let caught_up = state
            .recently_created
            .as_ref()
            .map(|identity| snapshot.iter().any(|r| r.identity() == *identity))
            .unwrap_or(false);
        if caught_up {
            state.recently_created = None;
        }

        let mut outcome = PassOutcome {
            action: PassAction::Settled,
            orphan_torn_down: false,
        };

        let probe = self.transport.current_subscription().await;
        let local_identity = probe.identity();
        let current_web_sub = probe.web_subscription().cloned();

        if let Some(local_identity) = &local_identity {
            let linked = snapshot.iter().find(|r| r.identity() == *local_identity);
            match linked {
                None if current_web_sub.is_some() => {
                    // The record backing this local subscription was deleted
                    // behind our back, so the subscription is unusable.
                    // Tear it down and do not create a replacement.
                    log::warn!(
                        "Local push subscription has no registry record; tearing it down"
                    );
                    let cleared = self.transport.teardown().await;
                    if !cleared {
                        log::warn!("Orphaned local push subscription was not cleared");
                    }
                    outcome.orphan_torn_down = true;
                }
                None => {}
                Some(record) if record.is_marked_for_deletion() => {
                    // Another device asked for this registration's removal;
                    // we are the device that can actually perform it.
                    match self.disable_record(record).await {
                        Ok(()) => log::info!(
                            "Completed the deletion of registration {} marked by another device",
                            record.id
                        ),
                        Err(e) => log::warn!(
                            "Failed to complete the deletion of registration {}: {}",
                            record.id,
                            e
                        ),
                    }
                    outcome.action = PassAction::ReapedMarkedRecord;
                    return outcome;
                }
                Some(record) if self.is_stale(record) => {
                    match self.refresh(record).await {
                        Ok(()) => log::info!("Refreshed registration {}", record.id),
                        Err(e) => {
                            log::warn!("Failed to refresh registration {}: {}", record.id, e)
                        }
                    }
                    outcome.action = PassAction::Refreshed;
                    return outcome;
                }
                Some(_) => {}
            }
        }

        // Silent external unsubscribe: the cache says this device held a
        // subscription that the browser no longer reports. Only a definite
        // probe can judge divergence; an unavailable one proves nothing.
        if probe.is_definite() {
            if let Some(cached) = read_cached_subscription(self.cache.as_ref()) {
                let cached_endpoint = cached.subscription.endpoint;
                let diverged = current_web_sub
                    .as_ref()
                    .map(|s| s.endpoint != cached_endpoint)
                    .unwrap_or(true);
                if diverged {
                    let stale = snapshot
                        .iter()
                        .find(|r| r.identity() == IdentityKey::Endpoint(cached_endpoint.clone()));
                    if let Some(record) = stale {
                        // The cached subscription still has a registry
                        // record, meaning a local unsubscribe happened
                        // without us being notified. The record is
                        // unusable regardless of its status.
                        log::info!(
                            "Removing registration {} for a subscription revoked outside the app",
                            record.id
                        );
                        match self.registry.delete(&record.id).await {
                            Ok(()) => clear_cached_subscription(self.cache.as_ref()),
                            Err(e) => log::warn!(
                                "Failed to remove invalidated registration {}: {}",
                                record.id,
                                e
                            ),
                        }
                        outcome.action = PassAction::RemovedStaleRecord;
                        return outcome;
                    }
                }
            }
        }

        // Marked records whose owning device never came back to finish the
        // teardown. The token is long dead; remove them from any device.
        let now = Utc::now();
        let expired: Vec<&RegistrationRecord> = snapshot
            .iter()
            .filter(|r| {
                r.is_marked_for_deletion() && now - r.refreshed_at > self.config.tombstone_expiry
            })
            .collect();
        if !expired.is_empty() {
            for record in &expired {
                log::info!(
                    "Expiring registration {} marked for deletion since {}",
                    record.id,
                    record.refreshed_at
                );
                if let Err(e) = self.registry.delete(&record.id).await {
                    log::warn!("Failed to expire registration {}: {}", record.id, e);
                }
            }
            outcome.action = PassAction::ExpiredTombstones(expired.len());
            return outcome;
        }

        // Nothing to repair: publish the user-facing view.
        self.publish(&mut state, &snapshot, local_identity.as_ref(), &current_web_sub);
        outcome
    }

    /// Enable notifications on this device.
    ///
    /// Capability-gates first; devices needing user intervention get the
    /// guided-setup outcome without any registration attempt. On success a
    /// new ACTIVE record exists for this device's identity, unless one
    /// already did.
    pub async fn enable(&self) -> Result<EnableOutcome, EnableError> {
        match enable_route(&self.profile) {
            EnableRoute::Unsupported => return Ok(EnableOutcome::Unsupported),
            EnableRoute::GuidedSetup => return Ok(EnableOutcome::GuidedSetup),
            EnableRoute::Proceed => {}
        }

        let _ = self.enabling_tx.send(true);
        let result = self.enable_inner().await;
        let _ = self.enabling_tx.send(false);
        if let Err(e) = &result {
            log::warn!("There was an error in enabling notifications: {}", e);
        }
        result
    }

    async fn enable_inner(&self) -> Result<EnableOutcome, EnableError> {
        let grant = match self.create_or_refresh_bounded().await {
            Ok(grant) => grant,
            Err(TransportError::NoSupport) => return Ok(EnableOutcome::Unsupported),
            Err(TransportError::PermissionDenied) => return Err(EnableError::PermissionDenied),
            Err(e) => return Err(EnableError::Transport(e)),
        };
        let identity = grant.binding.identity();

        let mut state = self.state.lock().await;
        if !state.loaded {
            log::warn!(
                "Enabling notifications before the registration feed has delivered a snapshot; \
                 duplicate detection may be incomplete"
            );
        }

        // Race guard: another surface of this user may have registered the
        // same identity while we were waiting on the transport.
        let already_registered = state.recently_created.as_ref() == Some(&identity)
            || state.snapshot.iter().any(|r| r.identity() == identity);
        if already_registered {
            log::warn!("A registration for this device already exists; not creating another");
            return Ok(EnableOutcome::AlreadyEnabled);
        }

        // App-reinstall edge case: the backend handed out a token that still
        // belongs to a record with another device id. Update that record in
        // place instead of duplicating it.
        if let TransportBinding::Native { .. } = &grant.binding {
            let collided = state
                .snapshot
                .iter()
                .find(|r| {
                    matches!(r.binding, TransportBinding::Native { .. })
                        && r.delivery_token == grant.delivery_token
                })
                .cloned();
            if let Some(existing) = collided {
                log::info!(
                    "Delivery token of registration {} reissued to this device; updating it",
                    existing.id
                );
                self.registry
                    .update(
                        &existing.id,
                        RegistrationPatch {
                            binding: Some(grant.binding.clone()),
                            user_agent: Some(self.profile.user_agent_summary(self.transport.kind())),
                            status: Some(RegistrationStatus::Active),
                            touch_refreshed_at: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                state.recently_created = Some(identity);
                return Ok(EnableOutcome::Enabled);
            }
        }

        self.registry
            .create(
                &self.user_id,
                NewRegistration {
                    delivery_token: grant.delivery_token,
                    binding: grant.binding,
                    user_agent: self.profile.user_agent_summary(self.transport.kind()),
                    host: self.config.host.clone(),
                },
            )
            .await?;
        state.recently_created = Some(identity);
        log::info!("Notifications enabled on this device");
        Ok(EnableOutcome::Enabled)
    }

    /// Disable the given registration.
    ///
    /// When its identity matches this device's current local identity the
    /// teardown happens here: token revocation, local unsubscribe, then
    /// record deletion. Otherwise the record is only marked for deletion
    /// and the matching device completes the removal on its next pass —
    /// convergence through shared state, no cross-device calls.
    pub async fn disable(&self, record: &RegistrationRecord) -> Result<(), DisableError> {
        self.disable_record(record).await
    }

    async fn disable_record(&self, record: &RegistrationRecord) -> Result<(), DisableError> {
        let probe = self.transport.current_subscription().await;
        let owns_local_state = probe
            .identity()
            .map(|identity| identity == record.identity())
            .unwrap_or(false);

        if !owns_local_state {
            log::info!(
                "Marking registration {} for deletion; its own device will complete the removal",
                record.id
            );
            self.registry
                .update(
                    &record.id,
                    RegistrationPatch {
                        status: Some(RegistrationStatus::MarkedForDeletion),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(());
        }

        if !self.delivery.revoke_token(&record.delivery_token).await {
            log::warn!(
                "Failed to revoke the delivery token of registration {}",
                record.id
            );
            return Err(DisableError::TokenRevocationFailed);
        }
        if !self.transport.teardown().await {
            // The platform state was already gone or refused to clear; the
            // registry record must still go.
            log::warn!("Local push subscription was not cleared during teardown");
        }
        self.registry.delete(&record.id).await?;
        log::info!("Notifications disabled for registration {}", record.id);
        Ok(())
    }

    /// Re-obtain the delivery token and subscription payload and write
    /// them back with a fresh `refreshedAt`. Token and payload should not
    /// have changed in the happy path, but both can.
    async fn refresh(&self, record: &RegistrationRecord) -> Result<(), EnableError> {
        let grant = match self.create_or_refresh_bounded().await {
            Ok(grant) => grant,
            Err(TransportError::PermissionDenied) => return Err(EnableError::PermissionDenied),
            Err(e) => return Err(EnableError::Transport(e)),
        };
        self.registry
            .update(
                &record.id,
                RegistrationPatch {
                    delivery_token: Some(grant.delivery_token),
                    binding: Some(grant.binding),
                    // A refreshable registration is live again, whatever
                    // error state it was in before.
                    status: Some(RegistrationStatus::Active),
                    touch_refreshed_at: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    fn is_stale(&self, record: &RegistrationRecord) -> bool {
        record.is_active() && Utc::now() - record.refreshed_at > self.config.staleness_threshold
    }

    async fn create_or_refresh_bounded(&self) -> Result<TransportGrant, TransportError> {
        match self.transport.kind() {
            // The web path can hang on the service worker; bound the whole
            // attempt. Native registration is callback-driven and prompts
            // at OS pace.
            TransportKind::Web => {
                match tokio::time::timeout(
                    self.config.transport_timeout,
                    self.transport.create_or_refresh(),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Failed(
                        "registering for push timed out".to_string(),
                    )),
                }
            }
            TransportKind::Native => self.transport.create_or_refresh().await,
        }
    }

    fn publish(
        &self,
        state: &mut ReconcilerState,
        snapshot: &[RegistrationRecord],
        local_identity: Option<&IdentityKey>,
        current_web_sub: &Option<WebPushSubscription>,
    ) {
        let visible: Vec<RegistrationRecord> = snapshot
            .iter()
            .filter(|r| !r.is_marked_for_deletion())
            .cloned()
            .collect();

        let enabled = match self.transport.kind() {
            TransportKind::Web => current_web_sub.is_some(),
            TransportKind::Native => local_identity
                .map(|identity| {
                    visible
                        .iter()
                        .any(|r| r.is_active() && r.identity() == *identity)
                })
                .unwrap_or(false),
        };

        state.loaded = true;
        let _ = self.visible_tx.send(visible);
        let _ = self.enabled_tx.send(enabled);
        let _ = self.loaded_tx.send(true);
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("user_id", &self.user_id)
            .field("host", &self.config.host)
            .finish()
    }
}
