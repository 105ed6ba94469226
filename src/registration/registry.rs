//! Registration registry client: CRUD plus a live full-snapshot feed over
//! one user's registration records.
//!
//! The feed delivers the full current snapshot (not a diff) on every
//! change, including changes caused by this process itself. The reconciler
//! relies on that echo to settle into a fixpoint after its own writes.

use super::types::{
    transition_status, NewRegistration, RegistrationRecord, RegistrationStatus, StatusTransitionError,
    TransportBinding, UserAgentSummary,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// The full current set of a user's registration records.
pub type RegistrySnapshot = Vec<RegistrationRecord>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry write rejected: {0}")]
    WriteRejected(String),
    #[error("no registration with id {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidTransition(#[from] StatusTransitionError),
}

/// Partial update of a registration record. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct RegistrationPatch {
    pub delivery_token: Option<String>,
    pub binding: Option<TransportBinding>,
    pub user_agent: Option<UserAgentSummary>,
    pub status: Option<RegistrationStatus>,
    /// Stamp `refreshedAt` with the registry's current time. The stored
    /// value never moves backwards.
    pub touch_refreshed_at: bool,
}

/// Detaches a live feed subscription when dropped, or explicitly via
/// [`FeedGuard::detach`].
pub struct FeedGuard {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedGuard {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Stop the feed now instead of waiting for drop.
    pub fn detach(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// Durable, queryable, subscribable store of registration records, scoped
/// to the authenticated user.
#[async_trait]
pub trait RegistrationRegistry: Send + Sync {
    /// Create a record for the user. Returns the registry-assigned id.
    async fn create(
        &self,
        user_id: &str,
        registration: NewRegistration,
    ) -> Result<String, RegistryError>;

    /// Apply a partial update to a record.
    async fn update(&self, id: &str, patch: RegistrationPatch) -> Result<(), RegistryError>;

    /// Physically remove a record. Deleting an id that no longer exists is
    /// a no-op, so concurrent reapers cannot fail each other.
    async fn delete(&self, id: &str) -> Result<(), RegistryError>;

    /// Subscribe to live snapshots of the user's records. The current
    /// snapshot is delivered immediately, then again on every change.
    fn subscribe(&self, user_id: &str, feed: mpsc::UnboundedSender<RegistrySnapshot>) -> FeedGuard;
}

struct Feed {
    id: u64,
    user_id: String,
    sender: mpsc::UnboundedSender<RegistrySnapshot>,
}

#[derive(Default)]
struct RegistryInner {
    /// Record id -> (owning user id, record)
    records: HashMap<String, (String, RegistrationRecord)>,
    feeds: Vec<Feed>,
    next_feed_id: u64,
}

impl RegistryInner {
    fn snapshot_for(&self, user_id: &str) -> RegistrySnapshot {
        let mut records: Vec<RegistrationRecord> = self
            .records
            .values()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, record)| record.clone())
            .collect();
        // Stable order keeps snapshots comparable across passes
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn broadcast(&mut self, user_id: &str) {
        let snapshot = self.snapshot_for(user_id);
        self.feeds.retain(|feed| {
            if feed.user_id != user_id {
                return true;
            }
            feed.sender.send(snapshot.clone()).is_ok()
        });
    }
}

/// In-memory registry, used in development and by the test suite.
///
/// Enforces the invariants the production backend applies with security
/// rules: the ACTIVE -> MARKED_FOR_DELETION one-way status transition and
/// a monotonically non-decreasing `refreshedAt`.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed record, as another device would have created
    /// it. Used to mirror multi-device situations.
    pub fn seed(&self, user_id: &str, record: RegistrationRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .records
            .insert(record.id.clone(), (user_id.to_string(), record));
        inner.broadcast(user_id);
    }

    /// The user's current records, for inspection.
    pub fn records(&self, user_id: &str) -> RegistrySnapshot {
        self.inner.lock().unwrap().snapshot_for(user_id)
    }
}

#[async_trait]
impl RegistrationRegistry for InMemoryRegistry {
    async fn create(
        &self,
        user_id: &str,
        registration: NewRegistration,
    ) -> Result<String, RegistryError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = RegistrationRecord {
            id: id.clone(),
            delivery_token: registration.delivery_token,
            binding: registration.binding,
            user_agent: registration.user_agent,
            host: registration.host,
            created_at: now,
            refreshed_at: now,
            status: RegistrationStatus::Active,
        };

        let mut inner = self.inner.lock().unwrap();
        inner
            .records
            .insert(id.clone(), (user_id.to_string(), record));
        inner.broadcast(user_id);
        log::debug!("Created registration {} (total: {})", id, inner.records.len());
        Ok(id)
    }

    async fn update(&self, id: &str, patch: RegistrationPatch) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let (owner, record) = inner
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let owner = owner.clone();

        if let Some(status) = patch.status {
            record.status = transition_status(record.status, status)?;
        }
        if let Some(delivery_token) = patch.delivery_token {
            record.delivery_token = delivery_token;
        }
        if let Some(binding) = patch.binding {
            record.binding = binding;
        }
        if let Some(user_agent) = patch.user_agent {
            record.user_agent = user_agent;
        }
        if patch.touch_refreshed_at {
            record.refreshed_at = record.refreshed_at.max(Utc::now());
        }

        inner.broadcast(&owner);
        log::debug!("Updated registration {}", id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((owner, _)) = inner.records.remove(id) {
            inner.broadcast(&owner);
            log::debug!("Deleted registration {}", id);
        } else {
            log::debug!("Registration {} already deleted", id);
        }
        Ok(())
    }

    fn subscribe(&self, user_id: &str, feed: mpsc::UnboundedSender<RegistrySnapshot>) -> FeedGuard {
        let mut inner = self.inner.lock().unwrap();
        let feed_id = inner.next_feed_id;
        inner.next_feed_id += 1;

        // Deliver the current snapshot right away, like the live query of
        // the production backend does.
        let _ = feed.send(inner.snapshot_for(user_id));
        inner.feeds.push(Feed {
            id: feed_id,
            user_id: user_id.to_string(),
            sender: feed,
        });

        let registry = self.inner.clone();
        FeedGuard::new(move || {
            registry.lock().unwrap().feeds.retain(|f| f.id != feed_id);
        })
    }
}
