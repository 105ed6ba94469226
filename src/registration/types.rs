//! Registration record types shared by the registry, the transports and
//! the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encryption keys of a browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPushKeys {
    /// The p256dh key for payload encryption
    pub p256dh: String,
    /// The auth secret
    pub auth: String,
}

/// Serialized browser push subscription.
///
/// The endpoint URL uniquely identifies a subscription and stays stable
/// across delivery-token rotations, so it doubles as the identity key of a
/// web registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPushSubscription {
    /// The push service endpoint URL
    pub endpoint: String,
    /// Encryption keys
    pub keys: WebPushKeys,
}

impl WebPushSubscription {
    /// Some platforms report an empty subscription object instead of none
    /// (observed on iOS Safari). Normalize those to `None`.
    pub fn normalize(subscription: Option<WebPushSubscription>) -> Option<WebPushSubscription> {
        subscription.filter(|s| !s.endpoint.is_empty())
    }
}

/// Lifecycle status of a registration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// A live registration. Does not guarantee that delivery still works.
    Active,
    /// Soft-deleted: no longer targeted for delivery, waiting for the
    /// device that can perform the local teardown to remove it physically.
    MarkedForDeletion,
}

#[derive(Debug, Error)]
pub enum StatusTransitionError {
    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: RegistrationStatus,
        to: RegistrationStatus,
    },
}

/// Validates a status change. The only real transition is
/// Active -> MarkedForDeletion; rewriting the same status is a no-op and
/// allowed.
pub fn can_transition(from: RegistrationStatus, to: RegistrationStatus) -> bool {
    match (from, to) {
        (a, b) if a == b => true,
        (RegistrationStatus::Active, RegistrationStatus::MarkedForDeletion) => true,
        _ => false,
    }
}

/// Validates and performs a status transition.
pub fn transition_status(
    current: RegistrationStatus,
    target: RegistrationStatus,
) -> Result<RegistrationStatus, StatusTransitionError> {
    if !can_transition(current, target) {
        return Err(StatusTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }
    Ok(target)
}

/// The value used to match a local subscription to its registry record:
/// the subscription endpoint URL for web, the OS device id for native.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    Endpoint(String),
    Device(String),
}

/// Transport-specific part of a registration record.
///
/// Web and native registrations share one registry collection; the
/// discriminator keeps the two shapes apart so consumers match
/// exhaustively instead of probing optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "camelCase")]
pub enum TransportBinding {
    /// Browser registration; identity is the subscription endpoint.
    #[serde(rename_all = "camelCase")]
    Web { subscription: WebPushSubscription },
    /// Native app registration; identity is the OS-issued device id.
    #[serde(rename_all = "camelCase")]
    Native { device_id: String },
}

impl TransportBinding {
    /// The identity key this binding contributes to its record.
    pub fn identity(&self) -> IdentityKey {
        match self {
            TransportBinding::Web { subscription } => {
                IdentityKey::Endpoint(subscription.endpoint.clone())
            }
            TransportBinding::Native { device_id } => IdentityKey::Device(device_id.clone()),
        }
    }
}

/// Coarse, privacy-preserving device description shown in the user's
/// registration list. Cosmetic only; never used for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentSummary {
    /// OS family name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Browser family name; absent for native registrations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

/// One durable registration: a device push endpoint (or native device id)
/// bound to a user, with lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    /// Registry-assigned identifier, stable for the record's life
    pub id: String,
    /// Opaque routing credential issued by the push-delivery backend;
    /// may be rotated on refresh
    pub delivery_token: String,
    /// Transport-specific payload and identity
    #[serde(flatten)]
    pub binding: TransportBinding,
    /// Coarse device description, for display
    #[serde(default)]
    pub user_agent: UserAgentSummary,
    /// Origin this registration was created under; disambiguates multiple
    /// deployments sharing one registry
    pub host: String,
    /// When this registration was first created
    pub created_at: DateTime<Utc>,
    /// Last time this registration was confirmed live by its owning device
    pub refreshed_at: DateTime<Utc>,
    pub status: RegistrationStatus,
}

impl RegistrationRecord {
    pub fn identity(&self) -> IdentityKey {
        self.binding.identity()
    }

    pub fn is_active(&self) -> bool {
        self.status == RegistrationStatus::Active
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.status == RegistrationStatus::MarkedForDeletion
    }
}

/// Payload for creating a record. The registry assigns the id and stamps
/// both timestamps server-side; new records are always ACTIVE.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub delivery_token: String,
    pub binding: TransportBinding,
    pub user_agent: UserAgentSummary,
    pub host: String,
}
