//! Native push transport: OS push service registration driven by
//! asynchronous platform callbacks.

use crate::registration::types::TransportBinding;
use crate::transport::{
    PermissionState, PushTransport, SubscriptionProbe, TransportError, TransportGrant,
    TransportKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Stable per-device identifier source. The shell resolves the id once at
/// process start; it never changes for the life of the install.
pub trait DeviceIdentityProvider: Send + Sync {
    fn device_id(&self) -> Option<String>;
}

/// OS push primitives, implemented by the platform bridge of the app
/// shell.
#[async_trait]
pub trait NativePushApi: Send + Sync {
    /// Current notification permission state.
    async fn check_permission(&self) -> PermissionState;

    /// Prompt the user for permission. OS versions that auto-grant report
    /// `Granted` without showing a prompt.
    async fn request_permission(&self) -> PermissionState;

    /// Begin OS registration. The returned handle resolves with the
    /// delivery token (or the OS error) and owns its own listener cleanup.
    fn register(&self) -> PendingRegistration;

    /// Unregister from the OS push service.
    async fn unregister(&self) -> Result<(), TransportError>;
}

/// One in-flight OS registration attempt.
///
/// The platform reports the outcome through success/error callbacks.
/// Listeners are attached fresh for every attempt and detached on success,
/// failure and drop, so repeated registrations never accumulate stale
/// listeners.
pub struct PendingRegistration {
    outcome: oneshot::Receiver<Result<String, String>>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl PendingRegistration {
    /// `outcome` resolves with the delivery token or the OS error text;
    /// `cleanup` detaches the listeners backing it.
    pub fn new(
        outcome: oneshot::Receiver<Result<String, String>>,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            outcome,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Wait for the OS callback. Consumes the attempt; the listeners are
    /// removed before this returns.
    pub async fn wait(mut self) -> Result<String, TransportError> {
        let outcome = (&mut self.outcome).await;
        self.run_cleanup();
        match outcome {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(error)) => Err(TransportError::Failed(error)),
            Err(_) => Err(TransportError::Failed(
                "registration callback dropped without resolving".to_string(),
            )),
        }
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

/// Native push adapter. Identity of a native registration is the OS device
/// id; there is no subscription payload to snapshot.
pub struct NativePushTransport {
    api: Arc<dyn NativePushApi>,
    identity: Arc<dyn DeviceIdentityProvider>,
}

impl NativePushTransport {
    pub fn new(api: Arc<dyn NativePushApi>, identity: Arc<dyn DeviceIdentityProvider>) -> Self {
        Self { api, identity }
    }

    pub fn device_id(&self) -> Option<String> {
        self.identity.device_id()
    }
}

#[async_trait]
impl PushTransport for NativePushTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    async fn create_or_refresh(&self) -> Result<TransportGrant, TransportError> {
        let device_id = self.identity.device_id().ok_or_else(|| {
            TransportError::Failed("device id was not available".to_string())
        })?;

        match self.api.check_permission().await {
            PermissionState::Granted => {}
            PermissionState::Denied => return Err(TransportError::PermissionDenied),
            PermissionState::Prompt => {
                if self.api.request_permission().await != PermissionState::Granted {
                    log::warn!("The user has not granted permission for notifications");
                    return Err(TransportError::PermissionDenied);
                }
            }
        }

        let delivery_token = self.api.register().wait().await?;
        Ok(TransportGrant {
            delivery_token,
            binding: TransportBinding::Native { device_id },
        })
    }

    async fn current_subscription(&self) -> SubscriptionProbe {
        match self.identity.device_id() {
            Some(device_id) => SubscriptionProbe::Present(TransportBinding::Native { device_id }),
            None => SubscriptionProbe::Unavailable,
        }
    }

    async fn teardown(&self) -> bool {
        match self.api.unregister().await {
            Ok(()) => {
                log::info!("Unregistered from the OS push service");
                true
            }
            Err(e) => {
                log::warn!("Failed to unregister from the OS push service: {}", e);
                false
            }
        }
    }
}
