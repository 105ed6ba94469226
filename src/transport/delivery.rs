//! Push-delivery backend seam.
//!
//! The backend routes notifications to local subscriptions through opaque
//! delivery tokens. Only the token lifecycle is consumed here; the sending
//! path lives server-side and is out of scope.

use crate::registration::types::WebPushSubscription;
use crate::transport::TransportError;
use async_trait::async_trait;

#[async_trait]
pub trait DeliveryTokenService: Send + Sync {
    /// Obtain a delivery token for the given local subscription, creating
    /// or refreshing the backend-side registration. Idempotent: calling it
    /// again for the same subscription returns a working token, which may
    /// or may not equal the previous one.
    async fn get_or_refresh_token(
        &self,
        subscription: &WebPushSubscription,
    ) -> Result<String, TransportError>;

    /// Invalidate a token in the backend. Returns whether it was actually
    /// revoked.
    async fn revoke_token(&self, token: &str) -> bool;
}
