//! Capability detection: pure predicates answering whether this device can
//! support push right now, could after a guided action, or not at all.

use super::types::UserAgentSummary;
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};

/// Coarse OS family, as coarse as the user-agent summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Android,
    Ios,
    MacOs,
    Windows,
    Linux,
    Other,
}

impl OsFamily {
    pub fn name(&self) -> &'static str {
        match self {
            OsFamily::Android => "Android",
            OsFamily::Ios => "iOS",
            OsFamily::MacOs => "macOS",
            OsFamily::Windows => "Windows",
            OsFamily::Linux => "Linux",
            OsFamily::Other => "Other",
        }
    }
}

/// Coarse browser family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Other,
}

impl BrowserFamily {
    pub fn name(&self) -> &'static str {
        match self {
            BrowserFamily::Chrome => "Chrome",
            BrowserFamily::Firefox => "Firefox",
            BrowserFamily::Safari => "Safari",
            BrowserFamily::Edge => "Edge",
            BrowserFamily::Other => "Other",
        }
    }
}

/// Static facts about the running device, gathered once by the application
/// shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    /// Running inside the native app shell
    pub is_native_app: bool,
    pub os: OsFamily,
    pub browser: BrowserFamily,
    /// Major/minor OS version when known; gates iOS web push
    pub os_version: Option<(u16, u16)>,
    /// The `Notification` API is exposed
    pub has_notification_api: bool,
    /// `navigator.serviceWorker` is exposed
    pub has_service_worker_api: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

impl DeviceProfile {
    /// Cosmetic summary stored on records created by this device.
    pub fn user_agent_summary(&self, kind: TransportKind) -> UserAgentSummary {
        UserAgentSummary {
            os: Some(self.os.name().to_string()),
            browser: match kind {
                TransportKind::Web => Some(self.browser.name().to_string()),
                TransportKind::Native => None,
            },
            device_vendor: self.device_vendor.clone(),
            device_model: self.device_model.clone(),
        }
    }
}

/// iOS first exposed web push to installed web apps in 16.4.
const IOS_WEB_PUSH_MIN: (u16, u16) = (16, 4);

/// The platform exposes the required push APIs right now.
pub fn has_push_support_now(profile: &DeviceProfile) -> bool {
    profile.has_notification_api && profile.has_service_worker_api
}

/// No support right now, but achievable with a guided action: recent-enough
/// iOS only exposes the push APIs once the site is installed to the home
/// screen.
pub fn can_gain_push_support(profile: &DeviceProfile) -> bool {
    !has_push_support_now(profile)
        && profile.os == OsFamily::Ios
        && profile
            .os_version
            .map_or(false, |version| version >= IOS_WEB_PUSH_MIN)
}

/// Technically push-capable combinations excluded for product quality.
/// Firefox on Android may open a blank page on notification tap and keeps
/// the subscription alive after a programmatic unsubscribe.
pub fn is_excluded_class(profile: &DeviceProfile) -> bool {
    profile.os == OsFamily::Android && profile.browser == BrowserFamily::Firefox
}

/// How an explicit enable attempt should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableRoute {
    /// Attempt registration directly.
    Proceed,
    /// Show the guided setup flow instead of attempting registration.
    GuidedSetup,
    /// Report the device as unsupported.
    Unsupported,
}

pub fn enable_route(profile: &DeviceProfile) -> EnableRoute {
    if profile.is_native_app {
        EnableRoute::Proceed
    } else if has_push_support_now(profile) && !is_excluded_class(profile) {
        EnableRoute::Proceed
    } else if can_gain_push_support(profile) || is_excluded_class(profile) {
        EnableRoute::GuidedSetup
    } else {
        EnableRoute::Unsupported
    }
}
