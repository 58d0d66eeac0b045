use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::location::LocationProvider;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// The permission scope requested from the platform
pub enum AuthorizationMode {
    /// Location only while the host is in the foreground
    WhileInUse,
    /// Location in the foreground and background
    #[default]
    Always,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Location permission state as reported by the platform
pub enum AuthorizationStatus {
    /// The user hasn't been asked yet
    #[default]
    NotDetermined,
    /// Parental controls or device management block location, the user can't change it
    Restricted,
    Denied,
    AuthorizedAlways,
    AuthorizedWhenInUse,
}

impl AuthorizationStatus {
    pub const fn has_user_decided(self) -> bool {
        !matches!(self, Self::NotDetermined)
    }

    pub const fn is_granted(self) -> bool {
        matches!(self, Self::AuthorizedAlways | Self::AuthorizedWhenInUse)
    }
}

/// Keeps track of the location permission and asks the platform for it when needed.
#[derive(Debug)]
pub struct AuthorizationController {
    mode: AuthorizationMode,
    status: AuthorizationStatus,
    /// Mode we last prompted the user with, reset if the platform forgets the decision
    requested: Option<AuthorizationMode>,
}

impl AuthorizationController {
    pub fn new(mode: AuthorizationMode, status: AuthorizationStatus) -> Self {
        Self {
            mode,
            status,
            requested: None,
        }
    }

    pub fn mode(&self) -> AuthorizationMode {
        self.mode
    }

    /// Change the mode used for the next request, doesn't prompt by itself
    pub fn set_mode(&mut self, mode: AuthorizationMode) {
        self.mode = mode;
    }

    pub fn current_status(&self) -> AuthorizationStatus {
        self.status
    }

    pub fn has_user_decided(&self) -> bool {
        self.status.has_user_decided()
    }

    pub fn is_authorized(&self) -> bool {
        self.status.is_granted()
    }

    /// Ask the platform to prompt the user. Does nothing once the user decided, except for
    /// asking to upgrade a while-in-use grant to [AuthorizationMode::Always] once.
    ///
    /// Returns whether the platform was asked.
    pub fn request_authorization<P: LocationProvider + ?Sized>(&mut self, provider: &P) -> bool {
        let should_request = match (self.status, self.mode) {
            (AuthorizationStatus::NotDetermined, _) => self.requested.is_none(),
            (AuthorizationStatus::AuthorizedWhenInUse, AuthorizationMode::Always) => {
                self.requested != Some(AuthorizationMode::Always)
            }
            _ => false,
        };

        if should_request {
            info!("Requesting {:?} location authorization", self.mode);
            provider.request_authorization(self.mode);
            self.requested = Some(self.mode);
        } else {
            debug!(
                "Skipping authorization request, status is {:?}",
                self.status
            );
        }

        should_request
    }

    /// Record a status reported by the platform, returns whether it changed
    pub fn update_status(&mut self, status: AuthorizationStatus) -> bool {
        if status == AuthorizationStatus::NotDetermined {
            self.requested = None;
        }
        let changed = self.status != status;
        self.status = status;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockProvider, ProviderCall};

    #[test]
    fn test_decided() {
        assert!(!AuthorizationStatus::NotDetermined.has_user_decided());
        assert!(AuthorizationStatus::Denied.has_user_decided());
        assert!(AuthorizationStatus::Restricted.has_user_decided());
        assert!(!AuthorizationStatus::Restricted.is_granted());
        assert!(AuthorizationStatus::AuthorizedWhenInUse.is_granted());
    }

    #[test]
    fn test_request_once() {
        let provider = MockProvider::default();
        let mut auth =
            AuthorizationController::new(AuthorizationMode::Always, AuthorizationStatus::default());

        assert!(auth.request_authorization(&provider));
        assert!(
            !auth.request_authorization(&provider),
            "Prompt shouldn't be requested twice while waiting"
        );
        assert_eq!(
            provider.calls(),
            vec![ProviderCall::RequestAuthorization(AuthorizationMode::Always)]
        );
    }

    #[test]
    fn test_request_noop_when_decided() {
        let provider = MockProvider::default();
        let mut auth =
            AuthorizationController::new(AuthorizationMode::Always, AuthorizationStatus::Denied);

        assert!(!auth.request_authorization(&provider));
        assert!(provider.calls().is_empty());
        assert!(auth.has_user_decided());
        assert!(!auth.is_authorized());
    }

    #[test]
    fn test_upgrade_to_always() {
        let provider = MockProvider::default();
        let mut auth = AuthorizationController::new(
            AuthorizationMode::WhileInUse,
            AuthorizationStatus::AuthorizedWhenInUse,
        );

        assert!(
            !auth.request_authorization(&provider),
            "Already have what we asked for"
        );

        auth.set_mode(AuthorizationMode::Always);
        assert!(auth.request_authorization(&provider));
        assert!(!auth.request_authorization(&provider));
    }

    #[test]
    fn test_status_reset_allows_new_request() {
        let provider = MockProvider::default();
        let mut auth = AuthorizationController::new(
            AuthorizationMode::WhileInUse,
            AuthorizationStatus::NotDetermined,
        );

        auth.request_authorization(&provider);
        assert!(auth.update_status(AuthorizationStatus::Denied));
        assert!(!auth.update_status(AuthorizationStatus::Denied));
        assert!(auth.update_status(AuthorizationStatus::NotDetermined));
        assert!(auth.request_authorization(&provider));
        assert_eq!(provider.calls().len(), 2);
    }
}
