use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the platform's positioning subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    /// The provider can't determine a location right now
    #[error("location currently unavailable")]
    LocationUnknown,
    /// Access to location was denied by the user
    #[error("access to location denied")]
    Denied,
    /// Network based positioning is unavailable
    #[error("network positioning unavailable")]
    Network,
    /// Satellite signal was lost
    #[error("signal lost")]
    SignalLost,
    /// Any other platform specific error code
    #[error("platform error code {0}")]
    Other(i32),
}

/// Non-fatal errors surfaced to observers via
/// [crate::LocationObserver::location_failed]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LocationError {
    #[error("Location authorization was denied")]
    Denied,
    #[error("Location provider error: {0}")]
    Provider(ProviderErrorKind),
    #[error("Location unknown, no fix was received before the deadline")]
    LocationUnknown,
}

impl From<ProviderErrorKind> for LocationError {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::Denied => Self::Denied,
            other => Self::Provider(other),
        }
    }
}

/// A programming error in the host integration. These are never recovered from, the service
/// panics with this as the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigurationViolation {
    #[error(
        "Background location updates were enabled, but the host did not declare the background location capability"
    )]
    BackgroundCapabilityMissing,
}
