use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    UtcDT,
    authorization::{AuthorizationMode, AuthorizationStatus},
    error::ProviderErrorKind,
    settings::{ActivityType, DesiredAccuracy, DistanceFilter},
};

/// A "part" of a location
pub type LocationComponent = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A point on the globe in degrees
pub struct Coordinates {
    /// Latitude
    pub lat: LocationComponent,
    /// Longitude
    pub long: LocationComponent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A single resolved position reading as produced by the platform. Never changed after the
/// platform hands it to us.
pub struct LocationFix {
    pub coordinates: Coordinates,
    /// Radius of uncertainty in meters. A negative value marks the fix as invalid.
    pub horizontal_accuracy: f64,
    /// When the platform determined this fix
    pub timestamp: UtcDT,
    /// Meters per second, if the platform could determine it
    pub speed: Option<f64>,
    /// Degrees relative to true north, if the platform could determine it
    pub course: Option<f64>,
}

impl LocationFix {
    pub fn new(lat: LocationComponent, long: LocationComponent, horizontal_accuracy: f64) -> Self {
        Self::at(lat, long, horizontal_accuracy, Utc::now())
    }

    pub fn at(
        lat: LocationComponent,
        long: LocationComponent,
        horizontal_accuracy: f64,
        timestamp: UtcDT,
    ) -> Self {
        Self {
            coordinates: Coordinates { lat, long },
            horizontal_accuracy,
            timestamp,
            speed: None,
            course: None,
        }
    }

    /// Whether the platform marked this fix as having a usable accuracy
    pub fn is_valid(&self) -> bool {
        self.horizontal_accuracy.is_finite() && self.horizontal_accuracy >= 0.0
    }

    /// Whether this fix is at least as precise as `threshold` meters
    pub fn meets_accuracy(&self, threshold: f64) -> bool {
        self.is_valid() && self.horizontal_accuracy <= threshold
    }

    /// Pick the most precise valid fix out of `fixes`, earlier fixes win ties
    pub fn most_accurate(fixes: &[Self]) -> Option<&Self> {
        fixes
            .iter()
            .filter(|fix| fix.is_valid())
            .reduce(|best, fix| {
                if fix.horizontal_accuracy < best.horizontal_accuracy {
                    fix
                } else {
                    best
                }
            })
    }
}

/// An event coming out of the platform's positioning subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderEvent {
    /// One or more new fixes, in chronological order
    Locations(Vec<LocationFix>),
    /// The provider failed to produce a fix
    Error(ProviderErrorKind),
    /// The user (or the system) changed the location permission of the app
    AuthorizationChanged(AuthorizationStatus),
}

/// Handle to the platform's positioning subsystem. Implementations are expected to be cheap
/// pass-throughs to the platform, results of these calls come back later as [ProviderEvent]s
/// delivered through an [crate::EventSink].
pub trait LocationProvider: Send + Sync {
    fn set_desired_accuracy(&self, accuracy: DesiredAccuracy);
    fn set_distance_filter(&self, filter: DistanceFilter);
    fn set_activity_type(&self, activity: ActivityType);
    fn set_pauses_automatically(&self, pauses: bool);
    /// Setting this to `true` when the host did not declare background location is fatal on
    /// most platforms, the service makes sure this never happens.
    fn set_allows_background_updates(&self, allow: bool);
    fn start_continuous(&self);
    fn stop_continuous(&self);
    fn start_significant_changes(&self);
    fn stop_significant_changes(&self);
    /// Ask the platform to show its permission prompt, the answer arrives asynchronously as
    /// [ProviderEvent::AuthorizationChanged]
    fn request_authorization(&self, mode: AuthorizationMode);
    /// Current permission state as known by the platform
    fn authorization_status(&self) -> AuthorizationStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(LocationFix::new(1.0, 2.0, 0.0).is_valid());
        assert!(!LocationFix::new(1.0, 2.0, -1.0).is_valid());
        assert!(!LocationFix::new(1.0, 2.0, f64::NAN).is_valid());
        assert!(
            !LocationFix::new(1.0, 2.0, -1.0).meets_accuracy(100.0),
            "Invalid fixes never meet a threshold"
        );
        assert!(LocationFix::new(1.0, 2.0, 10.0).meets_accuracy(10.0));
        assert!(!LocationFix::new(1.0, 2.0, 10.5).meets_accuracy(10.0));
    }

    #[test]
    fn test_most_accurate() {
        let fixes = [
            LocationFix::new(0.0, 0.0, 50.0),
            LocationFix::new(1.0, 0.0, -1.0),
            LocationFix::new(2.0, 0.0, 12.0),
            LocationFix::new(3.0, 0.0, 12.0),
        ];

        let best = LocationFix::most_accurate(&fixes).expect("No best fix");
        assert_eq!(best.coordinates.lat, 2.0, "Earliest of the tied fixes wins");

        assert!(LocationFix::most_accurate(&[LocationFix::new(0.0, 0.0, -5.0)]).is_none());
        assert!(LocationFix::most_accurate(&[]).is_none());
    }
}
