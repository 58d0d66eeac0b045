use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationViolation;

/// Fixes at or below this many meters satisfy the "best" accuracy sentinels
const BEST_ACCURACY_METERS: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
/// How precise the platform should try to be. Smaller is more precise and costs more power.
pub enum DesiredAccuracy {
    /// Highest precision, meant for turn by turn navigation while plugged in
    BestForNavigation,
    /// Highest precision the hardware offers
    #[default]
    Best,
    NearestTenMeters,
    HundredMeters,
    Kilometer,
    ThreeKilometers,
    /// Custom accuracy in meters
    Meters(f64),
}

impl DesiredAccuracy {
    /// The accuracy in meters a fix must reach to count as satisfying this setting
    pub fn threshold_meters(self) -> f64 {
        match self {
            Self::BestForNavigation | Self::Best => BEST_ACCURACY_METERS,
            Self::NearestTenMeters => 10.0,
            Self::HundredMeters => 100.0,
            Self::Kilometer => 1_000.0,
            Self::ThreeKilometers => 3_000.0,
            Self::Meters(meters) => meters,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
/// Minimum distance the device must move before a new fix is delivered
pub enum DistanceFilter {
    /// Deliver every movement
    #[default]
    None,
    Meters(f64),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Hint to the platform about what the user is doing, affects automatic pausing
pub enum ActivityType {
    #[default]
    Other,
    AutomotiveNavigation,
    Fitness,
    OtherNavigation,
    Airborne,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// What the host application declared to the platform ahead of time
pub struct HostCapabilities {
    /// The host declared that it receives location in the background
    pub background_location: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Settings applied to the platform provider, changes apply on the next provider configuration
/// and never to a fix that's already in flight
pub struct TrackingConfiguration {
    pub desired_accuracy: DesiredAccuracy,
    pub distance_filter: DistanceFilter,
    pub activity_type: ActivityType,
    /// Keep receiving updates while the host is in the background, requires
    /// [HostCapabilities::background_location]
    pub allow_background_updates: bool,
    /// Let the platform pause updates when it thinks the device isn't moving
    pub pauses_automatically: bool,
    /// Seconds a single location request waits for an accurate enough fix before settling for
    /// the best one seen
    pub single_shot_timeout_seconds: u64,
}

impl TrackingConfiguration {
    pub fn single_shot_timeout(&self) -> Duration {
        Duration::from_secs(self.single_shot_timeout_seconds)
    }

    /// Check this configuration is legal for a host with `capabilities`
    pub fn validate(&self, capabilities: HostCapabilities) -> Result<(), ConfigurationViolation> {
        if self.allow_background_updates && !capabilities.background_location {
            Err(ConfigurationViolation::BackgroundCapabilityMissing)
        } else {
            Ok(())
        }
    }
}

impl Default for TrackingConfiguration {
    fn default() -> Self {
        Self {
            desired_accuracy: DesiredAccuracy::default(),
            distance_filter: DistanceFilter::default(),
            activity_type: ActivityType::default(),
            allow_background_updates: false,
            pauses_automatically: true,
            single_shot_timeout_seconds: 10,
        }
    }
}
