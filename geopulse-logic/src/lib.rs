mod authorization;
mod delegates;
mod error;
mod location;
mod push;
mod service;
mod session;
mod settings;
mod single_shot;

use chrono::{DateTime, Utc};

pub use authorization::{AuthorizationController, AuthorizationMode, AuthorizationStatus};
pub use delegates::{DelegateRegistry, LocationObserver};
pub use error::{ConfigurationViolation, LocationError, ProviderErrorKind};
pub use location::{Coordinates, LocationFix, LocationProvider, ProviderEvent};
pub use push::PushMessage;
pub use service::{EventSink, LocationService, ServiceStatus, SharedLocationService};
pub use session::{LocationSessionManager, TrackingMode};
pub use settings::{
    ActivityType, DesiredAccuracy, DistanceFilter, HostCapabilities, TrackingConfiguration,
};
pub use single_shot::{LocationCallback, SingleShotCoordinator, SingleShotState};

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
