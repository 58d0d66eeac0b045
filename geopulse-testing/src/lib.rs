use geopulse_logic::{
    AuthorizationStatus, LocationError, LocationFix, ProviderErrorKind, ServiceStatus,
    TrackingConfiguration,
};
use interprocess::local_socket::{GenericNamespaced, Name, ToNsName};
use serde::{Deserialize, Serialize};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

pub fn get_socket_name(base_name: String) -> Result<Name<'static>> {
    base_name
        .to_ns_name::<GenericNamespaced>()
        .context("Failed to parse socket name")
}

/// A request from the driver to the daemon, sent as one JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TestingRequest {
    Configure(TrackingConfiguration),
    StartUpdates,
    StopUpdates,
    StartSignificant,
    StopSignificant,
    RequestSingle,
    AddObserver,
    /// Pretend the platform delivered these fixes
    InjectFixes(Vec<LocationFix>),
    /// Pretend the platform failed
    InjectError(ProviderErrorKind),
    /// Pretend the user answered the permission prompt
    Authorize(AuthorizationStatus),
    Status,
}

/// A message from the daemon to the driver, sent as one JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TestingResponse {
    /// The request was fully processed
    Complete,
    Locations(Vec<LocationFix>),
    SingleShotResolved(LocationFix),
    Failed(String),
    AuthorizationChanged(AuthorizationStatus),
    Status(Box<ServiceStatus>),
    Error(String),
}

impl TestingResponse {
    /// Whether the driver should stop waiting for more responses to its request
    pub fn ends_request(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }

    pub fn encode_line(&self) -> Result<Vec<u8>> {
        let mut encoded = serde_json::to_vec(self).context("Failed to encode response")?;
        encoded.push(b'\n');
        Ok(encoded)
    }
}

impl From<anyhow::Error> for TestingResponse {
    fn from(value: anyhow::Error) -> Self {
        TestingResponse::Error(value.to_string())
    }
}

impl From<LocationError> for TestingResponse {
    fn from(value: LocationError) -> Self {
        TestingResponse::Failed(value.to_string())
    }
}

impl From<ServiceStatus> for TestingResponse {
    fn from(val: ServiceStatus) -> Self {
        TestingResponse::Status(Box::new(val))
    }
}

impl From<AuthorizationStatus> for TestingResponse {
    fn from(val: AuthorizationStatus) -> Self {
        TestingResponse::AuthorizationChanged(val)
    }
}
