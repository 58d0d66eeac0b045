use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    authorization::{AuthorizationController, AuthorizationMode, AuthorizationStatus},
    delegates::{DelegateRegistry, LocationObserver},
    error::{LocationError, ProviderErrorKind},
    location::{LocationFix, LocationProvider, ProviderEvent},
    settings::{HostCapabilities, TrackingConfiguration},
    single_shot::{ArmedRequest, LocationCallback, SingleShotCoordinator, SingleShotState},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Which tracking mode the host asked for. The two active modes are mutually exclusive,
/// starting one stops the other so the same fix never arrives through two paths.
pub enum TrackingMode {
    #[default]
    Idle,
    ContinuousUpdating,
    SignificantChangeMonitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Whether continuous updates are running on behalf of a single location request
enum SingleShotUpdates {
    #[default]
    None,
    AwaitingAuthorization,
    Running,
}

/// Owns the platform provider handle and all mutable tracking state. Every mutation goes
/// through `&mut self`, the service keeps exactly one of these behind one lock.
pub struct LocationSessionManager<P: LocationProvider + ?Sized> {
    provider: Arc<P>,
    capabilities: HostCapabilities,
    config: TrackingConfiguration,
    mode: TrackingMode,
    /// Mode the host asked for before authorization allowed it
    pending_start: Option<TrackingMode>,
    single_shot_updates: SingleShotUpdates,
    last_location: Option<LocationFix>,
    authorization: AuthorizationController,
    single_shot: SingleShotCoordinator,
    delegates: DelegateRegistry,
}

impl<P: LocationProvider + ?Sized> LocationSessionManager<P> {
    /// Create a session and push the default configuration to `provider`
    pub fn new(
        provider: Arc<P>,
        authorization_mode: AuthorizationMode,
        capabilities: HostCapabilities,
    ) -> Self {
        let status = provider.authorization_status();
        let mut session = Self {
            provider,
            capabilities,
            config: TrackingConfiguration::default(),
            mode: TrackingMode::Idle,
            pending_start: None,
            single_shot_updates: SingleShotUpdates::None,
            last_location: None,
            authorization: AuthorizationController::new(authorization_mode, status),
            single_shot: SingleShotCoordinator::default(),
            delegates: DelegateRegistry::default(),
        };
        session.apply_config();
        session
    }

    // == Configuration ==

    pub fn config(&self) -> &TrackingConfiguration {
        &self.config
    }

    pub fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    /// Apply `config` to the provider.
    ///
    /// # Panics
    ///
    /// Panics if `config` enables background updates and the host didn't declare the
    /// background location capability. That's a bug in the host integration, accepting part
    /// of the configuration would leave the platform in a state the host doesn't expect.
    pub fn configure(&mut self, config: TrackingConfiguration) {
        if let Err(violation) = config.validate(self.capabilities) {
            panic!("{violation}");
        }
        self.config = config;
        self.apply_config();
    }

    fn apply_config(&self) {
        let config = &self.config;
        debug!("Applying tracking configuration {config:?}");
        self.provider.set_desired_accuracy(config.desired_accuracy);
        self.provider.set_distance_filter(config.distance_filter);
        self.provider.set_activity_type(config.activity_type);
        self.provider.set_pauses_automatically(config.pauses_automatically);
        self.provider.set_allows_background_updates(config.allow_background_updates);
    }

    // == Authorization ==

    pub fn authorization(&self) -> &AuthorizationController {
        &self.authorization
    }

    pub fn set_authorization_mode(&mut self, mode: AuthorizationMode) {
        self.authorization.set_mode(mode);
    }

    pub fn request_authorization(&mut self) -> bool {
        self.authorization.request_authorization(self.provider.as_ref())
    }

    // == Observers ==

    pub fn add_delegate(&mut self, observer: &Arc<dyn LocationObserver>) -> bool {
        self.delegates.add(observer)
    }

    pub fn remove_delegate(&mut self, observer: &Arc<dyn LocationObserver>) -> bool {
        self.delegates.remove(observer)
    }

    pub fn delegate_count(&self) -> usize {
        self.delegates.len()
    }

    // == Tracking modes ==

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn pending_start(&self) -> Option<TrackingMode> {
        self.pending_start
    }

    pub fn last_location(&self) -> Option<LocationFix> {
        self.last_location
    }

    /// Seed the last location, e.g. from storage after the platform relaunched the host
    pub fn restore_last_location(&mut self, fix: LocationFix) {
        if self.last_location.is_none() {
            self.last_location = Some(fix);
        }
    }

    pub fn start_continuous(&mut self) {
        self.start_mode(TrackingMode::ContinuousUpdating);
    }

    pub fn start_significant_changes(&mut self) {
        self.start_mode(TrackingMode::SignificantChangeMonitoring);
    }

    pub fn stop_continuous(&mut self) {
        self.stop_mode(TrackingMode::ContinuousUpdating);
    }

    pub fn stop_significant_changes(&mut self) {
        self.stop_mode(TrackingMode::SignificantChangeMonitoring);
    }

    fn start_mode(&mut self, target: TrackingMode) {
        if self.mode == target {
            debug!("{target:?} already active");
            return;
        }

        if !self.authorization.is_authorized() {
            if !self.authorization.has_user_decided() {
                self.request_authorization();
                info!("Deferring {target:?} until the user decides on location access");
            } else {
                warn!(
                    "Location access is {:?}, {target:?} will start once it's granted",
                    self.authorization.current_status()
                );
            }
            self.pending_start = Some(target);
            return;
        }

        self.pending_start = None;

        match self.mode {
            TrackingMode::ContinuousUpdating => self.halt_continuous(),
            TrackingMode::SignificantChangeMonitoring => self.provider.stop_significant_changes(),
            TrackingMode::Idle => {}
        }

        match target {
            TrackingMode::ContinuousUpdating => {
                if self.single_shot_updates == SingleShotUpdates::Running {
                    // Already running for the single request, the mode owns them now
                    self.single_shot_updates = SingleShotUpdates::None;
                } else {
                    self.provider.start_continuous();
                }
            }
            TrackingMode::SignificantChangeMonitoring => {
                self.provider.start_significant_changes();
            }
            TrackingMode::Idle => {}
        }

        info!("Tracking mode {:?} -> {target:?}", self.mode);
        self.mode = target;
    }

    fn stop_mode(&mut self, target: TrackingMode) {
        if self.pending_start == Some(target) {
            self.pending_start = None;
        }

        if self.mode != target {
            debug!("{target:?} not active, nothing to stop");
            return;
        }

        match target {
            TrackingMode::ContinuousUpdating => self.halt_continuous(),
            TrackingMode::SignificantChangeMonitoring => self.provider.stop_significant_changes(),
            TrackingMode::Idle => {}
        }

        info!("Tracking mode {target:?} -> Idle");
        self.mode = TrackingMode::Idle;
    }

    /// Stop continuous updates unless an armed single request still needs them
    fn halt_continuous(&mut self) {
        if self.single_shot.is_armed() {
            debug!("Keeping continuous updates running for the pending single request");
            self.single_shot_updates = SingleShotUpdates::Running;
        } else {
            self.provider.stop_continuous();
        }
    }

    // == Single location requests ==

    pub fn single_shot_state(&self) -> Option<SingleShotState> {
        self.single_shot.state()
    }

    /// Arm a single location request, superseding any armed one. Starts continuous updates
    /// for the request unless continuous mode already delivers them, significant change fixes
    /// are too coarse to rely on.
    pub fn request_single_location(&mut self, callback: LocationCallback) -> ArmedRequest {
        let armed = self
            .single_shot
            .submit(callback, self.config.single_shot_timeout());

        if self.mode == TrackingMode::ContinuousUpdating
            || self.single_shot_updates != SingleShotUpdates::None
        {
            return armed;
        }

        if self.authorization.is_authorized() {
            self.provider.start_continuous();
            self.single_shot_updates = SingleShotUpdates::Running;
        } else if !self.authorization.has_user_decided() {
            self.request_authorization();
            self.single_shot_updates = SingleShotUpdates::AwaitingAuthorization;
        } else if let Some(state) = self.single_shot.on_error(LocationError::Denied) {
            self.finish_single_shot(state, true);
        }

        armed
    }

    /// Clean up after a request settled, `notify` sends failures to the observers
    fn finish_single_shot(&mut self, state: SingleShotState, notify: bool) {
        if self.single_shot_updates == SingleShotUpdates::Running {
            // Continuous mode never shares updates with a request, see `start_mode`
            self.provider.stop_continuous();
        }
        self.single_shot_updates = SingleShotUpdates::None;

        if let (true, SingleShotState::Failed(error)) = (notify, state) {
            self.delegates.notify_error(&error);
        }
    }

    // == Events ==

    pub fn handle_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::Locations(fixes) => self.on_locations(&fixes),
            ProviderEvent::Error(kind) => self.on_error(kind),
            ProviderEvent::AuthorizationChanged(status) => self.on_authorization_changed(status),
        }
    }

    pub fn handle_single_shot_deadline(&mut self, id: Uuid) {
        if let Some(state) = self.single_shot.on_deadline(id) {
            self.finish_single_shot(state, true);
        }
    }

    fn on_locations(&mut self, fixes: &[LocationFix]) {
        let Some(last) = fixes.last() else {
            debug!("Provider sent an empty fix sequence");
            return;
        };

        self.last_location = Some(*last);

        let threshold = self.config.desired_accuracy.threshold_meters();
        if let Some(state) = self.single_shot.on_locations(fixes, threshold) {
            self.finish_single_shot(state, true);
        }

        self.delegates.notify_locations(fixes);
    }

    fn on_error(&mut self, kind: ProviderErrorKind) {
        let error = LocationError::from(kind);
        warn!("Location provider error: {kind}");

        if let Some(state) = self.single_shot.on_error(error) {
            // Observers hear about this error below, don't report it twice
            self.finish_single_shot(state, false);
        }

        self.delegates.notify_error(&error);
    }

    fn on_authorization_changed(&mut self, status: AuthorizationStatus) {
        if self.authorization.update_status(status) {
            info!("Location authorization changed to {status:?}");
        }

        self.delegates.notify_authorization_changed(status);

        if status.is_granted() {
            if let Some(target) = self.pending_start.take() {
                self.start_mode(target);
            }
            if self.single_shot_updates == SingleShotUpdates::AwaitingAuthorization {
                if self.mode != TrackingMode::ContinuousUpdating {
                    self.provider.start_continuous();
                    self.single_shot_updates = SingleShotUpdates::Running;
                } else {
                    self.single_shot_updates = SingleShotUpdates::None;
                }
            }
        } else if status.has_user_decided()
            && self.single_shot_updates == SingleShotUpdates::AwaitingAuthorization
            && let Some(state) = self.single_shot.on_error(LocationError::Denied)
        {
            self.finish_single_shot(state, true);
        }
    }
}
