use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    authorization::{AuthorizationMode, AuthorizationStatus},
    delegates::LocationObserver,
    error::ProviderErrorKind,
    location::{LocationFix, LocationProvider, ProviderEvent},
    session::{LocationSessionManager, TrackingMode},
    settings::{
        ActivityType, DesiredAccuracy, DistanceFilter, HostCapabilities, TrackingConfiguration,
    },
    single_shot::{ArmedRequest, SingleShotState},
};

/// Everything the event loop processes, in the order it arrived
#[derive(Debug)]
enum ServiceEvent {
    Provider(ProviderEvent),
    SingleShotDeadline(Uuid),
}

type EventTx = mpsc::UnboundedSender<ServiceEvent>;
type EventRx = mpsc::UnboundedReceiver<ServiceEvent>;

/// Cloneable handle the platform glue uses to push provider events into the service
#[derive(Debug, Clone)]
pub struct EventSink(EventTx);

impl EventSink {
    /// Queue `event`, returns `false` if the service is gone
    pub fn send(&self, event: ProviderEvent) -> bool {
        self.0.send(ServiceEvent::Provider(event)).is_ok()
    }

    pub fn locations(&self, fixes: Vec<LocationFix>) -> bool {
        self.send(ProviderEvent::Locations(fixes))
    }

    pub fn error(&self, kind: ProviderErrorKind) -> bool {
        self.send(ProviderEvent::Error(kind))
    }

    pub fn authorization_changed(&self, status: AuthorizationStatus) -> bool {
        self.send(ProviderEvent::AuthorizationChanged(status))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Snapshot of the service for diagnostics
pub struct ServiceStatus {
    pub authorization_mode: AuthorizationMode,
    pub authorization_status: AuthorizationStatus,
    pub has_user_decided: bool,
    pub is_location_authorized: bool,
    pub tracking_mode: TrackingMode,
    pub pending_start: Option<TrackingMode>,
    pub is_monitoring_significant_changes: bool,
    pub last_location: Option<LocationFix>,
    pub single_shot: Option<SingleShotState>,
    pub delegates: usize,
    pub configuration: TrackingConfiguration,
}

/// The entry point for the host application. Wraps a [LocationSessionManager] behind a single
/// lock, so every mutation (host calls and provider events alike) happens one at a time.
///
/// Provider events are queued through an [EventSink] and processed by
/// [LocationService::main_loop], which must be running for events and single location
/// deadlines to be handled.
pub struct LocationService<P: LocationProvider + ?Sized = dyn LocationProvider> {
    session: Mutex<LocationSessionManager<P>>,
    events: (EventTx, Mutex<EventRx>),
    cancel: CancellationToken,
}

/// The type of the process wide instance, see [LocationService::shared_instance]
pub type SharedLocationService = LocationService<dyn LocationProvider>;

static SHARED: OnceLock<Arc<SharedLocationService>> = OnceLock::new();

impl SharedLocationService {
    /// Get the process wide service, creating it with `init` on first access. The instance
    /// lives until the process exits. If called within a tokio runtime the event loop is
    /// spawned on it, otherwise the host has to drive [LocationService::main_loop] itself.
    pub fn shared_instance(init: impl FnOnce() -> Self) -> Arc<Self> {
        SHARED
            .get_or_init(|| {
                let service = Arc::new(init());
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let service = service.clone();
                    handle.spawn(async move { service.main_loop().await });
                } else {
                    warn!("No tokio runtime, shared location service event loop not spawned");
                }
                info!("Created shared location service");
                service
            })
            .clone()
    }

    /// Get the process wide service if it was created already
    pub fn try_shared_instance() -> Option<Arc<Self>> {
        SHARED.get().cloned()
    }
}

impl<P: LocationProvider + ?Sized> LocationService<P> {
    pub fn new(
        provider: Arc<P>,
        authorization_mode: AuthorizationMode,
        capabilities: HostCapabilities,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: Mutex::new(LocationSessionManager::new(
                provider,
                authorization_mode,
                capabilities,
            )),
            events: (tx, Mutex::new(rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a service with [AuthorizationMode::Always]
    pub fn with_provider(provider: Arc<P>, capabilities: HostCapabilities) -> Self {
        Self::new(provider, AuthorizationMode::default(), capabilities)
    }

    pub fn event_sink(&self) -> EventSink {
        EventSink(self.events.0.clone())
    }

    // == Configuration ==

    pub async fn configuration(&self) -> TrackingConfiguration {
        self.session.lock().await.config().clone()
    }

    /// Apply a whole configuration at once.
    ///
    /// # Panics
    ///
    /// Panics if background updates are enabled without the host declaring the capability,
    /// see [LocationSessionManager::configure].
    pub async fn configure(&self, config: TrackingConfiguration) {
        self.session.lock().await.configure(config);
    }

    async fn update_config(&self, f: impl FnOnce(&mut TrackingConfiguration)) {
        let mut session = self.session.lock().await;
        let mut config = session.config().clone();
        f(&mut config);
        session.configure(config);
    }

    pub async fn set_desired_accuracy(&self, accuracy: DesiredAccuracy) {
        self.update_config(|c| c.desired_accuracy = accuracy).await;
    }

    pub async fn set_distance_filter(&self, filter: DistanceFilter) {
        self.update_config(|c| c.distance_filter = filter).await;
    }

    pub async fn set_activity_type(&self, activity: ActivityType) {
        self.update_config(|c| c.activity_type = activity).await;
    }

    pub async fn set_pauses_automatically(&self, pauses: bool) {
        self.update_config(|c| c.pauses_automatically = pauses).await;
    }

    /// # Panics
    ///
    /// Panics when enabling without the host's background location capability
    pub async fn set_allow_background_updates(&self, allow: bool) {
        self.update_config(|c| c.allow_background_updates = allow).await;
    }

    pub async fn set_single_shot_timeout_seconds(&self, seconds: u64) {
        self.update_config(|c| c.single_shot_timeout_seconds = seconds).await;
    }

    // == Authorization ==

    pub async fn authorization_mode(&self) -> AuthorizationMode {
        self.session.lock().await.authorization().mode()
    }

    /// Change the mode used for future authorization requests
    pub async fn set_authorization_mode(&self, mode: AuthorizationMode) {
        self.session.lock().await.set_authorization_mode(mode);
    }

    /// Ask the platform for permission with the current mode, returns whether it was asked
    pub async fn request_authorization(&self) -> bool {
        self.session.lock().await.request_authorization()
    }

    pub async fn authorization_status(&self) -> AuthorizationStatus {
        self.session.lock().await.authorization().current_status()
    }

    pub async fn has_user_decided(&self) -> bool {
        self.session.lock().await.authorization().has_user_decided()
    }

    /// Whether the user allowed location access
    pub async fn is_location_authorized(&self) -> bool {
        self.session.lock().await.authorization().is_authorized()
    }

    // == Observers ==

    /// Register an observer, it's held weakly so the host must keep it alive. Returns `false`
    /// if it was registered already.
    pub async fn add_delegate(&self, observer: &Arc<dyn LocationObserver>) -> bool {
        self.session.lock().await.add_delegate(observer)
    }

    pub async fn remove_delegate(&self, observer: &Arc<dyn LocationObserver>) -> bool {
        self.session.lock().await.remove_delegate(observer)
    }

    // == Tracking ==

    pub async fn start_location_updates(&self) {
        self.session.lock().await.start_continuous();
    }

    pub async fn stop_location_updates(&self) {
        self.session.lock().await.stop_continuous();
    }

    pub async fn start_monitoring_significant_changes(&self) {
        self.session.lock().await.start_significant_changes();
    }

    pub async fn stop_monitoring_significant_changes(&self) {
        self.session.lock().await.stop_significant_changes();
    }

    pub async fn is_monitoring_significant_changes(&self) -> bool {
        self.tracking_mode().await == TrackingMode::SignificantChangeMonitoring
    }

    pub async fn tracking_mode(&self) -> TrackingMode {
        self.session.lock().await.mode()
    }

    /// The most recently received fix, [None] until the first fix arrives
    pub async fn last_location(&self) -> Option<LocationFix> {
        self.session.lock().await.last_location()
    }

    /// Seed [LocationService::last_location] after a relaunch, ignored once a real fix exists
    pub async fn restore_last_location(&self, fix: LocationFix) {
        self.session.lock().await.restore_last_location(fix);
    }

    /// Request one location. `callback` gets a fix accurate enough for the configured desired
    /// accuracy, or the most accurate fix seen once the timeout passes. If no fix arrives at
    /// all, observers get [crate::LocationError::LocationUnknown] and `callback` is dropped.
    ///
    /// A new request silently replaces one that's still pending.
    pub async fn request_single_location(
        &self,
        callback: impl FnOnce(LocationFix) + Send + 'static,
    ) {
        let armed = self
            .session
            .lock()
            .await
            .request_single_location(Box::new(callback));
        self.arm_deadline(armed);
    }

    fn arm_deadline(&self, armed: ArmedRequest) {
        let ArmedRequest {
            id,
            timeout,
            cancel,
        } = armed;
        let events = self.events.0.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {}

                _ = tokio::time::sleep(timeout) => {
                    events.send(ServiceEvent::SingleShotDeadline(id)).ok();
                }
            }
        });
    }

    pub async fn single_shot_state(&self) -> Option<SingleShotState> {
        self.session.lock().await.single_shot_state()
    }

    pub async fn status(&self) -> ServiceStatus {
        let session = self.session.lock().await;
        let auth = session.authorization();
        ServiceStatus {
            authorization_mode: auth.mode(),
            authorization_status: auth.current_status(),
            has_user_decided: auth.has_user_decided(),
            is_location_authorized: auth.is_authorized(),
            tracking_mode: session.mode(),
            pending_start: session.pending_start(),
            is_monitoring_significant_changes: session.mode()
                == TrackingMode::SignificantChangeMonitoring,
            last_location: session.last_location(),
            single_shot: session.single_shot_state(),
            delegates: session.delegate_count(),
            configuration: session.config().clone(),
        }
    }

    // == Events ==

    /// Process a provider event right away, bypassing the queue
    pub async fn handle_provider_event(&self, event: ProviderEvent) {
        self.session.lock().await.handle_event(event);
    }

    async fn handle_event(&self, event: ServiceEvent) {
        let mut session = self.session.lock().await;
        match event {
            ServiceEvent::Provider(event) => session.handle_event(event),
            ServiceEvent::SingleShotDeadline(id) => session.handle_single_shot_deadline(id),
        }
    }

    /// Process queued events until [LocationService::stop_event_loop] is called
    pub async fn main_loop(&self) {
        let mut events = self.events.1.lock().await;

        debug!("Location service event loop started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
            }
        }

        debug!("Location service event loop stopped");
    }

    /// Spawn [LocationService::main_loop] onto the current runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()>
    where
        P: 'static,
    {
        let service = self.clone();
        tokio::spawn(async move { service.main_loop().await })
    }

    pub fn stop_event_loop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use super::*;
    use crate::{
        error::LocationError,
        tests::{MockProvider, ObserverCall, RecordingObserver},
    };
    use tokio::{task::yield_now, test};

    type TestService = LocationService<MockProvider>;

    const TIMEOUT: Duration = Duration::from_secs(10);

    struct Harness {
        service: Arc<TestService>,
        sink: EventSink,
        observer: Arc<RecordingObserver>,
        _observer_dyn: Arc<dyn LocationObserver>,
        result: Arc<StdMutex<Vec<LocationFix>>>,
    }

    impl Harness {
        async fn new(accuracy: DesiredAccuracy) -> Self {
            tokio::time::pause();
            let provider = Arc::new(MockProvider::with_status(
                AuthorizationStatus::AuthorizedAlways,
            ));
            let service = Arc::new(TestService::with_provider(
                provider,
                HostCapabilities::default(),
            ));
            service.set_desired_accuracy(accuracy).await;
            service
                .set_single_shot_timeout_seconds(TIMEOUT.as_secs())
                .await;
            service.spawn();

            let observer = Arc::new(RecordingObserver::default());
            let observer_dyn: Arc<dyn LocationObserver> = observer.clone();
            service.add_delegate(&observer_dyn).await;

            Self {
                sink: service.event_sink(),
                service,
                observer,
                _observer_dyn: observer_dyn,
                result: Arc::default(),
            }
        }

        async fn request(&self) {
            let result = self.result.clone();
            self.service
                .request_single_location(move |fix| result.lock().unwrap().push(fix))
                .await;
        }

        fn resolved(&self) -> Vec<LocationFix> {
            self.result.lock().unwrap().clone()
        }

        async fn settle(&self) {
            for _ in 0..5 {
                yield_now().await;
            }
        }
    }

    #[test]
    async fn test_queued_events_processed_in_order() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        h.service.start_location_updates().await;

        let sequences = (0..5)
            .map(|i| {
                vec![
                    LocationFix::new(i as f64, 0.0, 10.0),
                    LocationFix::new(i as f64, 1.0, 10.0),
                ]
            })
            .collect::<Vec<_>>();

        for seq in sequences.iter() {
            assert!(h.sink.locations(seq.clone()));
        }
        h.settle().await;

        assert_eq!(
            h.service.last_location().await,
            sequences.last().and_then(|s| s.last()).copied()
        );
        assert_eq!(
            h.observer.calls(),
            sequences
                .into_iter()
                .map(ObserverCall::Locations)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    async fn test_single_shot_resolves_with_accurate_fix() {
        let h = Harness::new(DesiredAccuracy::NearestTenMeters).await;
        h.request().await;

        let fix = LocationFix::new(1.0, 2.0, 8.0);
        h.sink.locations(vec![fix]);
        h.settle().await;

        assert_eq!(h.resolved(), vec![fix]);
        assert_eq!(
            h.service.single_shot_state().await,
            Some(SingleShotState::Resolved(fix))
        );

        // Deadline passing afterwards changes nothing
        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(h.resolved(), vec![fix]);
        assert!(
            !h.observer
                .calls()
                .iter()
                .any(|c| matches!(c, ObserverCall::Failed(_))),
            "Failure reported for a resolved request"
        );
    }

    #[test]
    async fn test_single_shot_times_out_without_fix() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        h.request().await;

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;

        assert!(h.resolved().is_empty());
        assert_eq!(
            h.service.single_shot_state().await,
            Some(SingleShotState::Failed(LocationError::LocationUnknown))
        );
        assert_eq!(
            h.observer.calls(),
            vec![ObserverCall::Failed(LocationError::LocationUnknown)]
        );
    }

    #[test]
    async fn test_single_shot_with_unbounded_timeout() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        h.service.set_single_shot_timeout_seconds(u64::MAX).await;
        h.request().await;

        tokio::time::sleep(TIMEOUT * 100).await;
        assert_eq!(
            h.service.single_shot_state().await,
            Some(SingleShotState::Armed)
        );

        let fix = LocationFix::new(0.0, 0.0, 2.0);
        h.sink.locations(vec![fix]);
        h.settle().await;
        assert_eq!(h.resolved(), vec![fix]);
    }

    #[test]
    async fn test_single_shot_best_effort_only_after_deadline() {
        let h = Harness::new(DesiredAccuracy::NearestTenMeters).await;
        h.request().await;

        let coarse = LocationFix::new(1.0, 2.0, 65.0);
        h.sink.locations(vec![coarse]);
        h.settle().await;

        tokio::time::sleep(TIMEOUT - Duration::from_secs(1)).await;
        assert!(h.resolved().is_empty(), "Resolved before the deadline");
        assert_eq!(
            h.service.single_shot_state().await,
            Some(SingleShotState::Armed)
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.resolved(), vec![coarse]);
        assert_eq!(
            h.service.single_shot_state().await,
            Some(SingleShotState::ResolvedBestEffort(coarse))
        );
    }

    #[test]
    async fn test_superseded_request_never_resolves() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        let first = Arc::new(StdMutex::new(false));
        let first2 = first.clone();
        h.service
            .request_single_location(move |_| *first2.lock().unwrap() = true)
            .await;

        tokio::time::sleep(TIMEOUT / 2).await;
        h.request().await;

        // First deadline passes, second still armed
        tokio::time::sleep(TIMEOUT / 2 + Duration::from_secs(1)).await;
        assert_eq!(
            h.service.single_shot_state().await,
            Some(SingleShotState::Armed)
        );

        let fix = LocationFix::new(0.0, 0.0, 1.0);
        h.sink.locations(vec![fix]);
        h.settle().await;

        assert!(!*first.lock().unwrap(), "Superseded callback was called");
        assert_eq!(h.resolved(), vec![fix]);
    }

    #[test]
    async fn test_status_snapshot() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        h.service.start_monitoring_significant_changes().await;

        let status = h.service.status().await;
        assert!(status.is_monitoring_significant_changes);
        assert!(status.is_location_authorized);
        assert!(status.has_user_decided);
        assert_eq!(status.delegates, 1);
        assert_eq!(status.authorization_mode, AuthorizationMode::Always);
        assert!(h.service.is_monitoring_significant_changes().await);
    }

    #[test]
    async fn test_authorization_forwarded_to_observers() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        h.sink.authorization_changed(AuthorizationStatus::Denied);
        h.settle().await;

        assert_eq!(
            h.observer.calls(),
            vec![ObserverCall::Authorization(AuthorizationStatus::Denied)]
        );
        assert!(!h.service.is_location_authorized().await);
        assert!(h.service.has_user_decided().await);
    }

    #[test]
    #[should_panic(expected = "background location capability")]
    async fn test_background_setter_panics_without_capability() {
        let provider = Arc::new(MockProvider::default());
        let service = TestService::with_provider(provider, HostCapabilities::default());
        service.set_allow_background_updates(true).await;
    }

    #[test]
    async fn test_stop_event_loop() {
        let h = Harness::new(DesiredAccuracy::Best).await;
        h.service.stop_event_loop();
        h.settle().await;

        h.sink.locations(vec![LocationFix::new(0.0, 0.0, 1.0)]);
        h.settle().await;
        assert!(h.observer.calls().is_empty(), "Event handled after stop");
    }

    #[test]
    async fn test_shared_instance_created_once() {
        let first = SharedLocationService::shared_instance(|| {
            SharedLocationService::with_provider(
                Arc::new(MockProvider::default()),
                HostCapabilities::default(),
            )
        });
        let second = SharedLocationService::shared_instance(|| {
            panic!("Shared instance initialised twice");
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert!(
            SharedLocationService::try_shared_instance()
                .is_some_and(|shared| Arc::ptr_eq(&shared, &first))
        );
        first.stop_event_loop();
    }
}
