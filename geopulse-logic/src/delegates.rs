use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Weak},
};

use log::{debug, error};

use crate::{authorization::AuthorizationStatus, error::LocationError, location::LocationFix};

/// Something in the host that wants to hear about location events. Only
/// [LocationObserver::received_location_updates] is required, the others default to doing
/// nothing.
///
/// Callbacks run on the service's event context while it holds its state, so they must not
/// block waiting on the service. Spawn a task instead if you need to call back into it.
pub trait LocationObserver: Send + Sync {
    /// New fixes, in chronological order
    fn received_location_updates(&self, locations: &[LocationFix]);

    fn location_failed(&self, _error: &LocationError) {}

    fn authorization_status_changed(&self, _status: AuthorizationStatus) {}
}

/// Ordered set of observers. Observers are held weakly, the host owns them, and are compared
/// by identity. Delivery happens in registration order.
#[derive(Default)]
pub struct DelegateRegistry {
    observers: Vec<Weak<dyn LocationObserver>>,
}

impl DelegateRegistry {
    /// Register `observer`, returns `false` if it was already registered
    pub fn add(&mut self, observer: &Arc<dyn LocationObserver>) -> bool {
        let weak = Arc::downgrade(observer);
        if self.observers.iter().any(|o| Weak::ptr_eq(o, &weak)) {
            false
        } else {
            self.observers.push(weak);
            true
        }
    }

    pub fn remove(&mut self, observer: &Arc<dyn LocationObserver>) -> bool {
        let weak = Arc::downgrade(observer);
        let before = self.observers.len();
        self.observers.retain(|o| !Weak::ptr_eq(o, &weak));
        before != self.observers.len()
    }

    /// Number of observers still alive
    pub fn len(&self) -> usize {
        self.observers.iter().filter(|o| o.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_locations(&mut self, fixes: &[LocationFix]) {
        self.dispatch("received_location_updates", |o| {
            o.received_location_updates(fixes)
        });
    }

    pub fn notify_error(&mut self, error: &LocationError) {
        self.dispatch("location_failed", |o| o.location_failed(error));
    }

    pub fn notify_authorization_changed(&mut self, status: AuthorizationStatus) {
        self.dispatch("authorization_status_changed", |o| {
            o.authorization_status_changed(status)
        });
    }

    /// Call `f` on every live observer, a panicking observer is logged and skipped
    fn dispatch(&mut self, callback: &str, f: impl Fn(&dyn LocationObserver)) {
        self.observers.retain(|o| o.strong_count() > 0);

        let live = self
            .observers
            .iter()
            .filter_map(Weak::upgrade)
            .collect::<Vec<_>>();

        debug!("Dispatching {callback} to {} observers", live.len());

        for (i, observer) in live.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                error!("Observer {i} panicked in {callback}, continuing with the rest");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{ObserverCall, PanickingObserver, RecordingObserver};

    fn fixes() -> Vec<LocationFix> {
        vec![
            LocationFix::new(1.0, 1.0, 10.0),
            LocationFix::new(2.0, 2.0, 10.0),
        ]
    }

    #[test]
    fn test_no_duplicates() {
        let mut registry = DelegateRegistry::default();
        let observer: Arc<dyn LocationObserver> = Arc::new(RecordingObserver::default());

        assert!(registry.add(&observer));
        assert!(!registry.add(&observer), "Same observer added twice");
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&observer));
        assert!(!registry.remove(&observer));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fan_out_in_order() {
        let mut registry = DelegateRegistry::default();
        let log = RecordingObserver::shared_log();
        let observers = (0..3)
            .map(|i| Arc::new(RecordingObserver::tagged(i, log.clone())))
            .collect::<Vec<_>>();

        for observer in observers.iter() {
            let observer: Arc<dyn LocationObserver> = observer.clone();
            registry.add(&observer);
        }

        let fixes = fixes();
        registry.notify_locations(&fixes);

        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec![0, 1, 2], "Observers called out of order");

        for (i, observer) in observers.iter().enumerate() {
            assert_eq!(
                observer.calls(),
                vec![ObserverCall::Locations(fixes.clone())],
                "Observer {i} got the wrong calls"
            );
        }
    }

    #[test]
    fn test_dropped_observers_pruned() {
        let mut registry = DelegateRegistry::default();
        let kept = Arc::new(RecordingObserver::default());
        let kept_dyn: Arc<dyn LocationObserver> = kept.clone();
        registry.add(&kept_dyn);

        {
            let gone: Arc<dyn LocationObserver> = Arc::new(RecordingObserver::default());
            registry.add(&gone);
            assert_eq!(registry.len(), 2);
        }

        assert_eq!(registry.len(), 1);
        registry.notify_error(&LocationError::LocationUnknown);
        assert_eq!(
            kept.calls(),
            vec![ObserverCall::Failed(LocationError::LocationUnknown)]
        );
    }

    #[test]
    fn test_panicking_observer_isolated() {
        let mut registry = DelegateRegistry::default();
        let bad: Arc<dyn LocationObserver> = Arc::new(PanickingObserver);
        let good = Arc::new(RecordingObserver::default());
        let good_dyn: Arc<dyn LocationObserver> = good.clone();

        registry.add(&bad);
        registry.add(&good_dyn);

        let fixes = fixes();
        registry.notify_locations(&fixes);
        registry.notify_authorization_changed(AuthorizationStatus::Denied);

        assert_eq!(
            good.calls(),
            vec![
                ObserverCall::Locations(fixes),
                ObserverCall::Authorization(AuthorizationStatus::Denied),
            ]
        );
    }

    #[test]
    fn test_optional_callbacks_skipped() {
        struct OnlyLocations;
        impl LocationObserver for OnlyLocations {
            fn received_location_updates(&self, _locations: &[LocationFix]) {}
        }

        let mut registry = DelegateRegistry::default();
        let observer: Arc<dyn LocationObserver> = Arc::new(OnlyLocations);
        registry.add(&observer);

        registry.notify_error(&LocationError::Denied);
        registry.notify_authorization_changed(AuthorizationStatus::AuthorizedAlways);
    }
}
