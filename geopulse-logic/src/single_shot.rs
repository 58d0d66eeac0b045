use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{error::LocationError, location::LocationFix};

/// Completion handler for a single location request, called at most once
pub type LocationCallback = Box<dyn FnOnce(LocationFix) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Where a single location request is in its lifecycle. Everything but [SingleShotState::Armed]
/// is terminal.
pub enum SingleShotState {
    /// Waiting for an accurate enough fix or the deadline
    Armed,
    /// A fix met the desired accuracy before the deadline
    Resolved(LocationFix),
    /// The deadline passed, this was the most accurate fix seen
    ResolvedBestEffort(LocationFix),
    /// No usable fix, the error went to the observers
    Failed(LocationError),
}

impl SingleShotState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Armed)
    }
}

/// Roughly 30 years, used when a timeout doesn't fit in an [Instant]
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

struct PendingSingleRequest {
    id: Uuid,
    deadline: Instant,
    best_fix: Option<LocationFix>,
    callback: LocationCallback,
    cancel: CancellationToken,
}

/// Everything needed to arm the deadline of a freshly submitted request
#[derive(Debug, Clone)]
pub struct ArmedRequest {
    pub id: Uuid,
    pub timeout: Duration,
    /// Cancelled once the request settles or is superseded
    pub cancel: CancellationToken,
}

/// Manages one-off location requests. Only one request may be armed at a time, submitting a
/// new one silently drops the previous one without calling its callback.
#[derive(Default)]
pub struct SingleShotCoordinator {
    pending: Option<PendingSingleRequest>,
    last: Option<SingleShotState>,
}

impl SingleShotCoordinator {
    pub fn submit(&mut self, callback: LocationCallback, timeout: Duration) -> ArmedRequest {
        if let Some(previous) = self.pending.take() {
            info!(
                "Single location request {} superseded, dropping it",
                previous.id
            );
            previous.cancel.cancel();
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        debug!("Arming single location request {id} for {timeout:?}");

        self.pending = Some(PendingSingleRequest {
            id,
            deadline: deadline_after(timeout),
            best_fix: None,
            callback,
            cancel: cancel.clone(),
        });
        self.last = Some(SingleShotState::Armed);

        ArmedRequest {
            id,
            timeout,
            cancel,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// State of the most recent request, [None] if nothing was ever requested
    pub fn state(&self) -> Option<SingleShotState> {
        self.last
    }

    /// Feed a chronological fix sequence, resolves the request if any fix is within
    /// `threshold` meters
    pub fn on_locations(
        &mut self,
        fixes: &[LocationFix],
        threshold: f64,
    ) -> Option<SingleShotState> {
        let pending = self.pending.as_mut()?;
        let best = *LocationFix::most_accurate(fixes)?;

        if best.meets_accuracy(threshold) {
            Some(self.settle(SingleShotState::Resolved(best)))
        } else {
            let improved = pending
                .best_fix
                .is_none_or(|current| best.horizontal_accuracy < current.horizontal_accuracy);
            if improved {
                pending.best_fix = Some(best);
            }
            None
        }
    }

    /// The deadline for request `id` passed, stale ids are ignored
    pub fn on_deadline(&mut self, id: Uuid) -> Option<SingleShotState> {
        let pending = self.pending.as_ref().filter(|p| p.id == id)?;

        debug!(
            "Single location request {id} hit its deadline ({:?} late)",
            Instant::now().saturating_duration_since(pending.deadline)
        );

        let state = match pending.best_fix {
            Some(best) => SingleShotState::ResolvedBestEffort(best),
            None => SingleShotState::Failed(LocationError::LocationUnknown),
        };

        Some(self.settle(state))
    }

    /// Fail the armed request, if there is one
    pub fn on_error(&mut self, error: LocationError) -> Option<SingleShotState> {
        self.pending.as_ref()?;
        Some(self.settle(SingleShotState::Failed(error)))
    }

    fn settle(&mut self, state: SingleShotState) -> SingleShotState {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
            info!("Single location request {} settled: {state:?}", pending.id);

            if let SingleShotState::Resolved(fix) | SingleShotState::ResolvedBestEffort(fix) =
                state
            {
                let callback = pending.callback;
                if catch_unwind(AssertUnwindSafe(move || callback(fix))).is_err() {
                    error!("Single location callback for {} panicked", pending.id);
                }
            }
        }

        self.last = Some(state);
        state
    }
}
