//! Pending-request bookkeeping: registration, inbound matching and
//! deadline expiry.
//!
//! Every pending entry settles exactly once. Both the match path and the
//! timeout sweep take the entry out of the map under the same lock before
//! settling it, so whichever runs first wins and the other finds nothing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::ClientError;
use crate::lock_ignore_poison;
use crate::message::{Request, ResponseError, ResponseResult, RpcId};

/// How a pending request ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Resolve(ResponseResult),
    Reject(ResponseError),
}

/// What a [`MatchFilter`] gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterArgs<'a> {
    /// The raw inbound message.
    pub message: &'a Value,
    /// The pending request being tested.
    pub current: &'a Request,
    pub enable_callbacks: bool,
    pub context: Option<&'a Value>,
}

/// Decides whether an inbound message settles a pending request, and how.
///
/// Runs while the tracker holds its lock; it must not call back into the
/// tracker.
pub type MatchFilter = Arc<dyn Fn(FilterArgs<'_>) -> Option<Settlement> + Send + Sync>;

/// Wrap a closure as a [`MatchFilter`].
pub fn match_filter<F>(filter: F) -> MatchFilter
where
    F: Fn(FilterArgs<'_>) -> Option<Settlement> + Send + Sync + 'static,
{
    Arc::new(filter)
}

/// Everything the tracker keeps for one outbound request.
pub struct PendingEntry {
    pub message: Request,
    pub filter: MatchFilter,
    /// Rejection delivered if the deadline passes first.
    pub timeout_reject_with: ResponseError,
    /// Re-publish the raw reply when this entry is matched.
    pub enable_callbacks: bool,
    /// Caller data handed to the filter.
    pub context: Option<Value>,
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("id", &self.message.id)
            .field("method", &self.message.method)
            .field("enable_callbacks", &self.enable_callbacks)
            .finish_non_exhaustive()
    }
}

/// Result of offering an inbound message to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Unmatched,
    Matched { id: RpcId, enable_callbacks: bool },
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

enum PendingState {
    Settled(Option<Result<ResponseResult, ClientError>>),
    Waiting(oneshot::Receiver<Settlement>),
}

/// The eventual outcome of a request.
///
/// Resolves with the peer's result, or fails with
/// [`ClientError::Rejected`] on an error reply, a timeout or an
/// invalid-state send.
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    state: PendingState,
}

impl PendingResponse {
    pub(crate) fn waiting(rx: oneshot::Receiver<Settlement>) -> Self {
        Self {
            state: PendingState::Waiting(rx),
        }
    }

    /// A response that is already decided.
    pub fn settled(outcome: Result<ResponseResult, ClientError>) -> Self {
        Self {
            state: PendingState::Settled(Some(outcome)),
        }
    }

    /// Returns `true` if the outcome was known when this was created.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, PendingState::Settled(_))
    }
}

impl Future for PendingResponse {
    type Output = Result<ResponseResult, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Settled(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(ClientError::Canceled)))
            }
            PendingState::Waiting(rx) => Pin::new(rx).poll(cx).map(|settled| match settled {
                Ok(Settlement::Resolve(result)) => Ok(result),
                Ok(Settlement::Reject(error)) => Err(ClientError::Rejected(error)),
                Err(_) => Err(ClientError::Canceled),
            }),
        }
    }
}

/// Owner of all pending outbound requests.
pub trait CorrelationTracker: Send + Sync {
    /// Start tracking `entry` and return its eventual outcome.
    fn register(&self, entry: PendingEntry) -> PendingResponse;

    /// Stop tracking `id` without settling it.
    fn withdraw(&self, id: &RpcId) -> bool;

    /// Offer an inbound message to every pending entry's filter.
    fn match_message(&self, raw: &Value) -> MatchOutcome;

    fn pending_count(&self) -> usize;

    /// Called by the client from `connect`, inside its runtime. Trackers
    /// with background work start it here.
    fn start(&self) {}
}

/// Timing for [`TimeoutTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often expired entries are swept.
    pub check_interval: Duration,
    /// Deadline applied to each registered entry.
    pub message_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(1000),
            message_timeout: Duration::from_millis(5000),
        }
    }
}

struct Slot {
    entry: PendingEntry,
    deadline: Instant,
    tx: oneshot::Sender<Settlement>,
}

type SlotMap = Arc<Mutex<HashMap<RpcId, Slot>>>;

/// Default tracker: a locked map of pending entries plus a periodic sweep.
///
/// The sweep runs on a Tokio runtime: the one current when the tracker is
/// built or [`start`](CorrelationTracker::start)ed, or the one current at
/// `register`. Registering from a plain thread reuses the last runtime
/// seen. If that runtime has shut down, the next `start` or `register`
/// inside a runtime restarts the sweep there. The sweep stops when the
/// tracker is dropped.
pub struct TimeoutTracker {
    config: TrackerConfig,
    slots: SlotMap,
    runtime: Mutex<Option<Handle>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            slots: Arc::new(Mutex::new(HashMap::new())),
            runtime: Mutex::new(Handle::try_current().ok()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Reject every entry whose deadline has passed. Returns how many expired.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.slots, Instant::now())
    }

    /// Returns `true` while a sweep task is alive.
    pub fn is_sweeping(&self) -> bool {
        lock_ignore_poison(&self.sweeper)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = lock_ignore_poison(&self.sweeper);
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let runtime = {
            let mut known = lock_ignore_poison(&self.runtime);
            if let Ok(current) = Handle::try_current() {
                *known = Some(current);
            }
            known.clone()
        };
        let Some(runtime) = runtime else {
            tracing::warn!("no Tokio runtime; timeout sweep not started");
            return;
        };

        let slots = self.slots.clone();
        // tokio::time::interval panics on a zero period
        let period = self.config.check_interval.max(Duration::from_millis(1));
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep(&slots, Instant::now());
            }
        }));
        tracing::debug!(interval_ms = period.as_millis() as u64, "timeout sweep started");
    }
}

impl Default for TimeoutTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Drop for TimeoutTracker {
    fn drop(&mut self) {
        if let Some(handle) = lock_ignore_poison(&self.sweeper).take() {
            handle.abort();
        }
    }
}

fn sweep(slots: &Mutex<HashMap<RpcId, Slot>>, now: Instant) -> usize {
    let expired: Vec<Slot> = {
        let mut map = lock_ignore_poison(slots);
        let ids: Vec<RpcId> = map
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| map.remove(id)).collect()
    };

    let count = expired.len();
    for slot in expired {
        tracing::warn!(
            id = %slot.entry.message.id,
            method = %slot.entry.message.method,
            "request timed out"
        );
        if slot.tx.send(Settlement::Reject(slot.entry.timeout_reject_with)).is_err() {
            tracing::debug!("timeout fired after caller stopped waiting");
        }
    }
    count
}

impl CorrelationTracker for TimeoutTracker {
    fn start(&self) {
        self.ensure_sweeper();
    }

    fn register(&self, entry: PendingEntry) -> PendingResponse {
        self.ensure_sweeper();

        let (tx, rx) = oneshot::channel();
        let id = entry.message.id.clone();
        let slot = Slot {
            entry,
            deadline: Instant::now() + self.config.message_timeout,
            tx,
        };

        if lock_ignore_poison(&self.slots).insert(id.clone(), slot).is_some() {
            tracing::warn!(id = %id, "duplicate request id replaced a pending request");
        }
        PendingResponse::waiting(rx)
    }

    fn withdraw(&self, id: &RpcId) -> bool {
        lock_ignore_poison(&self.slots).remove(id).is_some()
    }

    fn match_message(&self, raw: &Value) -> MatchOutcome {
        let (slot, settlement) = {
            let mut map = lock_ignore_poison(&self.slots);
            let hit = map.iter().find_map(|(id, slot)| {
                let args = FilterArgs {
                    message: raw,
                    current: &slot.entry.message,
                    enable_callbacks: slot.entry.enable_callbacks,
                    context: slot.entry.context.as_ref(),
                };
                (slot.entry.filter)(args).map(|settlement| (id.clone(), settlement))
            });
            let Some((id, settlement)) = hit else {
                return MatchOutcome::Unmatched;
            };
            match map.remove(&id) {
                Some(slot) => (slot, settlement),
                None => return MatchOutcome::Unmatched,
            }
        };

        let id = slot.entry.message.id.clone();
        let enable_callbacks = slot.entry.enable_callbacks;
        if slot.tx.send(settlement).is_err() {
            tracing::debug!(id = %id, "reply arrived after caller stopped waiting");
        }
        MatchOutcome::Matched {
            id,
            enable_callbacks,
        }
    }

    fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.slots).len()
    }
}
