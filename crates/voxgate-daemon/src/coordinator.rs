//! Shared access to the speech queue.
//!
//! Connection tasks call into a [`Coordinator`]; the supervisor task
//! ([`Coordinator::supervise`]) makes time-driven grants, expires stale
//! waits and reclaims stuck grants. The queue lock is a plain mutex and is
//! never held across an `.await`.
//!
//! Waiters park on a oneshot channel. A grant sends on it; abandonment
//! drops it, which the waiter reads as a timeout.
//!
//! [`Coordinator::shut_down`] freezes the schedule: nothing is granted after
//! it, parked waits end with [`GrantOutcome::ShuttingDown`] and new requests
//! are refused as unreachable so producers take the lock path.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxgate_core::{EnqueueRequest, ItemId, ItemState, SpeakError, StatusSnapshot};

use crate::config::DaemonConfig;
use crate::queue::{ConnectionId, QueueError, QueueTiming, SpeechQueue};

/// Longest wait a producer may ask for.
pub const MAX_WAIT: Duration = Duration::from_secs(600);

/// Fallback supervisor period when nothing is scheduled.
const IDLE_TICK: Duration = Duration::from_secs(5);

/// Result of [`Coordinator::wait_for_grant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    TimedOut,
    /// The daemon is stopping; the item will never be granted.
    ShuttingDown,
}

struct State {
    queue: SpeechQueue,
    waiters: HashMap<ItemId, oneshot::Sender<()>>,
    shutting_down: bool,
}

/// Owns the queue and the waiters parked on it.
pub struct Coordinator {
    state: Mutex<State>,
    /// Wakes the supervisor when the schedule may have changed.
    changed: Notify,
    default_wait: Duration,
}

impl Coordinator {
    pub fn new(config: &DaemonConfig) -> Self {
        let timing = QueueTiming {
            settle: config.grant_settle,
            ceiling: config.grant_ceiling,
        };
        Self {
            state: Mutex::new(State {
                queue: SpeechQueue::new(config.queue_capacity, timing),
                waiters: HashMap::new(),
                shutting_down: false,
            }),
            changed: Notify::new(),
            default_wait: config.grant_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a request on behalf of `owner`.
    pub fn enqueue(&self, owner: ConnectionId, request: EnqueueRequest) -> Result<ItemId, SpeakError> {
        let now = Instant::now();
        let priority = request.priority;
        let session_id = request.session_id.clone();
        let text_length = request.text.chars().count();

        let id = {
            let mut state = self.lock();
            if state.shutting_down {
                return Err(shutting_down());
            }
            let id = state.queue.enqueue(
                owner,
                request,
                now.into_std(),
                (now + self.default_wait).into_std(),
            )?;
            state.pump(now);
            id
        };
        self.changed.notify_one();

        info!(%id, %priority, %session_id, text_length, %owner, "Enqueued");
        Ok(id)
    }

    /// Block until `id` holds the grant or `timeout` elapses.
    ///
    /// On timeout a still-queued item is abandoned so it can never be
    /// granted later.
    pub async fn wait_for_grant(&self, id: ItemId, timeout: Duration) -> Result<GrantOutcome, SpeakError> {
        let timeout = timeout.min(MAX_WAIT);
        let rx = {
            let mut state = self.lock();
            if state.shutting_down {
                return Ok(GrantOutcome::ShuttingDown);
            }
            match state.queue.state_of(id) {
                Some(ItemState::Granted) => return Ok(GrantOutcome::Granted),
                Some(ItemState::Queued) => {}
                _ => return Err(QueueError::UnknownItem(id).into()),
            }
            if state.waiters.contains_key(&id) {
                return Err(SpeakError::invalid_request(format!("already waiting for {id}")));
            }
            state
                .queue
                .set_wait_deadline(id, (Instant::now() + timeout).into_std())?;
            let (tx, rx) = oneshot::channel();
            state.waiters.insert(id, tx);
            rx
        };
        self.changed.notify_one();

        let signalled = matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())));
        if signalled {
            return Ok(GrantOutcome::Granted);
        }

        // The grant may have raced the timer; the queue has the final word.
        let mut state = self.lock();
        state.waiters.remove(&id);
        if state.shutting_down && state.queue.state_of(id) != Some(ItemState::Granted) {
            return Ok(GrantOutcome::ShuttingDown);
        }
        match state.queue.state_of(id) {
            Some(ItemState::Granted) => Ok(GrantOutcome::Granted),
            Some(ItemState::Queued) => {
                let _ = state.queue.abandon(id);
                info!(%id, ?timeout, "Wait timed out, item abandoned");
                Ok(GrantOutcome::TimedOut)
            }
            _ => Ok(GrantOutcome::TimedOut),
        }
    }

    pub fn report_complete(&self, id: ItemId, duration_ms: u64) -> Result<(), SpeakError> {
        let item = {
            let mut state = self.lock();
            let item = state.queue.complete(id)?;
            state.pump(Instant::now());
            item
        };
        self.changed.notify_one();
        info!(%id, duration_ms, session_id = %item.session_id, "Completed");
        Ok(())
    }

    pub fn report_failed(&self, id: ItemId, reason: &str) -> Result<(), SpeakError> {
        let item = {
            let mut state = self.lock();
            let item = state.queue.fail(id)?;
            state.pump(Instant::now());
            item
        };
        self.changed.notify_one();
        warn!(%id, reason, session_id = %item.session_id, "Producer reported failure");
        Ok(())
    }

    /// Drop everything `owner` enqueued.
    pub fn disconnect(&self, owner: ConnectionId) {
        let removed = {
            let mut state = self.lock();
            let removed = state.queue.remove_owned(owner);
            for id in &removed {
                state.waiters.remove(id);
            }
            if !removed.is_empty() {
                state.pump(Instant::now());
            }
            removed
        };
        if !removed.is_empty() {
            self.changed.notify_one();
            info!(%owner, count = removed.len(), "Dropped items of closed connection");
        }
    }

    /// Stop granting for good and release every parked waiter.
    ///
    /// Called before connections are torn down, so a holder's disconnect
    /// cannot hand the grant to someone while its audio is still playing.
    pub fn shut_down(&self) {
        let released = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            let released = state.waiters.len();
            // Dropping the senders wakes each waiter.
            state.waiters.clear();
            released
        };
        self.changed.notify_one();
        info!(released, "Coordinator shutting down, grants frozen");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    pub fn status(&self) -> StatusSnapshot {
        self.lock().queue.snapshot()
    }

    /// No granted and no pending items.
    pub fn is_idle(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Run one supervision pass and return when the next one is due.
    pub fn tick(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut state = self.lock();

        if let Some(id) = state.queue.reclaim_stuck(now.into_std()) {
            state.waiters.remove(&id);
            warn!(%id, "Grant not reported within ceiling, reclaimed");
        }
        for id in state.queue.expire_waits(now.into_std()) {
            state.waiters.remove(&id);
            debug!(%id, "Queued item expired without a waiter");
        }
        state.pump(now);

        state.queue.next_wake().map(Instant::from_std)
    }

    /// Supervisor loop. Runs until `cancel` fires.
    pub async fn supervise(&self, cancel: CancellationToken) {
        debug!("Supervisor started");
        loop {
            let wake = self.tick().unwrap_or_else(|| Instant::now() + IDLE_TICK);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.changed.notified() => {}
                () = tokio::time::sleep_until(wake) => {}
            }
        }
        debug!("Supervisor stopped");
    }
}

impl State {
    /// Grant the next item if possible and wake its waiter.
    fn pump(&mut self, now: Instant) {
        if self.shutting_down {
            return;
        }
        if let Some(id) = self.queue.grant_next(now.into_std()) {
            let waiting = self
                .waiters
                .remove(&id)
                .is_some_and(|tx| tx.send(()).is_ok());
            info!(%id, waiting, "Granted");
        }
    }
}

fn shutting_down() -> SpeakError {
    SpeakError::unreachable("daemon is shutting down")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use voxgate_core::{Priority, VoiceConfig};

    fn config() -> DaemonConfig {
        DaemonConfig {
            grant_settle: Duration::ZERO,
            ..DaemonConfig::new(PathBuf::from("/unused.sock"))
        }
    }

    fn request(text: &str, priority: Priority) -> EnqueueRequest {
        EnqueueRequest {
            text: text.into(),
            priority,
            voice_config: VoiceConfig::default(),
            session_id: "s1".into(),
            agent_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lone_item_is_granted_immediately_without_settle() {
        let coord = Coordinator::new(&config());
        let id = coord
            .enqueue(ConnectionId::next(), request("hi", Priority::Normal))
            .unwrap();
        let outcome = coord.wait_for_grant(id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_and_releases_the_queue() {
        let coord = Coordinator::new(&config());
        let owner = ConnectionId::next();
        let first = coord.enqueue(owner, request("one", Priority::High)).unwrap();
        let second = coord.enqueue(owner, request("two", Priority::Normal)).unwrap();

        let outcome = coord
            .wait_for_grant(second, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(outcome, GrantOutcome::TimedOut);
        assert!(coord.status().pending.is_empty());

        // The abandoned item can never be waited on again.
        assert!(coord.wait_for_grant(second, Duration::from_secs(1)).await.is_err());
        coord.report_complete(first, 10).unwrap();
        assert!(coord.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_hands_the_grant_to_a_parked_waiter() {
        let coord = Arc::new(Coordinator::new(&config()));
        let owner = ConnectionId::next();
        let first = coord.enqueue(owner, request("one", Priority::Normal)).unwrap();
        let second = coord.enqueue(owner, request("two", Priority::Normal)).unwrap();

        let waiter = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.wait_for_grant(second, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        coord.report_complete(first, 100).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), GrantOutcome::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn second_concurrent_wait_is_rejected() {
        let coord = Arc::new(Coordinator::new(&config()));
        let owner = ConnectionId::next();
        coord.enqueue(owner, request("one", Priority::Normal)).unwrap();
        let second = coord.enqueue(owner, request("two", Priority::Normal)).unwrap();

        let coord2 = Arc::clone(&coord);
        let _parked =
            tokio::spawn(async move { coord2.wait_for_grant(second, Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = coord
            .wait_for_grant(second, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_frees_the_grant_for_others() {
        let coord = Coordinator::new(&config());
        let gone = ConnectionId::next();
        let staying = ConnectionId::next();
        coord.enqueue(gone, request("one", Priority::High)).unwrap();
        let other = coord.enqueue(staying, request("two", Priority::Low)).unwrap();

        coord.disconnect(gone);
        let outcome = coord.wait_for_grant(other, Duration::from_millis(10)).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Granted);
        assert_eq!(coord.status().abandoned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_reclaims_a_stuck_grant() {
        let coord = Arc::new(Coordinator::new(&config()));
        let cancel = CancellationToken::new();
        let supervisor = {
            let coord = Arc::clone(&coord);
            let cancel = cancel.clone();
            tokio::spawn(async move { coord.supervise(cancel).await })
        };

        let owner = ConnectionId::next();
        let stuck = coord.enqueue(owner, request("one", Priority::Normal)).unwrap();
        let next = coord.enqueue(owner, request("two", Priority::Normal)).unwrap();
        assert_eq!(coord.status().active.unwrap().id, stuck);

        let outcome = coord
            .wait_for_grant(next, Duration::from_secs(90))
            .await
            .unwrap();
        assert_eq!(outcome, GrantOutcome::Granted);
        assert_eq!(coord.status().reclaimed, 1);
        assert!(coord.report_complete(stuck, 1).is_err());

        cancel.cancel();
        supervisor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_freezes_grants_and_releases_waiters() {
        let coord = Arc::new(Coordinator::new(&config()));
        let holder = ConnectionId::next();
        let other = ConnectionId::next();
        let speaking = coord.enqueue(holder, request("one", Priority::Normal)).unwrap();
        let parked = coord.enqueue(other, request("two", Priority::High)).unwrap();
        assert_eq!(coord.status().active.unwrap().id, speaking);

        let waiter = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.wait_for_grant(parked, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        coord.shut_down();
        assert!(coord.is_shutting_down());
        assert_eq!(waiter.await.unwrap().unwrap(), GrantOutcome::ShuttingDown);

        // The holder going away must not hand the grant on.
        coord.disconnect(holder);
        coord.tick();
        assert!(coord.status().active.is_none());

        let err = coord
            .enqueue(ConnectionId::next(), request("late", Priority::High))
            .unwrap_err();
        assert!(err.falls_back_to_lock());
        assert_eq!(
            coord.wait_for_grant(parked, Duration::from_secs(1)).await.unwrap(),
            GrantOutcome::ShuttingDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ids_are_invalid() {
        let coord = Coordinator::new(&config());
        let err = coord
            .wait_for_grant(ItemId::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::InvalidRequest(_)));
        assert!(coord.report_failed(ItemId::new(), "boom").is_err());
    }
}
