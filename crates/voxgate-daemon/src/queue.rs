//! Speech queue state machine.
//!
//! # Design
//!
//! - Pure synchronous state (no async, no IO, no tracing)
//! - Callers pass the current [`Instant`], so tests drive time explicitly
//! - Terminal items are dropped immediately; only counters remember them
//!
//! # Position Semantics
//!
//! - Position 0 = the granted item
//! - Position 1+ = pending items in grant order

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use voxgate_core::{
    EnqueueRequest, InvalidTransition, ItemId, ItemState, ItemSummary, Priority, QueueItem,
    SpeakError, StatusSnapshot,
};

/// Identifies the producer connection that enqueued an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Rejected queue operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("text is empty")]
    EmptyText,

    #[error("queue full ({0} items)")]
    QueueFull(usize),

    #[error("unknown item {0}")]
    UnknownItem(ItemId),

    #[error("item {0} does not hold the grant")]
    NotActive(ItemId),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl From<QueueError> for SpeakError {
    fn from(err: QueueError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Terminal outcome counters since the daemon started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub reclaimed: u64,
}

/// Timing knobs for grant decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTiming {
    /// How long the oldest pending item must have waited before a grant is
    /// made while nothing is active.
    pub settle: Duration,
    /// How long a granted item may stay unreported.
    pub ceiling: Duration,
}

struct Entry {
    item: QueueItem,
    owner: ConnectionId,
    queued_at: Instant,
    /// Queued items still pending at this instant are abandoned.
    wait_deadline: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Active {
    id: ItemId,
    granted_at: Instant,
}

type PendingKey = (Reverse<Priority>, u64);

/// Priority queue of speech requests with at most one granted item.
pub struct SpeechQueue {
    capacity: usize,
    timing: QueueTiming,
    next_seq: u64,
    items: HashMap<ItemId, Entry>,
    pending: BTreeMap<PendingKey, ItemId>,
    active: Option<Active>,
    stats: QueueStats,
}

impl SpeechQueue {
    pub fn new(capacity: usize, timing: QueueTiming) -> Self {
        Self {
            capacity,
            timing,
            next_seq: 0,
            items: HashMap::new(),
            pending: BTreeMap::new(),
            active: None,
            stats: QueueStats::default(),
        }
    }

    /// Queued plus granted items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn active(&self) -> Option<ItemId> {
        self.active.map(|a| a.id)
    }

    pub const fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn state_of(&self, id: ItemId) -> Option<ItemState> {
        self.items.get(&id).map(|e| e.item.state)
    }

    pub fn owner_of(&self, id: ItemId) -> Option<ConnectionId> {
        self.items.get(&id).map(|e| e.owner)
    }

    /// Add a request. Never grants; call [`grant_next`](Self::grant_next).
    pub fn enqueue(
        &mut self,
        owner: ConnectionId,
        request: EnqueueRequest,
        now: Instant,
        wait_deadline: Instant,
    ) -> Result<ItemId, QueueError> {
        if request.text.trim().is_empty() {
            return Err(QueueError::EmptyText);
        }
        if self.items.len() >= self.capacity {
            return Err(QueueError::QueueFull(self.capacity));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let item = QueueItem {
            id: ItemId::new(),
            text: request.text,
            priority: request.priority,
            voice_config: request.voice_config,
            session_id: request.session_id,
            agent_id: request.agent_id,
            enqueued_at: Utc::now(),
            seq,
            state: ItemState::Queued,
        };
        let id = item.id;

        self.pending.insert((Reverse(item.priority), seq), id);
        self.items.insert(
            id,
            Entry {
                item,
                owner,
                queued_at: now,
                wait_deadline,
            },
        );
        Ok(id)
    }

    /// Move a queued item's expiry (a producer started waiting on it).
    pub fn set_wait_deadline(&mut self, id: ItemId, deadline: Instant) -> Result<(), QueueError> {
        let entry = self.items.get_mut(&id).ok_or(QueueError::UnknownItem(id))?;
        entry.wait_deadline = deadline;
        Ok(())
    }

    /// Grant the best pending item if nothing holds the grant and the settle
    /// window has passed.
    pub fn grant_next(&mut self, now: Instant) -> Option<ItemId> {
        let ready_at = self.grant_ready_at()?;
        if now < ready_at {
            return None;
        }

        let (_, id) = self.pending.pop_first()?;
        let entry = self.items.get_mut(&id)?;
        // Pending items are always queued, so this cannot fail.
        entry.item.transition(ItemState::Granted).ok()?;
        self.active = Some(Active { id, granted_at: now });
        Some(id)
    }

    /// Report the granted item as spoken.
    pub fn complete(&mut self, id: ItemId) -> Result<QueueItem, QueueError> {
        let item = self.finish_active(id, ItemState::Completed)?;
        self.stats.completed += 1;
        Ok(item)
    }

    /// Report the granted item as failed.
    pub fn fail(&mut self, id: ItemId) -> Result<QueueItem, QueueError> {
        let item = self.finish_active(id, ItemState::Failed)?;
        self.stats.failed += 1;
        Ok(item)
    }

    /// Drop a queued or granted item so it can never be granted again.
    ///
    /// Returns the state it had before.
    pub fn abandon(&mut self, id: ItemId) -> Result<ItemState, QueueError> {
        let previous = self.remove_abandoned(id)?;
        self.stats.abandoned += 1;
        Ok(previous)
    }

    /// Abandon every item enqueued by `owner`.
    pub fn remove_owned(&mut self, owner: ConnectionId) -> Vec<ItemId> {
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            // Ids come from the map, so the item exists and is not terminal.
            let _ = self.abandon(*id);
        }
        ids
    }

    /// Abandon queued items whose wait deadline has passed.
    pub fn expire_waits(&mut self, now: Instant) -> Vec<ItemId> {
        let expired: Vec<ItemId> = self
            .pending
            .values()
            .filter(|id| self.items.get(*id).is_some_and(|e| e.wait_deadline <= now))
            .copied()
            .collect();
        for id in &expired {
            let _ = self.abandon(*id);
        }
        expired
    }

    /// Take the grant back from an item that outlived the ceiling.
    pub fn reclaim_stuck(&mut self, now: Instant) -> Option<ItemId> {
        let active = self.active?;
        if now.saturating_duration_since(active.granted_at) < self.timing.ceiling {
            return None;
        }
        self.remove_abandoned(active.id).ok()?;
        self.stats.reclaimed += 1;
        Some(active.id)
    }

    /// Earliest instant at which [`grant_next`](Self::grant_next),
    /// [`expire_waits`](Self::expire_waits) or
    /// [`reclaim_stuck`](Self::reclaim_stuck) could change something.
    pub fn next_wake(&self) -> Option<Instant> {
        let grant = self.grant_ready_at();
        let ceiling = self.active.map(|a| a.granted_at + self.timing.ceiling);
        let expiry = self
            .pending
            .values()
            .filter_map(|id| self.items.get(id))
            .map(|e| e.wait_deadline)
            .min();
        [grant, ceiling, expiry].into_iter().flatten().min()
    }

    /// Point-in-time view for `status` replies.
    pub fn snapshot(&self) -> StatusSnapshot {
        let active = self
            .active
            .and_then(|a| self.items.get(&a.id))
            .map(|e| summary(&e.item, 0));
        let pending = self
            .pending
            .values()
            .filter_map(|id| self.items.get(id))
            .enumerate()
            .map(|(i, e)| summary(&e.item, i + 1))
            .collect();

        StatusSnapshot {
            active,
            pending,
            completed: self.stats.completed,
            failed: self.stats.failed,
            abandoned: self.stats.abandoned,
            reclaimed: self.stats.reclaimed,
        }
    }

    fn grant_ready_at(&self) -> Option<Instant> {
        if self.active.is_some() {
            return None;
        }
        self.pending
            .values()
            .filter_map(|id| self.items.get(id))
            .map(|e| e.queued_at)
            .min()
            .map(|oldest| oldest + self.timing.settle)
    }

    fn finish_active(&mut self, id: ItemId, next: ItemState) -> Result<QueueItem, QueueError> {
        if self.active.map(|a| a.id) != Some(id) {
            return Err(if self.items.contains_key(&id) {
                QueueError::NotActive(id)
            } else {
                QueueError::UnknownItem(id)
            });
        }
        let mut entry = self.items.remove(&id).ok_or(QueueError::UnknownItem(id))?;
        self.active = None;
        entry.item.transition(next)?;
        Ok(entry.item)
    }

    fn remove_abandoned(&mut self, id: ItemId) -> Result<ItemState, QueueError> {
        let mut entry = self.items.remove(&id).ok_or(QueueError::UnknownItem(id))?;
        let previous = entry.item.state;
        match previous {
            ItemState::Queued => {
                self.pending
                    .remove(&(Reverse(entry.item.priority), entry.item.seq));
            }
            ItemState::Granted => self.active = None,
            _ => {}
        }
        entry.item.transition(ItemState::Abandoned)?;
        Ok(previous)
    }
}

fn summary(item: &QueueItem, position: usize) -> ItemSummary {
    ItemSummary {
        id: item.id,
        priority: item.priority,
        state: item.state,
        session_id: item.session_id.clone(),
        agent_id: item.agent_id.clone(),
        text_length: item.text_length(),
        enqueued_at: item.enqueued_at,
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTLE: Duration = Duration::from_millis(50);

    fn queue() -> SpeechQueue {
        SpeechQueue::new(
            8,
            QueueTiming {
                settle: SETTLE,
                ceiling: Duration::from_secs(60),
            },
        )
    }

    fn request(text: &str, priority: Priority) -> EnqueueRequest {
        EnqueueRequest {
            text: text.into(),
            priority,
            voice_config: voxgate_core::VoiceConfig::default(),
            session_id: "s1".into(),
            agent_id: None,
        }
    }

    fn push(q: &mut SpeechQueue, text: &str, priority: Priority, now: Instant) -> ItemId {
        q.enqueue(
            ConnectionId(1),
            request(text, priority),
            now,
            now + Duration::from_secs(30),
        )
        .unwrap()
    }

    fn text_of(q: &SpeechQueue, id: ItemId) -> String {
        q.items[&id].item.text.clone()
    }

    #[test]
    fn grants_by_priority_then_arrival() {
        let t0 = Instant::now();
        let mut q = queue();
        push(&mut q, "A", Priority::Normal, t0);
        push(&mut q, "B", Priority::High, t0);
        push(&mut q, "C", Priority::Low, t0);
        push(&mut q, "D", Priority::Normal, t0);

        let mut order = Vec::new();
        let now = t0 + SETTLE;
        while let Some(id) = q.grant_next(now) {
            order.push(text_of(&q, id));
            q.complete(id).unwrap();
        }
        assert_eq!(order, ["B", "A", "D", "C"]);
        assert_eq!(q.stats().completed, 4);
    }

    #[test]
    fn at_most_one_grant() {
        let t0 = Instant::now();
        let mut q = queue();
        push(&mut q, "A", Priority::Normal, t0);
        push(&mut q, "B", Priority::High, t0);

        let first = q.grant_next(t0 + SETTLE).unwrap();
        assert!(q.grant_next(t0 + SETTLE * 10).is_none());
        assert_eq!(q.active(), Some(first));
    }

    #[test]
    fn settle_window_delays_first_grant_only() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = push(&mut q, "A", Priority::Normal, t0);
        assert!(q.grant_next(t0).is_none());
        assert_eq!(q.next_wake(), Some(t0 + SETTLE));
        assert_eq!(q.grant_next(t0 + SETTLE), Some(a));

        // B's own window has run out by the time A finishes.
        let b = push(&mut q, "B", Priority::Normal, t0 + SETTLE);
        q.complete(a).unwrap();
        assert_eq!(q.grant_next(t0 + SETTLE * 2), Some(b));
    }

    #[test]
    fn empty_text_is_rejected() {
        let t0 = Instant::now();
        let mut q = queue();
        let err = q
            .enqueue(ConnectionId(1), request("  \n", Priority::High), t0, t0)
            .unwrap_err();
        assert_eq!(err, QueueError::EmptyText);
        assert!(q.is_empty());
    }

    #[test]
    fn capacity_counts_the_active_item() {
        let t0 = Instant::now();
        let mut q = SpeechQueue::new(
            2,
            QueueTiming {
                settle: Duration::ZERO,
                ceiling: Duration::from_secs(60),
            },
        );
        push(&mut q, "A", Priority::Normal, t0);
        q.grant_next(t0).unwrap();
        push(&mut q, "B", Priority::Normal, t0);

        let err = q
            .enqueue(ConnectionId(1), request("C", Priority::High), t0, t0)
            .unwrap_err();
        assert_eq!(err, QueueError::QueueFull(2));
    }

    #[test]
    fn reports_require_the_grant() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = push(&mut q, "A", Priority::High, t0);
        let b = push(&mut q, "B", Priority::Low, t0);

        assert_eq!(q.complete(a).unwrap_err(), QueueError::NotActive(a));
        q.grant_next(t0 + SETTLE).unwrap();
        assert_eq!(q.fail(b).unwrap_err(), QueueError::NotActive(b));
        assert_eq!(q.fail(a).unwrap().state, ItemState::Failed);

        // Terminal items are gone.
        assert_eq!(q.complete(a).unwrap_err(), QueueError::UnknownItem(a));
        assert_eq!(q.stats().failed, 1);
    }

    #[test]
    fn abandoned_items_are_never_granted() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = push(&mut q, "A", Priority::High, t0);
        let b = push(&mut q, "B", Priority::Normal, t0);

        assert_eq!(q.abandon(a).unwrap(), ItemState::Queued);
        assert_eq!(q.grant_next(t0 + SETTLE), Some(b));
        assert!(q.state_of(a).is_none());
        assert!(q.abandon(a).is_err());
    }

    #[test]
    fn abandoning_the_active_item_frees_the_grant() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = push(&mut q, "A", Priority::High, t0);
        let b = push(&mut q, "B", Priority::Normal, t0);

        q.grant_next(t0 + SETTLE).unwrap();
        assert_eq!(q.abandon(a).unwrap(), ItemState::Granted);
        assert_eq!(q.grant_next(t0 + SETTLE), Some(b));
    }

    #[test]
    fn remove_owned_leaves_other_connections_alone() {
        let t0 = Instant::now();
        let deadline = t0 + Duration::from_secs(30);
        let mut q = queue();
        let mine = q
            .enqueue(ConnectionId(7), request("A", Priority::High), t0, deadline)
            .unwrap();
        let theirs = q
            .enqueue(ConnectionId(8), request("B", Priority::Low), t0, deadline)
            .unwrap();
        q.grant_next(t0 + SETTLE).unwrap();

        assert_eq!(q.remove_owned(ConnectionId(7)), vec![mine]);
        assert_eq!(q.state_of(theirs), Some(ItemState::Queued));
        assert_eq!(q.active(), None);
        assert_eq!(q.owner_of(theirs), Some(ConnectionId(8)));
    }

    #[test]
    fn expired_waits_are_abandoned() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = push(&mut q, "A", Priority::Normal, t0);
        let b = push(&mut q, "B", Priority::Normal, t0);
        q.set_wait_deadline(b, t0 + Duration::from_secs(90)).unwrap();

        assert!(q.expire_waits(t0 + Duration::from_secs(29)).is_empty());
        assert_eq!(q.expire_waits(t0 + Duration::from_secs(30)), vec![a]);
        assert_eq!(q.state_of(b), Some(ItemState::Queued));
        assert_eq!(q.stats().abandoned, 1);
    }

    #[test]
    fn stuck_grant_is_reclaimed_after_ceiling() {
        let t0 = Instant::now();
        let mut q = queue();
        let a = push(&mut q, "A", Priority::Normal, t0);
        let granted_at = t0 + SETTLE;
        q.grant_next(granted_at).unwrap();

        assert!(q.reclaim_stuck(granted_at + Duration::from_secs(59)).is_none());
        assert_eq!(q.next_wake(), Some(granted_at + Duration::from_secs(60)));
        assert_eq!(q.reclaim_stuck(granted_at + Duration::from_secs(60)), Some(a));
        assert_eq!(q.active(), None);
        assert_eq!(q.stats().reclaimed, 1);
    }

    #[test]
    fn snapshot_lists_positions() {
        let t0 = Instant::now();
        let mut q = queue();
        push(&mut q, "first", Priority::Normal, t0);
        push(&mut q, "second", Priority::Low, t0);
        push(&mut q, "third", Priority::High, t0);
        q.grant_next(t0 + SETTLE).unwrap();

        let snap = q.snapshot();
        let active = snap.active.unwrap();
        assert_eq!(active.priority, Priority::High);
        assert_eq!(active.position, 0);
        assert_eq!(active.text_length, 5);
        let pending: Vec<(Priority, usize)> =
            snap.pending.iter().map(|s| (s.priority, s.position)).collect();
        assert_eq!(pending, vec![(Priority::Normal, 1), (Priority::Low, 2)]);
    }
}
