//! Fan-out relay - pushes sealed segments to every attached viewer
//!
//! Each viewer owns a bounded outbound queue. Publishing never waits: a
//! viewer whose queue is full is dropped on the spot (drop-slow-viewer),
//! so the producer's latency is independent of viewer count and speed.
//!
//! Attach and publish serialize on the registry lock. Together with the
//! per-viewer `last_enqueued` cursor this gives exactly-once, in-order
//! delivery even when a viewer attaches while a segment is being sealed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rill_core::{
    DisconnectReason, FanoutConfig, RillError, RillResult, Segment, SegmentId, ViewerId,
};
use rill_store::SegmentStore;

use crate::viewer::{StartAt, Subscription, ViewerLink};

/// Relay counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub attached: u64,
    pub detached: u64,
    pub dropped_overflow: u64,
    pub dropped_timeout: u64,
    pub ended: u64,
    /// Segment deliveries into viewer queues, backfill included
    pub delivered: u64,
}

/// What one publish did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Viewers the segment was queued for
    pub delivered: usize,
    /// Viewers let go during this publish
    pub dropped: Vec<(ViewerId, DisconnectReason)>,
}

/// One registered viewer
struct ViewerSlot {
    tx: mpsc::Sender<Segment>,
    link: Arc<ViewerLink>,
    /// Lowest id this viewer may receive
    floor: SegmentId,
    /// Newest id queued for this viewer
    last_enqueued: Option<SegmentId>,
}

impl ViewerSlot {
    fn wants(&self, id: SegmentId) -> bool {
        id >= self.floor && self.last_enqueued.map_or(true, |last| id > last)
    }
}

#[derive(Default)]
struct Registry {
    viewers: HashMap<ViewerId, ViewerSlot>,
    /// Set once the relay stops taking live viewers
    closed: Option<DisconnectReason>,
    stats: RelayStats,
}

impl Registry {
    fn disconnect(&mut self, viewer: ViewerId, reason: DisconnectReason) -> bool {
        let Some(slot) = self.viewers.remove(&viewer) else {
            return false;
        };
        slot.link.set_reason(reason);

        match reason {
            DisconnectReason::QueueOverflow => self.stats.dropped_overflow += 1,
            DisconnectReason::DeliveryTimeout => self.stats.dropped_timeout += 1,
            DisconnectReason::Detached => self.stats.detached += 1,
            DisconnectReason::SessionEnded | DisconnectReason::SessionFailed => {
                self.stats.ended += 1
            }
        }

        if reason.is_drop() {
            warn!(
                viewer = %viewer,
                reason = %reason,
                last_enqueued = ?slot.last_enqueued,
                "dropping viewer"
            );
        } else {
            debug!(viewer = %viewer, reason = %reason, "viewer detached");
        }
        // Dropping the sender closes the queue once the viewer drains it.
        true
    }

    fn stalled(&self, now: Instant, config: &FanoutConfig) -> Vec<ViewerId> {
        self.viewers
            .iter()
            .filter(|(_, slot)| slot.link.is_stalled(now, config.delivery_timeout))
            .map(|(id, _)| *id)
            .collect()
    }
}

pub(crate) struct RelayInner {
    config: FanoutConfig,
    registry: Mutex<Registry>,
    next_viewer: AtomicU64,
    /// Subscriptions not yet dropped, attached or draining
    handles: AtomicUsize,
}

impl RelayInner {
    fn remove(&self, viewer: ViewerId, reason: DisconnectReason) -> bool {
        self.registry.lock().disconnect(viewer, reason)
    }

    /// A subscription handle went away
    pub(crate) fn release(&self, viewer: ViewerId) {
        self.handles.fetch_sub(1, Ordering::Relaxed);
        self.remove(viewer, DisconnectReason::Detached);
    }
}

/// Distributes sealed segments to independent viewers
#[derive(Clone)]
pub struct FanoutRelay {
    inner: Arc<RelayInner>,
}

impl FanoutRelay {
    pub fn new(config: FanoutConfig) -> RillResult<Self> {
        config.validate()?;
        Ok(FanoutRelay {
            inner: Arc::new(RelayInner {
                config,
                registry: Mutex::new(Registry::default()),
                next_viewer: AtomicU64::new(1),
                handles: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.inner.config
    }

    /// Register a viewer.
    ///
    /// `StartAt::From` backfills retained segments from `store`; it fails
    /// with `RangeUnavailable` if the start id was already evicted and with
    /// `BackfillTooLarge` if the backfill would not fit the viewer queue.
    /// Once the relay is closed, a viewer still receives its backfill and
    /// then observes the close reason.
    pub fn attach(&self, store: &SegmentStore, start: StartAt) -> RillResult<Subscription> {
        let capacity = self.inner.config.queue_capacity;
        let mut registry = self.inner.registry.lock();

        let latest = store.latest_id().ok();
        let (floor, backfill) = match start {
            StartAt::Latest => (latest.map_or(SegmentId::ZERO, SegmentId::next), Vec::new()),
            StartAt::From(from) => match store.range_from(from) {
                Ok(segments) => (from, segments),
                Err(RillError::Empty) => (from, Vec::new()),
                Err(e) => return Err(e),
            },
        };

        if backfill.len() > capacity {
            return Err(RillError::BackfillTooLarge {
                requested: backfill.len(),
                capacity,
            });
        }

        let id = ViewerId::new(self.inner.next_viewer.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity);
        let link = Arc::new(ViewerLink::default());
        let now = Instant::now();

        let mut last_enqueued = None;
        for segment in backfill {
            let segment_id = segment.id();
            link.on_enqueue(now);
            if tx.try_send(segment).is_err() {
                link.on_rejected();
                break;
            }
            last_enqueued = Some(segment_id);
            registry.stats.delivered += 1;
        }

        self.inner.handles.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            id,
            rx,
            link: link.clone(),
            relay: Arc::downgrade(&self.inner),
            last_received: None,
        };

        if let Some(reason) = registry.closed {
            // Read-only attach to finished history: drain backfill, then end.
            link.set_reason(reason);
            debug!(viewer = %id, reason = %reason, "attached to closed relay");
            return Ok(subscription);
        }

        registry.viewers.insert(
            id,
            ViewerSlot {
                tx,
                link,
                floor,
                last_enqueued,
            },
        );
        registry.stats.attached += 1;
        info!(
            viewer = %id,
            start = ?start,
            backfill = ?last_enqueued,
            viewers = registry.viewers.len(),
            "viewer attached"
        );

        Ok(subscription)
    }

    /// Queue a newly appended segment for every attached viewer
    pub fn publish(&self, segment: &Segment) -> PublishReport {
        self.publish_at(segment, Instant::now())
    }

    /// [`FanoutRelay::publish`] with an explicit clock
    pub fn publish_at(&self, segment: &Segment, now: Instant) -> PublishReport {
        let config = &self.inner.config;
        let mut registry = self.inner.registry.lock();
        let mut report = PublishReport::default();

        let stalled = registry.stalled(now, config);
        for (viewer, slot) in registry.viewers.iter_mut() {
            if stalled.contains(viewer) || !slot.wants(segment.id()) {
                continue;
            }

            slot.link.on_enqueue(now);
            match slot.tx.try_send(segment.clone()) {
                Ok(()) => {
                    slot.last_enqueued = Some(segment.id());
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    slot.link.on_rejected();
                    report.dropped.push((*viewer, DisconnectReason::QueueOverflow));
                }
                Err(TrySendError::Closed(_)) => {
                    slot.link.on_rejected();
                    report.dropped.push((*viewer, DisconnectReason::Detached));
                }
            }
        }
        report.dropped.extend(
            stalled
                .into_iter()
                .map(|viewer| (viewer, DisconnectReason::DeliveryTimeout)),
        );

        for (viewer, reason) in &report.dropped {
            registry.disconnect(*viewer, *reason);
        }
        registry.stats.delivered += report.delivered as u64;

        report
    }

    /// Drop viewers whose pending segments exceeded the delivery timeout
    pub fn sweep(&self, now: Instant) -> Vec<(ViewerId, DisconnectReason)> {
        let mut registry = self.inner.registry.lock();
        let stalled = registry.stalled(now, &self.inner.config);

        stalled
            .into_iter()
            .filter(|viewer| registry.disconnect(*viewer, DisconnectReason::DeliveryTimeout))
            .map(|viewer| (viewer, DisconnectReason::DeliveryTimeout))
            .collect()
    }

    /// Remove a viewer. Idempotent; returns whether it was attached.
    pub fn detach(&self, viewer: ViewerId) -> bool {
        self.inner.remove(viewer, DisconnectReason::Detached)
    }

    /// Let go of every viewer with `reason` and stop registering new ones.
    ///
    /// Viewers still receive what is already queued before they observe
    /// the disconnect.
    pub fn close(&self, reason: DisconnectReason) -> usize {
        let mut registry = self.inner.registry.lock();
        registry.closed.get_or_insert(reason);

        let viewers: Vec<ViewerId> = registry.viewers.keys().copied().collect();
        for viewer in &viewers {
            registry.disconnect(*viewer, reason);
        }
        if !viewers.is_empty() {
            info!(reason = %reason, viewers = viewers.len(), "relay closed");
        }
        viewers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed.is_some()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.registry.lock().viewers.len()
    }

    pub fn viewers(&self) -> Vec<ViewerId> {
        let mut viewers: Vec<_> = self.inner.registry.lock().viewers.keys().copied().collect();
        viewers.sort_by_key(|v| v.0);
        viewers
    }

    /// Live subscription handles, including ones draining after a close
    pub fn subscriber_count(&self) -> usize {
        self.inner.handles.load(Ordering::Relaxed)
    }

    pub fn is_attached(&self, viewer: ViewerId) -> bool {
        self.inner.registry.lock().viewers.contains_key(&viewer)
    }

    /// Newest segment queued for `viewer`
    pub fn last_delivered(&self, viewer: ViewerId) -> Option<SegmentId> {
        self.inner
            .registry
            .lock()
            .viewers
            .get(&viewer)
            .and_then(|slot| slot.last_enqueued)
    }

    pub fn stats(&self) -> RelayStats {
        self.inner.registry.lock().stats.clone()
    }
}

impl std::fmt::Debug for FanoutRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutRelay")
            .field("viewers", &self.viewer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
