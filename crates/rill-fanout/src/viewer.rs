//! Viewer side of the relay - subscriptions and their delivery state

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;

use rill_core::{DisconnectReason, RillError, RillResult, Segment, SegmentId, ViewerId};

use crate::relay::RelayInner;

/// Where a new viewer starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAt {
    /// Only segments sealed after attach
    #[default]
    Latest,
    /// Retained segments from this id onward, then live
    From(SegmentId),
}

#[derive(Debug, Default)]
struct LinkState {
    /// Segments enqueued but not yet received
    queued: usize,
    /// Since when the head of the queue has been waiting
    pending_since: Option<Instant>,
    /// Set once, when the relay lets go of the viewer
    reason: Option<DisconnectReason>,
}

/// Delivery bookkeeping shared by the relay and the subscription
#[derive(Debug, Default)]
pub(crate) struct ViewerLink {
    state: Mutex<LinkState>,
}

impl ViewerLink {
    pub(crate) fn on_enqueue(&self, now: Instant) {
        let mut state = self.state.lock();
        if state.queued == 0 {
            state.pending_since = Some(now);
        }
        state.queued += 1;
    }

    pub(crate) fn on_dequeue(&self, now: Instant) {
        let mut state = self.state.lock();
        state.queued = state.queued.saturating_sub(1);
        state.pending_since = if state.queued > 0 { Some(now) } else { None };
    }

    /// Undo an `on_enqueue` whose send failed
    pub(crate) fn on_rejected(&self) {
        let mut state = self.state.lock();
        state.queued = state.queued.saturating_sub(1);
        if state.queued == 0 {
            state.pending_since = None;
        }
    }

    /// Pending segments have waited at least `timeout` without progress
    pub(crate) fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        let state = self.state.lock();
        state.queued > 0
            && state
                .pending_since
                .is_some_and(|since| now.saturating_duration_since(since) >= timeout)
    }

    /// Record why the viewer was let go. The first reason wins.
    pub(crate) fn set_reason(&self, reason: DisconnectReason) {
        self.state.lock().reason.get_or_insert(reason);
    }

    pub(crate) fn reason(&self) -> Option<DisconnectReason> {
        self.state.lock().reason
    }

    pub(crate) fn queued(&self) -> usize {
        self.state.lock().queued
    }
}

/// A viewer's handle on the relay.
///
/// Segments arrive in strictly increasing id order, each at most once.
/// Dropping the subscription detaches the viewer and frees its queue.
pub struct Subscription {
    pub(crate) id: ViewerId,
    pub(crate) rx: mpsc::Receiver<Segment>,
    pub(crate) link: Arc<ViewerLink>,
    pub(crate) relay: Weak<RelayInner>,
    pub(crate) last_received: Option<SegmentId>,
}

impl Subscription {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Id of the last segment handed to this viewer
    pub fn last_received(&self) -> Option<SegmentId> {
        self.last_received
    }

    /// Segments waiting in the outbound queue
    pub fn queued(&self) -> usize {
        self.link.queued()
    }

    /// Why the relay let go of this viewer, once it has
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.link.reason()
    }

    /// Next segment, or `ViewerDisconnected` once the queue is drained
    /// after the relay let go of the viewer.
    pub async fn recv(&mut self) -> RillResult<Segment> {
        match self.rx.recv().await {
            Some(segment) => Ok(self.received(segment)),
            None => Err(self.disconnected()),
        }
    }

    /// Non-waiting variant of [`Subscription::recv`]; `Ok(None)` if nothing is queued
    pub fn try_recv(&mut self) -> RillResult<Option<Segment>> {
        match self.rx.try_recv() {
            Ok(segment) => Ok(Some(self.received(segment))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Detach explicitly
    pub fn detach(self) {}

    fn received(&mut self, segment: Segment) -> Segment {
        self.link.on_dequeue(Instant::now());
        self.last_received = Some(segment.id());
        segment
    }

    fn disconnected(&self) -> RillError {
        RillError::ViewerDisconnected {
            viewer: self.id,
            reason: self.link.reason().unwrap_or(DisconnectReason::Detached),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.upgrade() {
            relay.release(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("last_received", &self.last_received)
            .field("queued", &self.queued())
            .finish()
    }
}
