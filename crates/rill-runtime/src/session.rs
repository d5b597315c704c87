//! Session - one ingest lifecycle and its retained window
//!
//! A session ties a segment store, a fan-out relay and an exporter
//! together behind the `Idle -> Ingesting -> (Terminated | Failed)` state
//! machine. It is the ingest writer's publisher: every sealed segment is
//! appended to the store and then pushed to viewers.

use std::path::Path;

use parking_lot::RwLock;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use rill_core::{
    CaptureTime, DisconnectReason, FanoutConfig, RillError, RillResult, Segment, SegmentId,
    SessionId, SessionState, StoreConfig, ViewerId,
};
use rill_export::{ExportReport, ExportStats, Exporter};
use rill_fanout::{FanoutRelay, RelayStats, StartAt, Subscription};
use rill_ingest::SegmentPublisher;
use rill_store::{SegmentStore, StoreStats};

/// Buffered session events per subscriber
const EVENT_CAPACITY: usize = 256;

/// Something that happened to a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        session: SessionId,
        from: SessionState,
        to: SessionState,
    },
    SegmentSealed {
        session: SessionId,
        segment: SegmentId,
        bytes: usize,
        delivered: usize,
    },
    /// Every segment up to and including `through` is gone
    Evicted {
        session: SessionId,
        through: SegmentId,
    },
    ViewerDropped {
        session: SessionId,
        viewer: ViewerId,
        reason: DisconnectReason,
    },
    IngestFailed {
        session: SessionId,
        error: String,
    },
}

/// Point-in-time view of a session
#[derive(Clone, Debug)]
pub struct SessionStats {
    pub state: SessionState,
    pub viewers: usize,
    pub store: StoreStats,
    pub relay: RelayStats,
    pub export: ExportStats,
}

pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    store: SegmentStore,
    relay: FanoutRelay,
    exporter: Exporter,
    events: broadcast::Sender<SessionEvent>,
    created_at: CaptureTime,
}

impl Session {
    pub fn new(id: SessionId, store: StoreConfig, fanout: FanoutConfig) -> RillResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Session {
            id,
            state: RwLock::new(SessionState::Idle),
            store: SegmentStore::new(store)?,
            relay: FanoutRelay::new(fanout)?,
            exporter: Exporter::new(),
            events,
            created_at: CaptureTime::now(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn created_at(&self) -> CaptureTime {
        self.created_at
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn relay(&self) -> &FanoutRelay {
        &self.relay
    }

    /// Receive events from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// `Idle -> Ingesting`
    pub fn begin_ingest(&self) -> RillResult<()> {
        self.transition(SessionState::Ingesting)
    }

    /// Producer ended cleanly. Viewers drain their queues, then end.
    pub fn terminate(&self) -> RillResult<()> {
        self.transition(SessionState::Terminated)?;
        self.relay.close(DisconnectReason::SessionEnded);
        Ok(())
    }

    /// Producer failed. Viewers are let go and the session becomes unreadable.
    pub fn fail(&self, error: &RillError) -> RillResult<()> {
        self.transition(SessionState::Failed)?;
        warn!(session = %self.id, error = %error, "session failed");
        self.emit(SessionEvent::IngestFailed {
            session: self.id,
            error: error.to_string(),
        });
        self.relay.close(DisconnectReason::SessionFailed);
        Ok(())
    }

    fn transition(&self, to: SessionState) -> RillResult<()> {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(RillError::InvalidTransition {
                    session: self.id,
                    from,
                    to,
                });
            }
            *state = to;
            from
        };

        info!(session = %self.id, from = %from, to = %to, "session state changed");
        self.emit(SessionEvent::StateChanged {
            session: self.id,
            from,
            to,
        });
        Ok(())
    }

    /// Register a viewer. A failed session accepts none.
    pub fn attach(&self, start: StartAt) -> RillResult<Subscription> {
        if self.state() == SessionState::Failed {
            return Err(RillError::SessionUnavailable(self.id));
        }
        self.relay.attach(&self.store, start)
    }

    pub fn detach(&self, viewer: ViewerId) -> bool {
        self.relay.detach(viewer)
    }

    /// Write retained segments `from..=to` to `sink`.
    ///
    /// A failed session has nothing to export. An export that started
    /// before the failure runs to completion against the retained window.
    pub async fn export<W>(
        &self,
        from: SegmentId,
        to: SegmentId,
        sink: &mut W,
    ) -> RillResult<ExportReport>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.check_exportable(from, to)?;
        self.exporter.export(&self.store, from, to, sink).await
    }

    pub async fn export_to_file(
        &self,
        from: SegmentId,
        to: SegmentId,
        path: &Path,
    ) -> RillResult<ExportReport> {
        self.check_exportable(from, to)?;
        self.exporter.export_to_file(&self.store, from, to, path).await
    }

    fn check_exportable(&self, from: SegmentId, to: SegmentId) -> RillResult<()> {
        if self.state() == SessionState::Failed {
            return Err(RillError::RangeUnavailable { from, to });
        }
        Ok(())
    }

    /// Drop viewers stalled past the delivery timeout
    pub fn sweep(&self, now: Instant) -> usize {
        let dropped = self.relay.sweep(now);
        for (viewer, reason) in &dropped {
            self.emit(SessionEvent::ViewerDropped {
                session: self.id,
                viewer: *viewer,
                reason: *reason,
            });
        }
        dropped.len()
    }

    /// Finished and every viewer handle is gone
    pub fn is_reapable(&self) -> bool {
        self.state().is_finished() && self.relay.subscriber_count() == 0
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state(),
            viewers: self.relay.viewer_count(),
            store: self.store.stats(),
            relay: self.relay.stats(),
            export: self.exporter.stats(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

impl SegmentPublisher for Session {
    fn publish(&self, segment: Segment) -> RillResult<()> {
        // Held across append and fan-out so no segment lands after a state change.
        let state = self.state.read();
        match *state {
            SessionState::Ingesting => {}
            SessionState::Failed => return Err(RillError::SessionUnavailable(self.id)),
            _ => return Err(RillError::IngestTerminated(self.id)),
        }

        let id = segment.id();
        let bytes = segment.len();
        let evicted = self.store.append(segment.clone())?;
        let report = self.relay.publish(&segment);
        drop(state);

        if let Some(through) = evicted {
            self.emit(SessionEvent::Evicted {
                session: self.id,
                through,
            });
        }
        self.emit(SessionEvent::SegmentSealed {
            session: self.id,
            segment: id,
            bytes,
            delivered: report.delivered,
        });
        for (viewer, reason) in report.dropped {
            self.emit(SessionEvent::ViewerDropped {
                session: self.id,
                viewer,
                reason,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("retained", &self.store.len())
            .field("viewers", &self.relay.viewer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn session(capacity: usize) -> Session {
        Session::new(
            SessionId::new(1),
            StoreConfig::with_max_segments(capacity),
            FanoutConfig {
                queue_capacity: 4,
                delivery_timeout: Duration::from_secs(5),
                sweep_interval: Duration::from_secs(1),
            },
        )
        .unwrap()
    }

    fn seg(id: u64) -> Segment {
        Segment::new(
            SegmentId::new(id),
            Bytes::from(format!("s{}", id)),
            CaptureTime::from_millis(id as i64),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_publish_only_while_ingesting() {
        let s = session(4);
        assert!(matches!(s.publish(seg(1)), Err(RillError::IngestTerminated(_))));

        s.begin_ingest().unwrap();
        s.publish(seg(1)).unwrap();
        s.terminate().unwrap();

        assert!(matches!(s.publish(seg(2)), Err(RillError::IngestTerminated(_))));
        assert_eq!(s.store().latest_id().unwrap(), SegmentId::new(1));
    }

    #[test]
    fn test_illegal_transitions() {
        let s = session(4);
        assert!(matches!(
            s.terminate(),
            Err(RillError::InvalidTransition { .. })
        ));
        s.begin_ingest().unwrap();
        assert!(s.begin_ingest().is_err());
        s.terminate().unwrap();
        assert!(s.fail(&RillError::Empty).is_err());
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn test_terminated_session_stays_readable() {
        let s = session(4);
        s.begin_ingest().unwrap();
        let mut live = s.attach(StartAt::Latest).unwrap();
        s.publish(seg(1)).unwrap();
        s.publish(seg(2)).unwrap();
        s.terminate().unwrap();

        assert_eq!(live.try_recv().unwrap().unwrap().id(), SegmentId::new(1));
        assert_eq!(live.try_recv().unwrap().unwrap().id(), SegmentId::new(2));
        assert!(matches!(
            live.try_recv(),
            Err(RillError::ViewerDisconnected {
                reason: DisconnectReason::SessionEnded,
                ..
            })
        ));

        let mut late = s.attach(StartAt::From(SegmentId::new(1))).unwrap();
        assert_eq!(late.try_recv().unwrap().unwrap().id(), SegmentId::new(1));
    }

    #[tokio::test]
    async fn test_failed_session_is_unavailable() {
        let s = session(4);
        s.begin_ingest().unwrap();
        let mut viewer = s.attach(StartAt::Latest).unwrap();
        s.publish(seg(1)).unwrap();
        s.fail(&RillError::IngestFailed {
            session: s.id(),
            reason: "reset".into(),
        })
        .unwrap();

        assert!(matches!(
            s.attach(StartAt::Latest),
            Err(RillError::SessionUnavailable(_))
        ));
        let mut sink = Vec::new();
        assert!(matches!(
            s.export(SegmentId::new(1), SegmentId::new(1), &mut sink).await,
            Err(RillError::RangeUnavailable { .. })
        ));

        viewer.try_recv().unwrap();
        assert!(matches!(
            viewer.try_recv(),
            Err(RillError::ViewerDisconnected {
                reason: DisconnectReason::SessionFailed,
                ..
            })
        ));
    }

    #[test]
    fn test_events_report_seal_and_eviction() {
        let s = session(2);
        let mut events = s.subscribe_events();
        s.begin_ingest().unwrap();
        for id in 1..=3 {
            s.publish(seg(id)).unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }

        assert!(matches!(
            seen[0],
            SessionEvent::StateChanged {
                to: SessionState::Ingesting,
                ..
            }
        ));
        assert!(seen.contains(&SessionEvent::Evicted {
            session: s.id(),
            through: SegmentId::new(1),
        }));
        let sealed = seen
            .iter()
            .filter(|e| matches!(e, SessionEvent::SegmentSealed { .. }))
            .count();
        assert_eq!(sealed, 3);
    }

    #[test]
    fn test_reapable_once_finished_and_unwatched() {
        let s = session(4);
        s.begin_ingest().unwrap();
        let viewer = s.attach(StartAt::Latest).unwrap();
        assert!(!s.is_reapable());

        s.terminate().unwrap();
        // still draining
        assert!(!s.is_reapable());
        drop(viewer);
        assert!(s.is_reapable());
    }
}
