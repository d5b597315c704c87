//! Relay scenarios - one session driven end to end
//!
//! The harness owns a [`SessionManager`] with a single session and lets a
//! test seal segments by hand, run a scripted producer, and attach
//! recording or stalled viewers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use rill_core::{
    CaptureTime, DisconnectReason, RillError, RillResult, Segment, SegmentId, SessionId,
};
use rill_fanout::StartAt;
use rill_ingest::{IngestSummary, SegmentPublisher};
use rill_runtime::{RillConfig, Session, SessionManager};

use crate::{RecordingViewer, ScriptedProducer, StalledViewer};

/// Session every scenario runs on
pub const SCENARIO_SESSION: SessionId = SessionId(1);

/// How long a spawned viewer waits for its session to end
pub const VIEWER_LIMIT: Duration = Duration::from_secs(30);

/// Segment with a fixed two-second duration
pub fn segment(id: u64, payload: &[u8]) -> Segment {
    Segment::new(
        SegmentId::new(id),
        Bytes::copy_from_slice(payload),
        CaptureTime::from_millis(id as i64 * 2_000),
        Duration::from_secs(2),
    )
}

/// Small relay settings
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub max_segments: usize,
    pub queue_capacity: usize,
    pub segment_bytes: usize,
    pub segment_duration: Duration,
    pub delivery_timeout: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            max_segments: 8,
            queue_capacity: 4,
            segment_bytes: 16,
            segment_duration: Duration::from_secs(2),
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

impl ScenarioConfig {
    pub fn to_rill_config(&self) -> RillConfig {
        let mut config = RillConfig::default();
        config.store.max_segments = self.max_segments;
        config.ingest.max_segment_bytes = self.segment_bytes;
        config.ingest.read_chunk_size = self.segment_bytes;
        config.ingest.target_duration = self.segment_duration;
        config.fanout.queue_capacity = self.queue_capacity;
        config.fanout.delivery_timeout = self.delivery_timeout;
        config
    }
}

/// One session plus the viewers watching it
pub struct RelayHarness {
    manager: Arc<SessionManager>,
    session: Arc<Session>,
}

impl RelayHarness {
    /// Harness with an `Ingesting` session
    pub fn new(config: ScenarioConfig) -> RillResult<Self> {
        let manager = Arc::new(SessionManager::new(config.to_rill_config())?);
        let session = manager.start_ingest(SCENARIO_SESSION)?;
        Ok(RelayHarness { manager, session })
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Seal a segment by hand, as the ingest writer would
    pub fn seal(&self, id: u64, payload: &[u8]) -> RillResult<()> {
        self.session.publish(segment(id, payload))
    }

    pub fn recording(&self, start: StartAt) -> RillResult<RecordingViewer> {
        Ok(RecordingViewer::new(self.session.attach(start)?))
    }

    pub fn stalled(&self, start: StartAt) -> RillResult<StalledViewer> {
        Ok(StalledViewer::new(self.session.attach(start)?))
    }

    /// Viewer task that records until the session lets it go
    pub fn spawn_recording(
        &self,
        start: StartAt,
    ) -> RillResult<JoinHandle<RillResult<RecordingViewer>>> {
        let mut viewer = self.recording(start)?;
        Ok(tokio::spawn(async move {
            viewer.run_to_end(VIEWER_LIMIT).await?;
            Ok(viewer)
        }))
    }

    /// Play `producer` into the session until it ends
    pub async fn ingest(&self, producer: ScriptedProducer) -> RillResult<IngestSummary> {
        self.manager
            .drive_ingest(self.session.clone(), producer, None)
            .await
    }
}

/// capacity 3, append 1..=4 -> {2,3,4}; export(1,2) unavailable; export(3,4) = seg3 + seg4
pub async fn scenario_capacity_eviction() -> RillResult<bool> {
    let harness = RelayHarness::new(ScenarioConfig {
        max_segments: 3,
        ..Default::default()
    })?;
    for id in 1..=4u64 {
        harness.seal(id, format!("seg{}", id).as_bytes())?;
    }

    let store = harness.session().store();
    let retained: Vec<u64> = store.snapshot().iter().map(|s| s.id().as_u64()).collect();

    let mut sink = Vec::new();
    let evicted = harness
        .session()
        .export(SegmentId::new(1), SegmentId::new(2), &mut sink)
        .await;
    let report = harness
        .session()
        .export(SegmentId::new(3), SegmentId::new(4), &mut sink)
        .await?;

    Ok(retained == vec![2, 3, 4]
        && matches!(evicted, Err(RillError::RangeUnavailable { .. }))
        && sink == b"seg3seg4"
        && report.segments == 2)
}

/// Attach at latest after 1,2; then 3 -> the viewer sees only 3
pub fn scenario_latest_attach() -> RillResult<Vec<u64>> {
    let harness = RelayHarness::new(ScenarioConfig::default())?;
    harness.seal(1, b"one")?;
    harness.seal(2, b"two")?;

    let mut viewer = harness.recording(StartAt::Latest)?;
    harness.seal(3, b"three")?;
    viewer.drain()?;
    Ok(viewer.received_ids())
}

/// Producer ends mid-segment -> a final short segment is sealed
pub async fn scenario_final_short_segment() -> RillResult<Vec<Segment>> {
    let harness = RelayHarness::new(ScenarioConfig {
        segment_bytes: 8,
        ..Default::default()
    })?;
    let producer = ScriptedProducer::new([crate::Step::Data(b"0123456789ab".to_vec())]);
    harness.ingest(producer).await?;
    Ok(harness.session().store().snapshot())
}

/// Outcome of a stalled-viewer run
#[derive(Debug, Clone)]
pub struct StallReport {
    /// Appends after which the stalled viewer was gone
    pub dropped_after: Option<u64>,
    pub reason: Option<DisconnectReason>,
    /// What the healthy viewer received
    pub healthy: Vec<u64>,
}

/// One viewer never reads, another keeps up, `appends` segments are sealed
pub fn scenario_stalled_viewer(queue_capacity: usize, appends: u64) -> RillResult<StallReport> {
    let harness = RelayHarness::new(ScenarioConfig {
        queue_capacity,
        max_segments: appends as usize + 1,
        ..Default::default()
    })?;
    let stalled = harness.stalled(StartAt::Latest)?;
    let mut healthy = harness.recording(StartAt::Latest)?;

    let mut dropped_after = None;
    for id in 1..=appends {
        harness.seal(id, b"frame")?;
        healthy.drain()?;
        if dropped_after.is_none() && stalled.disconnect_reason().is_some() {
            dropped_after = Some(id);
        }
    }

    Ok(StallReport {
        dropped_after,
        reason: stalled.disconnect_reason(),
        healthy: healthy.received_ids(),
    })
}

/// Outcome of a live run with a random producer
#[derive(Debug)]
pub struct LiveReport {
    pub summary: IngestSummary,
    pub expected: Vec<u8>,
    pub viewers: Vec<RecordingViewer>,
    pub stalled_reason: Option<DisconnectReason>,
}

/// Random producer, `viewers` recording viewers and one stalled viewer.
///
/// The stream seals well over `queue_capacity` segments, so the stalled
/// viewer always overflows.
pub async fn scenario_live_stream(seed: u64, viewers: usize) -> RillResult<LiveReport> {
    let config = ScenarioConfig {
        max_segments: 4,
        queue_capacity: 64,
        segment_bytes: 32,
        segment_duration: Duration::from_millis(20),
        delivery_timeout: Duration::from_secs(5),
    };
    let harness = RelayHarness::new(config)?;

    let handles = (0..viewers)
        .map(|_| harness.spawn_recording(StartAt::Latest))
        .collect::<RillResult<Vec<_>>>()?;
    let stalled = harness.stalled(StartAt::Latest)?;

    let producer = ScriptedProducer::random(seed, 4_096, 48, Duration::from_millis(2));
    let expected = producer.expected_bytes();
    let summary = harness.ingest(producer).await?;

    let mut recorded = Vec::with_capacity(handles.len());
    for handle in handles {
        let viewer = handle
            .await
            .map_err(|e| RillError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        recorded.push(viewer);
    }

    Ok(LiveReport {
        summary,
        expected,
        viewers: recorded,
        stalled_reason: stalled.disconnect_reason(),
    })
}
