//! Segmenter - slices a byte stream into sealed segments
//!
//! Pure state machine with an injected clock. A segment is sealed when it
//! reaches `max_segment_bytes` or when it has been open for
//! `target_duration`, whichever comes first. No sealed segment is ever
//! larger than `max_segment_bytes`.

use bytes::BytesMut;
use tokio::time::Instant;

use rill_core::{CaptureTime, IngestConfig, Segment, SegmentId};

/// Byte-stream slicer for one session
#[derive(Debug)]
pub struct Segmenter {
    config: IngestConfig,
    /// Id the next sealed segment receives
    next_id: SegmentId,
    /// Bytes of the open segment
    buffer: BytesMut,
    /// When the open segment received its first byte
    opened_at: Option<Instant>,
    /// Monotonic/wall clock pair used to stamp capture times
    epoch: Instant,
    epoch_wall: CaptureTime,
}

impl Segmenter {
    /// Create a segmenter whose first segment is [`SegmentId::FIRST`]
    pub fn new(config: IngestConfig) -> Self {
        Self::with_epoch(config, Instant::now(), CaptureTime::now())
    }

    /// Create a segmenter anchored to an explicit clock pair
    pub fn with_epoch(config: IngestConfig, epoch: Instant, epoch_wall: CaptureTime) -> Self {
        Segmenter {
            config,
            next_id: SegmentId::FIRST,
            buffer: BytesMut::new(),
            opened_at: None,
            epoch,
            epoch_wall,
        }
    }

    /// Id the next sealed segment will receive
    pub fn next_id(&self) -> SegmentId {
        self.next_id
    }

    /// Bytes waiting in the open segment
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// When the open segment must be sealed, if one is open
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.config.target_duration)
    }

    /// Feed producer bytes, returning every segment sealed as a result
    pub fn push(&mut self, mut data: &[u8], now: Instant) -> Vec<Segment> {
        let mut sealed = Vec::new();

        // An overdue segment is sealed before new bytes can join it.
        if self.is_due(now) {
            sealed.extend(self.seal(now));
        }

        while !data.is_empty() {
            if self.opened_at.is_none() {
                self.opened_at = Some(now);
            }

            let room = self.config.max_segment_bytes - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() >= self.config.max_segment_bytes {
                sealed.extend(self.seal(now));
            }
        }

        sealed
    }

    /// Seal the open segment if its deadline has passed
    pub fn poll_deadline(&mut self, now: Instant) -> Option<Segment> {
        if self.is_due(now) {
            self.seal(now)
        } else {
            None
        }
    }

    /// Seal whatever is buffered as a final, possibly short, segment
    pub fn finish(&mut self, now: Instant) -> Option<Segment> {
        self.seal(now)
    }

    fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    fn seal(&mut self, now: Instant) -> Option<Segment> {
        let opened_at = self.opened_at.take()?;
        if self.buffer.is_empty() {
            return None;
        }

        let id = self.next_id;
        self.next_id = id.next();

        let payload = self.buffer.split().freeze();
        let captured_at = self.epoch_wall + opened_at.saturating_duration_since(self.epoch);
        let duration = now.saturating_duration_since(opened_at);

        Some(Segment::new(id, payload, captured_at, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn config(max_bytes: usize) -> IngestConfig {
        IngestConfig {
            target_duration: Duration::from_secs(2),
            max_segment_bytes: max_bytes,
            read_chunk_size: 64,
        }
    }

    fn segmenter(max_bytes: usize) -> (Segmenter, Instant) {
        let epoch = Instant::now();
        let seg = Segmenter::with_epoch(config(max_bytes), epoch, CaptureTime::from_millis(1_000));
        (seg, epoch)
    }

    #[test]
    fn test_byte_threshold_seals() {
        let (mut seg, t0) = segmenter(4);

        let sealed = seg.push(b"abcdefghij", t0);
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0].payload().as_ref(), b"abcd");
        assert_eq!(sealed[1].payload().as_ref(), b"efgh");
        assert_eq!(sealed[0].id(), SegmentId::new(1));
        assert_eq!(sealed[1].id(), SegmentId::new(2));
        assert_eq!(seg.buffered(), 2);
        assert_eq!(seg.next_id(), SegmentId::new(3));
    }

    #[test]
    fn test_duration_seals_open_segment() {
        let (mut seg, t0) = segmenter(1024);

        assert!(seg.push(b"abc", t0).is_empty());
        assert_eq!(seg.deadline(), Some(t0 + Duration::from_secs(2)));
        assert!(seg.poll_deadline(t0 + Duration::from_secs(1)).is_none());

        let sealed = seg.poll_deadline(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(sealed.payload().as_ref(), b"abc");
        assert_eq!(sealed.duration(), Duration::from_secs(2));
        assert_eq!(sealed.captured_at(), CaptureTime::from_millis(1_000));
        assert_eq!(seg.deadline(), None);
    }

    #[test]
    fn test_overdue_segment_sealed_before_new_bytes() {
        let (mut seg, t0) = segmenter(1024);

        seg.push(b"old", t0);
        let late = t0 + Duration::from_secs(3);
        let sealed = seg.push(b"new", late);

        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].payload().as_ref(), b"old");
        assert_eq!(seg.buffered(), 3);
        assert_eq!(seg.deadline(), Some(late + Duration::from_secs(2)));
    }

    #[test]
    fn test_finish_seals_short_segment() {
        let (mut seg, t0) = segmenter(1024);

        seg.push(b"partial", t0);
        let last = seg.finish(t0 + Duration::from_millis(300)).unwrap();
        assert_eq!(last.payload().as_ref(), b"partial");
        assert_eq!(last.duration(), Duration::from_millis(300));

        assert!(seg.finish(t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_capture_time_follows_open_instant() {
        let (mut seg, t0) = segmenter(2);

        seg.push(b"ab", t0);
        let sealed = seg.push(b"cd", t0 + Duration::from_millis(500));
        assert_eq!(sealed[0].captured_at(), CaptureTime::from_millis(1_500));
    }

    proptest! {
        #[test]
        fn prop_slicing_preserves_bytes(
            max_bytes in 1usize..32,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..50), 0..20),
        ) {
            let (mut seg, t0) = segmenter(max_bytes);
            let mut sealed = Vec::new();
            for chunk in &chunks {
                sealed.extend(seg.push(chunk, t0));
            }
            sealed.extend(seg.finish(t0));

            let rebuilt: Vec<u8> = sealed.iter().flat_map(|s| s.payload().iter().copied()).collect();
            let original: Vec<u8> = chunks.concat();
            prop_assert_eq!(rebuilt, original);
            prop_assert!(sealed.iter().all(|s| !s.is_empty() && s.len() <= max_bytes));
            prop_assert!(sealed.windows(2).all(|w| w[1].id() == w[0].id().next()));
        }
    }
}
