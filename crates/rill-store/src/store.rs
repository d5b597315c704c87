//! Segment store - the retained window of one session

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::debug;

use rill_core::{RillError, RillResult, Segment, SegmentId, StoreConfig};

/// Store counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Segments currently retained
    pub retained: usize,
    /// Payload bytes currently retained
    pub retained_bytes: usize,
    /// Segments appended over the store's lifetime
    pub appended: u64,
    /// Segments evicted over the store's lifetime
    pub evicted: u64,
    /// Payload bytes appended over the store's lifetime
    pub bytes_appended: u64,
}

/// The retained window, guarded by the store lock
#[derive(Debug, Default)]
struct Window {
    /// Retained segments, oldest first, ids strictly increasing
    segments: VecDeque<Segment>,
    /// Sum of retained payload sizes
    total_bytes: usize,
    /// Newest evicted id - everything at or below it is gone
    evicted_through: Option<SegmentId>,
    appended: u64,
    evicted: u64,
    bytes_appended: u64,
}

impl Window {
    fn oldest(&self) -> Option<SegmentId> {
        self.segments.front().map(Segment::id)
    }

    fn latest(&self) -> Option<SegmentId> {
        self.segments.back().map(Segment::id)
    }

    fn holds(&self, id: SegmentId) -> bool {
        self.segments
            .binary_search_by_key(&id, Segment::id)
            .is_ok()
    }

    /// Retained segments with ids in `from..=to`
    fn slice(&self, from: SegmentId, to: SegmentId) -> Vec<Segment> {
        let start = self.segments.partition_point(|s| s.id() < from);
        self.segments
            .range(start..)
            .take_while(|s| s.id() <= to)
            .cloned()
            .collect()
    }
}

/// Every id in `from..=to` is present exactly once
fn is_complete(segments: &[Segment], from: SegmentId, to: SegmentId) -> bool {
    match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => {
            first.id() == from
                && last.id() == to
                && segments.len() as u64 - 1 == to.as_u64() - from.as_u64()
        }
        _ => false,
    }
}

/// Fixed-capacity ordered buffer of sealed segments
#[derive(Debug)]
pub struct SegmentStore {
    config: StoreConfig,
    window: RwLock<Window>,
}

impl SegmentStore {
    /// Create an empty store
    pub fn new(config: StoreConfig) -> RillResult<Self> {
        config.validate()?;
        Ok(SegmentStore {
            config,
            window: RwLock::new(Window::default()),
        })
    }

    /// Capacity bounds
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Append a newly sealed segment.
    ///
    /// Evicts the oldest segments while either bound is exceeded and returns
    /// the newest evicted id, if any. Since eviction is FIFO, every id at or
    /// below the returned one is no longer retained.
    pub fn append(&self, segment: Segment) -> RillResult<Option<SegmentId>> {
        let size = segment.len();
        if size > self.config.max_bytes {
            return Err(RillError::SegmentTooLarge {
                size,
                limit: self.config.max_bytes,
            });
        }

        let id = segment.id();
        let mut window = self.window.write();

        let floor = window.latest().or(window.evicted_through);
        if let Some(latest) = floor {
            if id <= latest {
                return Err(RillError::OutOfOrder { id, latest });
            }
        }

        window.total_bytes += size;
        window.segments.push_back(segment);
        window.appended += 1;
        window.bytes_appended += size as u64;

        let mut evicted = None;
        // The new segment fits both bounds on its own, so it is never evicted.
        while window.segments.len() > 1
            && (window.segments.len() > self.config.max_segments
                || window.total_bytes > self.config.max_bytes)
        {
            let Some(oldest) = window.segments.pop_front() else {
                break;
            };
            window.total_bytes -= oldest.len();
            window.evicted += 1;
            evicted = Some(oldest.id());
        }
        if evicted.is_some() {
            window.evicted_through = evicted;
        }

        let retained = window.segments.len();
        let retained_bytes = window.total_bytes;
        drop(window);

        match evicted {
            Some(through) => debug!(
                segment = %id,
                evicted_through = %through,
                retained,
                retained_bytes,
                "appended segment with eviction"
            ),
            None => debug!(segment = %id, retained, retained_bytes, "appended segment"),
        }

        Ok(evicted)
    }

    /// Retained segments with ids in `from..=to`, oldest first.
    ///
    /// Fails with `RangeUnavailable` if any part of the range has been
    /// evicted or has not been sealed yet. The returned segments are a
    /// snapshot; the lock is released before returning.
    pub fn range(&self, from: SegmentId, to: SegmentId) -> RillResult<Vec<Segment>> {
        if from > to {
            return Err(RillError::InvalidRange { from, to });
        }

        let segments = self.window.read().slice(from, to);
        // Ids only increase, so a full count means nothing is missing.
        if !is_complete(&segments, from, to) {
            return Err(RillError::RangeUnavailable { from, to });
        }
        Ok(segments)
    }

    /// Retained segments from `from` up to the newest sealed one.
    ///
    /// Only an evicted `from` is refused with `RangeUnavailable`. A `from`
    /// below every id ever sealed starts at the oldest retained segment,
    /// and one past the newest gives an empty backfill.
    pub fn range_from(&self, from: SegmentId) -> RillResult<Vec<Segment>> {
        let window = self.window.read();
        let latest = window.latest().ok_or(RillError::Empty)?;
        if from > latest {
            return Ok(Vec::new());
        }
        if window.evicted_through.is_some_and(|through| from <= through) {
            return Err(RillError::RangeUnavailable { from, to: latest });
        }
        Ok(window.slice(from, latest))
    }

    /// Most recent sealed id
    pub fn latest_id(&self) -> RillResult<SegmentId> {
        self.window.read().latest().ok_or(RillError::Empty)
    }

    /// Oldest retained id
    pub fn oldest_id(&self) -> RillResult<SegmentId> {
        self.window.read().oldest().ok_or(RillError::Empty)
    }

    /// Is `id` currently retained?
    pub fn retains(&self, id: SegmentId) -> bool {
        self.window.read().holds(id)
    }

    /// Newest evicted id, if anything has been evicted
    pub fn evicted_through(&self) -> Option<SegmentId> {
        self.window.read().evicted_through
    }

    /// The whole retained window, oldest first
    pub fn snapshot(&self) -> Vec<Segment> {
        self.window.read().segments.iter().cloned().collect()
    }

    /// Number of retained segments
    pub fn len(&self) -> usize {
        self.window.read().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.read().segments.is_empty()
    }

    /// Retained payload bytes
    pub fn total_bytes(&self) -> usize {
        self.window.read().total_bytes
    }

    pub fn stats(&self) -> StoreStats {
        let window = self.window.read();
        StoreStats {
            retained: window.segments.len(),
            retained_bytes: window.total_bytes,
            appended: window.appended,
            evicted: window.evicted,
            bytes_appended: window.bytes_appended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;
    use rill_core::CaptureTime;
    use std::time::Duration;

    fn seg(id: u64, len: usize) -> Segment {
        Segment::new(
            SegmentId::new(id),
            Bytes::from(vec![id as u8; len]),
            CaptureTime::from_millis(id as i64 * 2000),
            Duration::from_secs(2),
        )
    }

    fn ids(segments: &[Segment]) -> Vec<u64> {
        segments.iter().map(|s| s.id().as_u64()).collect()
    }

    fn count_store(max_segments: usize) -> SegmentStore {
        SegmentStore::new(StoreConfig::with_max_segments(max_segments)).unwrap()
    }

    #[test]
    fn test_empty_store() {
        let store = count_store(3);
        assert!(store.is_empty());
        assert!(matches!(store.latest_id(), Err(RillError::Empty)));
        assert!(matches!(
            store.range(SegmentId::new(1), SegmentId::new(1)),
            Err(RillError::RangeUnavailable { .. })
        ));
        assert!(!store.retains(SegmentId::new(1)));
    }

    #[test]
    fn test_capacity_three_scenario() {
        let store = count_store(3);

        assert_eq!(store.append(seg(1, 4)).unwrap(), None);
        assert_eq!(store.append(seg(2, 4)).unwrap(), None);
        assert_eq!(store.append(seg(3, 4)).unwrap(), None);
        assert_eq!(store.append(seg(4, 4)).unwrap(), Some(SegmentId::new(1)));

        assert_eq!(ids(&store.snapshot()), vec![2, 3, 4]);
        assert!(matches!(
            store.range(SegmentId::new(1), SegmentId::new(2)),
            Err(RillError::RangeUnavailable { .. })
        ));
        let range = store.range(SegmentId::new(3), SegmentId::new(4)).unwrap();
        assert_eq!(ids(&range), vec![3, 4]);
        assert_eq!(store.latest_id().unwrap(), SegmentId::new(4));
        assert_eq!(store.oldest_id().unwrap(), SegmentId::new(2));
    }

    #[test]
    fn test_byte_bound_evicts_first() {
        let store = SegmentStore::new(StoreConfig {
            max_segments: 10,
            max_bytes: 10,
        })
        .unwrap();

        store.append(seg(1, 4)).unwrap();
        store.append(seg(2, 4)).unwrap();
        // 12 bytes > 10: segment 1 goes
        assert_eq!(store.append(seg(3, 4)).unwrap(), Some(SegmentId::new(1)));
        // a 9-byte segment forces out both remaining older segments
        assert_eq!(store.append(seg(4, 9)).unwrap(), Some(SegmentId::new(3)));

        assert_eq!(ids(&store.snapshot()), vec![4]);
        assert_eq!(store.total_bytes(), 9);
        assert_eq!(store.evicted_through(), Some(SegmentId::new(3)));
    }

    #[test]
    fn test_oversized_segment_rejected() {
        let store = SegmentStore::new(StoreConfig {
            max_segments: 4,
            max_bytes: 8,
        })
        .unwrap();

        store.append(seg(1, 8)).unwrap();
        assert!(matches!(
            store.append(seg(2, 9)),
            Err(RillError::SegmentTooLarge { size: 9, limit: 8 })
        ));
        assert_eq!(ids(&store.snapshot()), vec![1]);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let store = count_store(2);
        store.append(seg(5, 1)).unwrap();

        assert!(matches!(
            store.append(seg(5, 1)),
            Err(RillError::OutOfOrder { .. })
        ));
        assert!(matches!(
            store.append(seg(4, 1)),
            Err(RillError::OutOfOrder { .. })
        ));
        store.append(seg(6, 1)).unwrap();
        store.append(seg(7, 1)).unwrap();
        // 5 was evicted; re-appending it must still be refused
        assert!(store.append(seg(5, 1)).is_err());
    }

    #[test]
    fn test_invalid_and_future_ranges() {
        let store = count_store(3);
        store.append(seg(1, 1)).unwrap();
        store.append(seg(2, 1)).unwrap();

        assert!(matches!(
            store.range(SegmentId::new(2), SegmentId::new(1)),
            Err(RillError::InvalidRange { .. })
        ));
        assert!(matches!(
            store.range(SegmentId::new(2), SegmentId::new(3)),
            Err(RillError::RangeUnavailable { .. })
        ));
        assert_eq!(ids(&store.range_from(SegmentId::new(2)).unwrap()), vec![2]);
        assert!(store.range_from(SegmentId::new(9)).unwrap().is_empty());
    }

    #[test]
    fn test_range_from_below_first_sealed_id() {
        let store = count_store(8);
        store.append(seg(1, 1)).unwrap();
        store.append(seg(2, 1)).unwrap();

        // nothing evicted yet: id 0 predates the stream, not the window
        assert_eq!(ids(&store.range_from(SegmentId::ZERO).unwrap()), vec![1, 2]);
        // an explicit range still has to name sealed ids
        assert!(matches!(
            store.range(SegmentId::ZERO, SegmentId::new(2)),
            Err(RillError::RangeUnavailable { .. })
        ));
    }

    #[test]
    fn test_range_from_evicted_id_refused() {
        let store = count_store(2);
        for id in 1..=4 {
            store.append(seg(id, 1)).unwrap();
        }

        assert!(matches!(
            store.range_from(SegmentId::ZERO),
            Err(RillError::RangeUnavailable { .. })
        ));
        assert!(matches!(
            store.range_from(SegmentId::new(2)),
            Err(RillError::RangeUnavailable { .. })
        ));
        assert_eq!(ids(&store.range_from(SegmentId::new(3)).unwrap()), vec![3, 4]);
    }

    #[test]
    fn test_skipped_id_is_not_retained() {
        let store = count_store(8);
        store.append(seg(1, 1)).unwrap();
        store.append(seg(3, 1)).unwrap();

        assert!(store.retains(SegmentId::new(1)));
        assert!(!store.retains(SegmentId::new(2)));
        assert!(store.retains(SegmentId::new(3)));
        assert!(matches!(
            store.range(SegmentId::new(2), SegmentId::new(2)),
            Err(RillError::RangeUnavailable { .. })
        ));
        assert!(matches!(
            store.range(SegmentId::new(1), SegmentId::new(3)),
            Err(RillError::RangeUnavailable { .. })
        ));
        assert_eq!(ids(&store.range(SegmentId::new(3), SegmentId::new(3)).unwrap()), vec![3]);
        assert_eq!(ids(&store.range_from(SegmentId::new(2)).unwrap()), vec![3]);
    }

    #[test]
    fn test_stats_track_lifetime() {
        let store = count_store(2);
        for id in 1..=5 {
            store.append(seg(id, 3)).unwrap();
        }
        let stats = store.stats();
        assert_eq!(stats.appended, 5);
        assert_eq!(stats.evicted, 3);
        assert_eq!(stats.retained, 2);
        assert_eq!(stats.retained_bytes, 6);
        assert_eq!(stats.bytes_appended, 15);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SegmentStore::new(StoreConfig::with_max_segments(0)).is_err());
    }

    proptest! {
        #[test]
        fn prop_retains_most_recent_capacity(capacity in 1usize..16, count in 0u64..64) {
            let store = count_store(capacity);
            for id in 1..=count {
                store.append(seg(id, 2)).unwrap();
            }

            let mut expected: Vec<u64> = (1..=count).rev().take(capacity).collect();
            expected.reverse();
            prop_assert_eq!(ids(&store.snapshot()), expected);
            prop_assert!(store.len() <= capacity);
        }

        #[test]
        fn prop_byte_bound_never_exceeded(
            max_bytes in 8usize..64,
            sizes in proptest::collection::vec(1usize..8, 1..40),
        ) {
            let store = SegmentStore::new(StoreConfig { max_segments: usize::MAX, max_bytes }).unwrap();
            for (i, len) in sizes.iter().enumerate() {
                store.append(seg(i as u64 + 1, *len)).unwrap();
                prop_assert!(store.total_bytes() <= max_bytes);
            }
            let snapshot = store.snapshot();
            prop_assert!(snapshot.windows(2).all(|w| w[0].id() < w[1].id()));
            prop_assert_eq!(snapshot.last().map(|s| s.id().as_u64()), Some(sizes.len() as u64));
        }

        #[test]
        fn prop_range_is_gapless(capacity in 1usize..12, count in 1u64..40, a in 0u64..40, b in 0u64..40) {
            let store = count_store(capacity);
            for id in 1..=count {
                store.append(seg(id, 1)).unwrap();
            }
            let (from, to) = (a.min(b), a.max(b));
            let oldest = store.oldest_id().unwrap().as_u64();
            match store.range(SegmentId::new(from), SegmentId::new(to)) {
                Ok(range) => {
                    prop_assert!(from >= oldest && to <= count);
                    prop_assert_eq!(ids(&range), (from..=to).collect::<Vec<_>>());
                }
                Err(RillError::RangeUnavailable { .. }) => {
                    prop_assert!(from < oldest || to > count);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
