//! Test viewers - recording and stalled subscriptions

use std::time::Duration;

use rill_core::{DisconnectReason, RillError, RillResult, SegmentId};
use rill_fanout::Subscription;

/// Records everything a subscription delivers
#[derive(Debug)]
pub struct RecordingViewer {
    subscription: Subscription,
    received: Vec<SegmentId>,
    bytes: Vec<u8>,
    ended: Option<DisconnectReason>,
}

impl RecordingViewer {
    pub fn new(subscription: Subscription) -> Self {
        RecordingViewer {
            subscription,
            received: Vec::new(),
            bytes: Vec::new(),
            ended: None,
        }
    }

    /// Take whatever is queued right now
    pub fn drain(&mut self) -> RillResult<usize> {
        let mut taken = 0;
        while self.ended.is_none() {
            match self.subscription.try_recv() {
                Ok(Some(segment)) => {
                    self.received.push(segment.id());
                    self.bytes.extend_from_slice(segment.payload());
                    taken += 1;
                }
                Ok(None) => break,
                Err(RillError::ViewerDisconnected { reason, .. }) => self.ended = Some(reason),
                Err(e) => return Err(e),
            }
        }
        Ok(taken)
    }

    /// Receive until the relay lets go, giving up after `limit`
    pub async fn run_to_end(&mut self, limit: Duration) -> RillResult<DisconnectReason> {
        let deadline = tokio::time::Instant::now() + limit;
        while self.ended.is_none() {
            match tokio::time::timeout_at(deadline, self.subscription.recv()).await {
                Ok(Ok(segment)) => {
                    self.received.push(segment.id());
                    self.bytes.extend_from_slice(segment.payload());
                }
                Ok(Err(RillError::ViewerDisconnected { reason, .. })) => self.ended = Some(reason),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(RillError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "viewer never ended",
                    )))
                }
            }
        }
        Ok(self.ended.unwrap_or(DisconnectReason::Detached))
    }

    pub fn received(&self) -> &[SegmentId] {
        &self.received
    }

    pub fn received_ids(&self) -> Vec<u64> {
        self.received.iter().map(|id| id.as_u64()).collect()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn ended(&self) -> Option<DisconnectReason> {
        self.ended
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Strictly increasing, no duplicates
    pub fn in_order(&self) -> bool {
        self.received.windows(2).all(|w| w[0] < w[1])
    }

    /// Strictly increasing with no holes
    pub fn gapless(&self) -> bool {
        self.received.windows(2).all(|w| w[1] == w[0].next())
    }
}

/// A viewer that never reads
#[derive(Debug)]
pub struct StalledViewer {
    subscription: Subscription,
}

impl StalledViewer {
    pub fn new(subscription: Subscription) -> Self {
        StalledViewer { subscription }
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.subscription.disconnect_reason()
    }

    pub fn queued(&self) -> usize {
        self.subscription.queued()
    }

    pub fn into_recording(self) -> RecordingViewer {
        RecordingViewer::new(self.subscription)
    }
}
