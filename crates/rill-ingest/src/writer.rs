//! Ingest writer - drives a [`Segmenter`] from one producer stream
//!
//! The writer never waits on consumers: sealing hands each segment to a
//! [`SegmentPublisher`] whose `publish` is synchronous and non-blocking.

use std::future::pending;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use rill_core::{IngestConfig, RillError, RillResult, Segment, SegmentId, SessionId};

use crate::Segmenter;

/// Destination for sealed segments
pub trait SegmentPublisher: Send + Sync {
    /// Make a sealed segment visible. Must not block on consumers.
    fn publish(&self, segment: Segment) -> RillResult<()>;
}

impl<T: SegmentPublisher + ?Sized> SegmentPublisher for Arc<T> {
    fn publish(&self, segment: Segment) -> RillResult<()> {
        (**self).publish(segment)
    }
}

/// Counters for one ingest run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub segments_sealed: u64,
    pub bytes_ingested: u64,
    pub last_segment: Option<SegmentId>,
}

/// How an ingest run ended
#[derive(Debug)]
pub struct IngestOutcome {
    pub summary: IngestSummary,
    /// `Ok` for a clean end of stream (or shutdown), `IngestFailed` otherwise
    pub result: RillResult<()>,
}

impl IngestOutcome {
    pub fn is_clean(&self) -> bool {
        self.result.is_ok()
    }
}

/// Consumes one producer stream for one session
pub struct IngestWriter<P> {
    session: SessionId,
    config: IngestConfig,
    segmenter: Segmenter,
    publisher: P,
    shutdown: Option<watch::Receiver<bool>>,
    summary: IngestSummary,
}

impl<P: SegmentPublisher> IngestWriter<P> {
    pub fn new(session: SessionId, config: IngestConfig, publisher: P) -> Self {
        let segmenter = Segmenter::new(config.clone());
        IngestWriter {
            session,
            config,
            segmenter,
            publisher,
            shutdown: None,
            summary: IngestSummary::default(),
        }
    }

    /// Stop reading (and seal what is buffered) once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Read the producer stream to its end.
    ///
    /// Buffered bytes are always sealed as a final segment, whether the
    /// stream ends cleanly or with an error.
    pub async fn run<R: AsyncRead + Unpin>(mut self, mut reader: R) -> IngestOutcome {
        info!(session = %self.session, "ingest started");
        let mut buf = vec![0u8; self.config.read_chunk_size];
        let mut shutdown = self.shutdown.take();

        loop {
            let deadline = self.segmenter.deadline();

            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!(session = %self.session, "producer stream ended");
                        return self.finish(Ok(()));
                    }
                    Ok(n) => {
                        self.summary.bytes_ingested += n as u64;
                        let sealed = self.segmenter.push(&buf[..n], Instant::now());
                        for segment in sealed {
                            if let Err(e) = self.publish(segment) {
                                return self.finish(Err(e));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(session = %self.session, error = %e, "producer stream failed");
                        let err = RillError::IngestFailed {
                            session: self.session,
                            reason: e.to_string(),
                        };
                        return self.finish(Err(err));
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(segment) = self.segmenter.poll_deadline(Instant::now()) {
                        if let Err(e) = self.publish(segment) {
                            return self.finish(Err(e));
                        }
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(session = %self.session, "ingest stopped by shutdown");
                    return self.finish(Ok(()));
                }
            }
        }
    }

    fn publish(&mut self, segment: Segment) -> RillResult<()> {
        let id = segment.id();
        let len = segment.len();
        self.publisher.publish(segment)?;
        self.summary.segments_sealed += 1;
        self.summary.last_segment = Some(id);
        debug!(session = %self.session, segment = %id, len, "sealed segment");
        Ok(())
    }

    fn finish(mut self, result: RillResult<()>) -> IngestOutcome {
        let mut result = result;
        if let Some(last) = self.segmenter.finish(Instant::now()) {
            debug!(session = %self.session, segment = %last.id(), len = last.len(), "sealing final segment");
            if let Err(e) = self.publish(last) {
                warn!(session = %self.session, error = %e, "final segment was not published");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        info!(
            session = %self.session,
            segments = self.summary.segments_sealed,
            bytes = self.summary.bytes_ingested,
            clean = result.is_ok(),
            "ingest finished"
        );

        IngestOutcome {
            summary: self.summary,
            result,
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return pending().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, ReadBuf};

    #[derive(Default)]
    struct Collector {
        segments: Mutex<Vec<Segment>>,
    }

    impl SegmentPublisher for Collector {
        fn publish(&self, segment: Segment) -> RillResult<()> {
            self.segments.lock().push(segment);
            Ok(())
        }
    }

    impl Collector {
        fn payloads(&self) -> Vec<Vec<u8>> {
            self.segments.lock().iter().map(|s| s.payload().to_vec()).collect()
        }
    }

    struct Refusing;

    impl SegmentPublisher for Refusing {
        fn publish(&self, _segment: Segment) -> RillResult<()> {
            Err(RillError::IngestTerminated(SessionId::new(1)))
        }
    }

    /// Yields one chunk, then fails
    struct FailingReader {
        data: Option<Vec<u8>>,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "producer reset",
                ))),
            }
        }
    }

    fn config(max_bytes: usize) -> IngestConfig {
        IngestConfig {
            target_duration: Duration::from_secs(2),
            max_segment_bytes: max_bytes,
            read_chunk_size: 8,
        }
    }

    #[tokio::test]
    async fn test_eof_seals_partial_segment() {
        let collector = Arc::new(Collector::default());
        let writer = IngestWriter::new(SessionId::new(1), config(4), collector.clone());

        let outcome = writer.run(&b"abcdefghij"[..]).await;

        assert!(outcome.is_clean());
        assert_eq!(
            collector.payloads(),
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
        );
        assert_eq!(outcome.summary.segments_sealed, 3);
        assert_eq!(outcome.summary.bytes_ingested, 10);
        assert_eq!(outcome.summary.last_segment, Some(SegmentId::new(3)));
    }

    #[tokio::test]
    async fn test_error_seals_partial_then_fails() {
        let collector = Arc::new(Collector::default());
        let writer = IngestWriter::new(SessionId::new(9), config(64), collector.clone());

        let outcome = writer
            .run(FailingReader {
                data: Some(b"half a frame".to_vec()),
            })
            .await;

        assert!(matches!(
            outcome.result,
            Err(RillError::IngestFailed { session, .. }) if session == SessionId::new(9)
        ));
        assert_eq!(collector.payloads(), vec![b"half a frame".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_producer_sealed_on_deadline() {
        let collector = Arc::new(Collector::default());
        let writer = IngestWriter::new(SessionId::new(2), config(1024), collector.clone());
        let (mut producer, reader) = tokio::io::duplex(64);

        let task = tokio::spawn(writer.run(reader));

        producer.write_all(b"first").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(collector.payloads(), vec![b"first".to_vec()]);

        producer.write_all(b"second").await.unwrap();
        drop(producer);

        let outcome = task.await.unwrap();
        assert!(outcome.is_clean());
        assert_eq!(collector.payloads(), vec![b"first".to_vec(), b"second".to_vec()]);
        let segments = collector.segments.lock();
        assert_eq!(segments[0].duration(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_shutdown_seals_buffered_bytes() {
        let collector = Arc::new(Collector::default());
        let (tx, rx) = watch::channel(false);
        let writer = IngestWriter::new(SessionId::new(3), config(1024), collector.clone())
            .with_shutdown(rx);
        let (mut producer, reader) = tokio::io::duplex(64);

        let task = tokio::spawn(writer.run(reader));
        producer.write_all(b"buffered").await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let outcome = task.await.unwrap();
        assert!(outcome.is_clean());
        assert_eq!(collector.payloads(), vec![b"buffered".to_vec()]);
        drop(producer);
    }

    #[tokio::test]
    async fn test_publisher_refusal_stops_ingest() {
        let writer = IngestWriter::new(SessionId::new(1), config(2), Refusing);

        let outcome = writer.run(&b"abcd"[..]).await;
        assert!(matches!(outcome.result, Err(RillError::IngestTerminated(_))));
        assert_eq!(outcome.summary.segments_sealed, 0);
    }
}
