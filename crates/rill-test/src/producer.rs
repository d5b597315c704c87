//! Scripted producers - byte streams with pauses and failures

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{sleep, Sleep};

/// One step of a producer script
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Bytes delivered to the reader
    Data(Vec<u8>),
    /// Producer goes quiet
    Pause(Duration),
    /// Stream errors out
    Fail(io::ErrorKind),
}

/// `AsyncRead` that plays back a script.
///
/// The stream ends (EOF) after the last step unless a `Fail` step ends it
/// first.
pub struct ScriptedProducer {
    steps: VecDeque<Step>,
    /// Offset into the front `Data` step
    offset: usize,
    pause: Option<Pin<Box<Sleep>>>,
}

impl ScriptedProducer {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        ScriptedProducer {
            steps: steps.into_iter().collect(),
            offset: 0,
            pause: None,
        }
    }

    /// Random chunk sizes and pauses totalling `total` bytes
    pub fn random(seed: u64, total: usize, max_chunk: usize, max_pause: Duration) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut steps = Vec::new();
        let mut produced = 0usize;
        let mut next_byte = 0u8;

        while produced < total {
            let len = rng.gen_range(1..=max_chunk).min(total - produced);
            let chunk: Vec<u8> = (0..len)
                .map(|_| {
                    next_byte = next_byte.wrapping_add(1);
                    next_byte
                })
                .collect();
            steps.push(Step::Data(chunk));
            produced += len;

            if !max_pause.is_zero() && rng.gen_bool(0.3) {
                let micros = rng.gen_range(0..=max_pause.as_micros() as u64);
                steps.push(Step::Pause(Duration::from_micros(micros)));
            }
        }

        Self::new(steps)
    }

    /// Every byte the script delivers, in order
    pub fn expected_bytes(&self) -> Vec<u8> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Data(data) => Some(data.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Does the script end in a failure?
    pub fn fails(&self) -> bool {
        self.steps.iter().any(|step| matches!(step, Step::Fail(_)))
    }
}

impl AsyncRead for ScriptedProducer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if let Some(pause) = self.pause.as_mut() {
                ready!(pause.as_mut().poll(cx));
                self.pause = None;
            }

            let this = &mut *self;
            match this.steps.front() {
                None => return Poll::Ready(Ok(())),
                Some(Step::Data(data)) => {
                    let rest = &data[this.offset..];
                    let n = rest.len().min(buf.remaining());
                    buf.put_slice(&rest[..n]);
                    this.offset += n;
                    if this.offset == data.len() {
                        this.steps.pop_front();
                        this.offset = 0;
                    }
                    if n > 0 {
                        return Poll::Ready(Ok(()));
                    }
                }
                Some(Step::Pause(duration)) => {
                    this.pause = Some(Box::pin(sleep(*duration)));
                    this.steps.pop_front();
                }
                Some(Step::Fail(kind)) => {
                    let kind = *kind;
                    this.steps.pop_front();
                    return Poll::Ready(Err(io::Error::new(kind, "scripted producer failure")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(start_paused = true)]
    async fn test_script_plays_back() {
        let mut producer = ScriptedProducer::new([
            Step::Data(b"ab".to_vec()),
            Step::Pause(Duration::from_secs(1)),
            Step::Data(b"cd".to_vec()),
        ]);
        assert_eq!(producer.expected_bytes(), b"abcd");

        let started = tokio::time::Instant::now();
        let mut out = Vec::new();
        producer.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"abcd");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_script_fails() {
        let mut producer = ScriptedProducer::new([
            Step::Data(b"ab".to_vec()),
            Step::Fail(io::ErrorKind::ConnectionReset),
        ]);
        assert!(producer.fails());

        let mut out = Vec::new();
        let err = producer.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(out, b"ab");
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = ScriptedProducer::random(7, 1000, 64, Duration::from_millis(10));
        let b = ScriptedProducer::random(7, 1000, 64, Duration::from_millis(10));
        assert_eq!(a.expected_bytes(), b.expected_bytes());
        assert_eq!(a.expected_bytes().len(), 1000);
        assert!(!a.fails());
    }
}
