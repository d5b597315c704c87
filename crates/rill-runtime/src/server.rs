//! TCP front end - producer and viewer listeners
//!
//! One task per connection. Producer connections feed an ingest writer;
//! viewer connections pull from their subscription and write frames, each
//! write bounded by the delivery timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use rill_core::{RillError, RillResult};
use rill_fanout::StartAt;
use rill_wire::{Frame, HelloReply, IngestHello, ViewerHello, WireStart};

use crate::SessionManager;

/// Accepts producers and viewers for a [`SessionManager`]
pub struct RelayServer {
    manager: Arc<SessionManager>,
    ingest: TcpListener,
    viewers: TcpListener,
}

impl RelayServer {
    /// Bind both listeners from the manager's server config
    pub async fn bind(manager: Arc<SessionManager>) -> RillResult<Self> {
        let server = &manager.config().server;
        let ingest = TcpListener::bind(server.ingest_addr).await?;
        let viewers = TcpListener::bind(server.viewer_addr).await?;
        Ok(RelayServer {
            manager,
            ingest,
            viewers,
        })
    }

    pub fn ingest_addr(&self) -> RillResult<SocketAddr> {
        Ok(self.ingest.local_addr()?)
    }

    pub fn viewer_addr(&self) -> RillResult<SocketAddr> {
        Ok(self.viewers.local_addr()?)
    }

    /// Serve until `shutdown` turns true (or its sender goes away).
    ///
    /// On shutdown, producers seal what they buffered and their sessions
    /// terminate; viewers get until the delivery timeout to drain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RillResult<()> {
        let RelayServer {
            manager,
            ingest,
            viewers,
        } = self;
        let fanout = manager.config().fanout.clone();

        info!(
            ingest = %ingest.local_addr()?,
            viewers = %viewers.local_addr()?,
            "relay listening"
        );

        let mut producer_tasks = JoinSet::new();
        let mut viewer_tasks = JoinSet::new();
        let mut sweep = interval(fanout.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = ingest.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let manager = manager.clone();
                        let shutdown = shutdown.clone();
                        let hello_timeout = fanout.delivery_timeout;
                        producer_tasks.spawn(async move {
                            let served =
                                serve_producer(&manager, stream, hello_timeout, shutdown).await;
                            if let Err(e) = served {
                                warn!(peer = %peer, error = %e, "producer connection failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "ingest accept failed"),
                },
                accepted = viewers.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let manager = manager.clone();
                        let write_timeout = fanout.delivery_timeout;
                        viewer_tasks.spawn(async move {
                            if let Err(e) = serve_viewer(&manager, stream, write_timeout).await {
                                debug!(peer = %peer, error = %e, "viewer connection ended");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "viewer accept failed"),
                },
                _ = sweep.tick() => {
                    let dropped = manager.sweep(Instant::now());
                    let reaped = manager.reap();
                    if dropped > 0 || !reaped.is_empty() {
                        debug!(dropped, reaped = reaped.len(), "sweep");
                    }
                }
                Some(_) = producer_tasks.join_next(), if !producer_tasks.is_empty() => {}
                Some(_) = viewer_tasks.join_next(), if !viewer_tasks.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            producers = producer_tasks.len(),
            viewers = viewer_tasks.len(),
            "relay shutting down"
        );
        drop(ingest);
        drop(viewers);

        while producer_tasks.join_next().await.is_some() {}
        manager.shutdown();

        let drained = timeout(fanout.delivery_timeout, async {
            while viewer_tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(viewers = viewer_tasks.len(), "aborting viewers still draining");
            viewer_tasks.shutdown().await;
        }

        info!("relay stopped");
        Ok(())
    }
}

fn timed_out(what: &str) -> RillError {
    RillError::Io(io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what)))
}

async fn read_hello<R>(reader: &mut R, buf: &mut [u8], limit: Duration) -> RillResult<()>
where
    R: AsyncRead + Unpin,
{
    timeout(limit, reader.read_exact(buf))
        .await
        .map_err(|_| timed_out("hello"))??;
    Ok(())
}

async fn reply<W>(writer: &mut W, answer: HelloReply, limit: Duration) -> RillResult<()>
where
    W: AsyncWrite + Unpin,
{
    timeout(limit, writer.write_all(&answer.to_bytes()))
        .await
        .map_err(|_| timed_out("reply"))??;
    Ok(())
}

async fn serve_producer(
    manager: &SessionManager,
    stream: TcpStream,
    hello_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> RillResult<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let mut buf = [0u8; IngestHello::SIZE];
    read_hello(&mut reader, &mut buf, hello_timeout).await?;
    let hello = IngestHello::parse(&buf)?;

    let session = match manager.start_ingest(hello.session) {
        Ok(session) => session,
        Err(e) => {
            reply(&mut writer, HelloReply::from_error(&e), hello_timeout).await?;
            return Err(e);
        }
    };
    if let Err(e) = reply(&mut writer, HelloReply::accepted(), hello_timeout).await {
        session.fail(&e)?;
        return Err(e);
    }

    info!(session = %hello.session, "producer connected");
    manager
        .drive_ingest(session, reader, Some(shutdown))
        .await
        .map(|_| ())
}

async fn serve_viewer(
    manager: &SessionManager,
    stream: TcpStream,
    write_timeout: Duration,
) -> RillResult<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let mut buf = [0u8; ViewerHello::SIZE];
    read_hello(&mut reader, &mut buf, write_timeout).await?;
    let hello = ViewerHello::parse(&buf)?;
    let start = match hello.start {
        WireStart::Latest => StartAt::Latest,
        WireStart::From(id) => StartAt::From(id),
    };

    let mut subscription = match manager.attach(hello.session, start) {
        Ok(subscription) => subscription,
        Err(e) => {
            reply(&mut writer, HelloReply::from_error(&e), write_timeout).await?;
            return Err(e);
        }
    };
    reply(&mut writer, HelloReply::accepted(), write_timeout).await?;
    debug!(session = %hello.session, viewer = %subscription.id(), start = ?start, "viewer connected");

    let mut out = BytesMut::new();
    let mut probe = [0u8; 64];
    loop {
        let frame = tokio::select! {
            next = subscription.recv() => match next {
                Ok(segment) => Frame::Segment(segment),
                Err(RillError::ViewerDisconnected { reason, .. }) => Frame::End(reason),
                Err(e) => return Err(e),
            },
            read = reader.read(&mut probe) => match read {
                Ok(0) | Err(_) => {
                    debug!(viewer = %subscription.id(), "viewer hung up");
                    return Ok(());
                }
                // viewers have nothing to say after the hello
                Ok(_) => continue,
            },
        };

        out.clear();
        frame.encode(&mut out);
        timeout(write_timeout, writer.write_all(&out))
            .await
            .map_err(|_| timed_out("segment write"))??;

        if let Frame::End(reason) = frame {
            debug!(viewer = %subscription.id(), reason = %reason, "viewer stream ended");
            return Ok(());
        }
    }
}
