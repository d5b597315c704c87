//! Session manager - owns every session on the node

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rill_core::{RillError, RillResult, SegmentId, SessionId, SessionState};
use rill_export::ExportReport;
use rill_fanout::{StartAt, Subscription};
use rill_ingest::{IngestSummary, IngestWriter};

use crate::{RillConfig, Session};

/// Registry of live and finished sessions
pub struct SessionManager {
    config: RillConfig,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: RillConfig) -> RillResult<Self> {
        config.validate()?;
        Ok(SessionManager {
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RillConfig {
        &self.config
    }

    /// Create an `Idle` session.
    ///
    /// A finished session with the same id is replaced; its viewers keep
    /// draining what they already hold.
    pub fn create_session(&self, id: SessionId) -> RillResult<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&id) {
            if !existing.state().is_finished() {
                return Err(RillError::SessionExists(id));
            }
            debug!(session = %id, "replacing finished session");
        }

        let session = Arc::new(Session::new(
            id,
            self.config.store.clone(),
            self.config.fanout.clone(),
        )?);
        sessions.insert(id, session.clone());
        info!(session = %id, sessions = sessions.len(), "session created");
        Ok(session)
    }

    pub fn get(&self, id: SessionId) -> RillResult<Arc<Session>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(RillError::SessionNotFound(id))
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn attach(&self, id: SessionId, start: StartAt) -> RillResult<Subscription> {
        self.get(id)?.attach(start)
    }

    pub async fn export<W>(
        &self,
        id: SessionId,
        from: SegmentId,
        to: SegmentId,
        sink: &mut W,
    ) -> RillResult<ExportReport>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.get(id)?.export(from, to, sink).await
    }

    /// Create a session and move it to `Ingesting`
    pub fn start_ingest(&self, id: SessionId) -> RillResult<Arc<Session>> {
        let session = self.create_session(id)?;
        session.begin_ingest()?;
        Ok(session)
    }

    /// Run a producer stream into a started session until it ends.
    ///
    /// A clean end terminates the session (and archives it when an archive
    /// directory is configured); an error fails it.
    pub async fn drive_ingest<R>(
        &self,
        session: Arc<Session>,
        reader: R,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> RillResult<IngestSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut writer =
            IngestWriter::new(session.id(), self.config.ingest.clone(), session.clone());
        if let Some(rx) = shutdown {
            writer = writer.with_shutdown(rx);
        }

        let outcome = writer.run(reader).await;
        match outcome.result {
            Ok(()) => {
                session.terminate()?;
                self.archive(&session).await;
                Ok(outcome.summary)
            }
            Err(e) => {
                session.fail(&e)?;
                Err(e)
            }
        }
    }

    /// [`SessionManager::start_ingest`] then [`SessionManager::drive_ingest`]
    pub async fn run_ingest<R>(
        &self,
        id: SessionId,
        reader: R,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> RillResult<IngestSummary>
    where
        R: AsyncRead + Unpin,
    {
        let session = self.start_ingest(id)?;
        self.drive_ingest(session, reader, shutdown).await
    }

    /// Where a session's archive goes, if archiving is on
    pub fn archive_path(&self, id: SessionId, from: SegmentId, to: SegmentId) -> Option<PathBuf> {
        self.config
            .server
            .archive_dir
            .as_ref()
            .map(|dir| dir.join(format!("session-{}-{}-{}.bin", id, from, to)))
    }

    /// Export the whole retained window of a terminated session.
    /// Failures are logged; the session is already finished either way.
    async fn archive(&self, session: &Session) {
        let (Ok(from), Ok(to)) = (session.store().oldest_id(), session.store().latest_id()) else {
            return;
        };
        let Some(path) = self.archive_path(session.id(), from, to) else {
            return;
        };

        match session.export_to_file(from, to, &path).await {
            Ok(report) => info!(
                session = %session.id(),
                path = %path.display(),
                segments = report.segments,
                bytes = report.bytes,
                "session archived"
            ),
            Err(e) => warn!(session = %session.id(), error = %e, "session archive failed"),
        }
    }

    /// Drop timed-out viewers across all sessions
    pub fn sweep(&self, now: Instant) -> usize {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.iter().map(|s| s.sweep(now)).sum()
    }

    /// Forget finished sessions nobody is watching
    pub fn reap(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write();
        let reaped: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| s.is_reapable())
            .map(|(id, _)| *id)
            .collect();

        for id in &reaped {
            sessions.remove(id);
            debug!(session = %id, "session reaped");
        }
        reaped
    }

    /// Terminate whatever is still live. Ingest tasks should be stopped first.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        for session in sessions {
            let result = match session.state() {
                SessionState::Ingesting => session.terminate(),
                SessionState::Idle => session.fail(&RillError::IngestTerminated(session.id())),
                _ => Ok(()),
            };
            if let Err(e) = result {
                debug!(session = %session.id(), error = %e, "session already finished");
            }
        }
        info!(sessions = self.len(), "session manager shut down");
    }
}
