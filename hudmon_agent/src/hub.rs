//! Broadcast hub: one owned aggregate holding the history ring and the set of
//! live viewer sessions.
//!
//! Both live behind a single mutex. `on_connect` reads the backlog and
//! registers the session under that lock, and `on_tick` appends and fans out
//! under it too, so every viewer sees each snapshot exactly once: either in its
//! backlog or as a live update, never both, never neither. Nothing awaits
//! while the lock is held; per-session queues are bounded and filled with
//! `try_send`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::history::HistoryRing;
use crate::types::{ServerMessage, Snapshot};

/// Frames a viewer may fall behind by before it is dropped.
pub const SESSION_QUEUE: usize = 64;

/// A pre-encoded JSON text frame, shared by every recipient.
pub type Frame = Arc<str>;

pub type SessionId = u64;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

struct HubState {
    history: HistoryRing<Arc<Snapshot>>,
    sessions: HashMap<SessionId, mpsc::Sender<Frame>>,
    next_id: SessionId,
}

#[derive(Clone)]
pub struct BroadcastHub {
    state: Arc<Mutex<HubState>>,
}

fn fan_out(sessions: &mut HashMap<SessionId, mpsc::Sender<Frame>>, frame: &Frame) -> usize {
    let mut delivered = 0;
    sessions.retain(|id, tx| match tx.try_send(Arc::clone(frame)) {
        Ok(()) => {
            delivered += 1;
            true
        }
        Err(TrySendError::Full(_)) => {
            warn!(session = id, "viewer is not keeping up; disconnecting it");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(session = id, "viewer already gone");
            false
        }
    });
    delivered
}

impl BroadcastHub {
    pub fn new(history_len: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                history: HistoryRing::new(history_len),
                sessions: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a viewer. Its first frame is the complete backlog.
    pub fn on_connect(&self) -> Result<ViewerSession, HubError> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let mut st = self.state();

        let backlog = st.history.len();
        let frame: Frame = {
            let history = ServerMessage::History {
                data: st.history.iter().map(|s| &**s).collect(),
            };
            serde_json::to_string(&history)?.into()
        };
        // a fresh queue always has room for the first frame
        let _ = tx.try_send(frame);

        let id = st.next_id;
        st.next_id += 1;
        st.sessions.insert(id, tx);
        info!(session = id, backlog, viewers = st.sessions.len(), "viewer connected");

        Ok(ViewerSession {
            id,
            rx,
            hub: self.clone(),
        })
    }

    /// Record a snapshot and push it to every open session.
    /// Returns how many sessions it was delivered to.
    pub fn on_tick(&self, snapshot: Snapshot) -> Result<usize, HubError> {
        let frame: Frame = serde_json::to_string(&ServerMessage::Update(&snapshot))?.into();
        let snapshot = Arc::new(snapshot);

        let mut st = self.state();
        st.history.append(snapshot);
        Ok(fan_out(&mut st.sessions, &frame))
    }

    /// Tell every open session this tick produced nothing. History is untouched.
    pub fn on_assembly_failure(&self, reason: &str) -> usize {
        let frame: Frame = match serde_json::to_string(&ServerMessage::Error { message: reason }) {
            Ok(js) => js.into(),
            Err(e) => {
                warn!(error = %e, "could not encode error notification");
                return 0;
            }
        };
        let mut st = self.state();
        fan_out(&mut st.sessions, &frame)
    }

    /// Remove a session. Safe to call more than once.
    pub fn on_disconnect(&self, id: SessionId) -> bool {
        let mut st = self.state();
        let removed = st.sessions.remove(&id).is_some();
        if removed {
            info!(session = id, viewers = st.sessions.len(), "viewer disconnected");
        }
        removed
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Point-in-time copy of the retained snapshots, oldest first.
    pub fn history(&self) -> Vec<Arc<Snapshot>> {
        self.state().history.snapshot_all()
    }
}

/// One connected viewer's outbound queue. Dropping it disconnects the viewer.
pub struct ViewerSession {
    id: SessionId,
    rx: mpsc::Receiver<Frame>,
    hub: BroadcastHub,
}

impl ViewerSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next frame to write, or `None` once the hub has dropped this session.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.hub.on_disconnect(self.id);
    }
}
