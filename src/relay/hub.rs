//! Shared relay state: which pipelines are connected, how to reach them,
//! and what recently flowed through.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::{PipedashError, Result};
use crate::metrics;

/// How many dashboard subscribers can lag before they start missing updates.
const BROADCAST_CAPACITY: usize = 256;

/// Default size of the recent-update ring kept for late-joining dashboards.
pub const DEFAULT_RECENT_LIMIT: usize = 256;

/// A validated envelope as dashboard consumers see it, stamped on its way
/// through the hub.
#[derive(Debug, Clone, Serialize)]
pub struct RelayUpdate {
    pub update_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub peer: String,
    pub envelope: Envelope,
}

/// One registered pipeline connection, keyed by the uuid it announced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub uuid: String,
    pub name: String,
    pub id: String,
    pub source_type: String,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub envelopes_received: u64,
}

struct Session {
    /// Connection token, so teardown of a replaced connection cannot evict
    /// its successor.
    conn: Uuid,
    info: SessionInfo,
    outbound: mpsc::UnboundedSender<Envelope>,
}

struct HubState {
    sessions: HashMap<String, Session>,
    recent: VecDeque<RelayUpdate>,
}

/// The relay's shared state. Cheap to clone; all clones see the same
/// sessions, ring, and broadcast channel.
#[derive(Clone)]
pub struct RelayHub {
    state: Arc<Mutex<HubState>>,
    updates: broadcast::Sender<RelayUpdate>,
    recent_limit: usize,
}

impl RelayHub {
    pub fn new(recent_limit: usize) -> Self {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(HubState {
                sessions: HashMap::new(),
                recent: VecDeque::new(),
            })),
            updates,
            recent_limit,
        }
    }

    /// Subscribe to every update published from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayUpdate> {
        self.updates.subscribe()
    }

    /// Bind a pipeline's announced uuid to its connection. A second
    /// registration for the same uuid replaces the first, so the newest
    /// connection wins.
    pub fn register(
        &self,
        envelope: &Envelope,
        peer: SocketAddr,
        conn: Uuid,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) {
        let now = Utc::now();
        let info = SessionInfo {
            uuid: envelope.uuid().to_string(),
            name: envelope.name().to_string(),
            id: envelope.id().to_string(),
            source_type: envelope.source_type().to_string(),
            peer: peer.to_string(),
            connected_at: now,
            last_seen_at: now,
            envelopes_received: 0,
        };

        let mut state = self.state.lock().unwrap();
        let replaced = state
            .sessions
            .insert(info.uuid.clone(), Session { conn, info, outbound });
        if replaced.is_some() {
            debug!("Newer connection replaced session {}", envelope.uuid());
        }
        info!(
            "Registered pipeline '{}' ({}) from {}",
            envelope.name(),
            envelope.uuid(),
            peer
        );
        metrics::relay::session_count(state.sessions.len());
    }

    /// Stamp an accepted envelope and fan it out: append it to the recent
    /// ring, update the sender's session stats, and broadcast it.
    pub fn publish(&self, envelope: Envelope, peer: SocketAddr) -> RelayUpdate {
        let update = RelayUpdate {
            update_id: Uuid::new_v4(),
            received_at: Utc::now(),
            peer: peer.to_string(),
            envelope,
        };

        {
            let mut state = self.state.lock().unwrap();
            if let Some(session) = state.sessions.get_mut(update.envelope.uuid()) {
                session.info.last_seen_at = update.received_at;
                session.info.envelopes_received += 1;
            }
            state.recent.push_back(update.clone());
            while state.recent.len() > self.recent_limit {
                state.recent.pop_front();
            }
        }

        metrics::relay::envelope_published(update.envelope.kind());
        // No dashboard listening is fine; the ring still has the update.
        let _ = self.updates.send(update.clone());
        update
    }

    /// Queue an envelope for delivery to the pipeline registered under
    /// `uuid`.
    pub fn push(&self, uuid: &str, envelope: Envelope) -> Result<()> {
        let state = self.state.lock().unwrap();
        let session = match state.sessions.get(uuid) {
            Some(session) => session,
            None => {
                metrics::relay::push_failed();
                return Err(PipedashError::UnknownSession(uuid.to_string()));
            }
        };
        if session.outbound.send(envelope).is_err() {
            // The connection is tearing down; its registration just has not
            // been removed yet.
            metrics::relay::push_failed();
            return Err(PipedashError::UnknownSession(uuid.to_string()));
        }
        metrics::relay::push_delivered();
        debug!("Queued dashboard envelope for session {}", uuid);
        Ok(())
    }

    /// Drop a session on connection teardown, along with anything still
    /// queued for it. Only the connection that owns the registration may
    /// remove it.
    pub fn unregister(&self, uuid: &str, conn: Uuid) {
        let mut state = self.state.lock().unwrap();
        let owns = state
            .sessions
            .get(uuid)
            .map_or(false, |session| session.conn == conn);
        if owns {
            if let Some(session) = state.sessions.remove(uuid) {
                info!("Session '{}' ({}) disconnected", session.info.name, uuid);
            }
        }
        metrics::relay::session_count(state.sessions.len());
    }

    /// Snapshot of the registered sessions, oldest connection first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<SessionInfo> =
            state.sessions.values().map(|s| s.info.clone()).collect();
        sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        sessions
    }

    /// Snapshot of the recent-update ring, oldest first.
    pub fn recent(&self) -> Vec<RelayUpdate> {
        let state = self.state.lock().unwrap();
        state.recent.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline_envelope(uuid: &str) -> Envelope {
        Envelope::pipeline("posterize", "77", uuid, "pipeline", json!({"nodes": []})).unwrap()
    }

    fn status_envelope(uuid: &str) -> Envelope {
        Envelope::status("posterize", "77", uuid, "pipeline", json!({"msg": "fine"})).unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_register_and_list_sessions() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);
        let (tx, _rx) = mpsc::unbounded_channel();

        hub.register(&pipeline_envelope("pipe-1"), peer(), Uuid::new_v4(), tx);

        let sessions = hub.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].uuid, "pipe-1");
        assert_eq!(sessions[0].name, "posterize");
        assert_eq!(sessions[0].envelopes_received, 0);
    }

    #[test]
    fn test_newest_registration_wins() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();

        hub.register(&pipeline_envelope("pipe-1"), peer(), old_conn, old_tx);
        hub.register(&pipeline_envelope("pipe-1"), peer(), new_conn, new_tx);

        // The stale connection tearing down must not evict its successor.
        hub.unregister("pipe-1", old_conn);
        assert_eq!(hub.sessions().len(), 1);

        hub.push("pipe-1", status_envelope("pipe-1")).unwrap();
        assert!(new_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_publish_stamps_and_broadcasts() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);
        let mut updates = hub.subscribe();

        let published = hub.publish(status_envelope("pipe-1"), peer());
        let received = updates.recv().await.unwrap();

        assert_eq!(received.update_id, published.update_id);
        assert_eq!(received.envelope, published.envelope);
        assert_eq!(hub.recent().len(), 1);
    }

    #[test]
    fn test_publish_updates_session_stats() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register(&pipeline_envelope("pipe-1"), peer(), Uuid::new_v4(), tx);

        hub.publish(status_envelope("pipe-1"), peer());
        hub.publish(status_envelope("pipe-1"), peer());

        assert_eq!(hub.sessions()[0].envelopes_received, 2);
    }

    #[test]
    fn test_recent_ring_is_bounded() {
        let hub = RelayHub::new(2);

        let first = hub.publish(status_envelope("pipe-1"), peer());
        hub.publish(status_envelope("pipe-1"), peer());
        hub.publish(status_envelope("pipe-1"), peer());

        let recent = hub.recent();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|u| u.update_id != first.update_id));
    }

    #[tokio::test]
    async fn test_push_routes_to_the_session_queue() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(&pipeline_envelope("pipe-1"), peer(), Uuid::new_v4(), tx);

        let pushed = status_envelope("pipe-1");
        hub.push("pipe-1", pushed.clone()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), pushed);
    }

    #[test]
    fn test_push_to_unknown_uuid_fails() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);

        let err = hub.push("nobody", status_envelope("nobody")).unwrap_err();
        assert!(matches!(err, PipedashError::UnknownSession(uuid) if uuid == "nobody"));
    }

    #[test]
    fn test_unregister_drops_the_session() {
        let hub = RelayHub::new(DEFAULT_RECENT_LIMIT);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        hub.register(&pipeline_envelope("pipe-1"), peer(), conn, tx);

        hub.unregister("pipe-1", conn);

        assert!(hub.sessions().is_empty());
        assert!(hub.push("pipe-1", status_envelope("pipe-1")).is_err());
    }
}
