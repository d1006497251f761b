use beacon_protocol::SessionId;
use parking_lot::RwLock;

/// Hands out the anonymous session id attached to every recorded event.
///
/// The id is created lazily on first use and kept for the lifetime of the service, which
/// corresponds to one browser session. It is random and never derived from user identity.
#[derive(Debug, Default)]
pub struct SessionIdService {
    current: RwLock<Option<SessionId>>,
}

impl SessionIdService {
    /// Creates a service without a session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service that continues an existing session, for example one restored from
    /// session storage.
    pub fn with_session(session_id: SessionId) -> Self {
        Self {
            current: RwLock::new(Some(session_id)),
        }
    }

    /// Returns the current session id, creating one if there is none yet.
    pub fn get(&self) -> SessionId {
        if let Some(session_id) = *self.current.read() {
            return session_id;
        }

        // Another caller may have created the id between releasing the read lock and here.
        *self.current.write().get_or_insert_with(SessionId::random)
    }

    /// Starts a new session and returns its id.
    pub fn rotate(&self) -> SessionId {
        let session_id = SessionId::random();
        *self.current.write() = Some(session_id);
        session_id
    }
}
