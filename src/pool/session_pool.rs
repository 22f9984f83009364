//! Pool owning every live SPDY session.
//!
//! The pool is the only owner of sessions; everyone else holds a
//! [`SessionId`]. Each call into a session is followed by a flush that moves
//! the session's posted tasks into the pool's task queue, applies its
//! [`PoolAction`]s and forwards its [`SessionEvent`]s.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;

use super::{SessionId, SpdySessionKey};
use crate::config::SpdySessionPoolConfig;
use crate::error::{CertError, Error, Result};
use crate::properties::HttpServerProperties;
use crate::scheduler::{SessionTask, TaskQueue};
use crate::socket::SpdySocket;
use crate::spdy::{PoolAction, SessionEvent, SessionInfo, SpdySession};

pub struct SpdySessionPool {
    config: SpdySessionPoolConfig,
    http_server_properties: Arc<dyn HttpServerProperties>,
    next_session_id: u64,
    /// Every live session.
    sessions: HashMap<SessionId, SpdySession>,
    /// Lookup for new requests. Several keys may map to one session.
    available_sessions: HashMap<SpdySessionKey, SessionId>,
    /// Peer address of each available session, for IP pooling.
    aliases: HashMap<SocketAddr, SpdySessionKey>,
    tasks: TaskQueue<(SessionId, SessionTask)>,
    events: VecDeque<(SessionId, SessionEvent)>,
}

impl SpdySessionPool {
    pub fn new(
        config: SpdySessionPoolConfig,
        http_server_properties: Arc<dyn HttpServerProperties>,
    ) -> Self {
        Self {
            config,
            http_server_properties,
            next_session_id: 1,
            sessions: HashMap::new(),
            available_sessions: HashMap::new(),
            aliases: HashMap::new(),
            tasks: TaskQueue::new(),
            events: VecDeque::new(),
        }
    }

    pub fn http_server_properties(&self) -> &Arc<dyn HttpServerProperties> {
        &self.http_server_properties
    }

    /// Create a session over an established connection and make it available
    /// under `key`.
    pub fn create_available_session_from_socket(
        &mut self,
        key: SpdySessionKey,
        socket: Box<dyn SpdySocket>,
        is_secure: bool,
        certificate_error: Option<CertError>,
    ) -> SessionId {
        let id = SessionId::new(self.next_session_id);
        self.next_session_id += 1;

        let mut session = SpdySession::new(
            id,
            key.clone(),
            Arc::clone(&self.http_server_properties),
            self.config.session.clone(),
        );
        session.initialize_with_socket(socket, is_secure, certificate_error);

        tracing::debug!("SPDY Pool: created session {} for {}", id, key);

        // The peer address of a proxied connection is the proxy's, which says
        // nothing about the origin.
        if self.config.enable_ip_pooling && key.proxy_server.is_direct() {
            if let Ok(address) = session.peer_addr() {
                self.aliases.insert(address, key.clone());
            }
        }

        self.sessions.insert(id, session);
        self.map_key_to_available_session(key, id);
        self.flush(id);
        id
    }

    /// Find a session that can serve `key`, directly or, with IP pooling, via
    /// a session to another host at one of `resolved_addresses`.
    pub fn find_available_session(
        &mut self,
        key: &SpdySessionKey,
        resolved_addresses: &[SocketAddr],
    ) -> Option<SessionId> {
        if let Some(id) = self.lookup_available_session(key) {
            tracing::trace!("SPDY Pool: found session {} for {}", id, key);
            return Some(id);
        }
        if !self.config.enable_ip_pooling {
            return None;
        }

        for address in resolved_addresses {
            let Some(alias_key) = self.aliases.get(address).cloned() else {
                continue;
            };
            // Only reusable if proxy and privacy settings match.
            if alias_key.proxy_server != key.proxy_server
                || alias_key.privacy_mode != key.privacy_mode
            {
                continue;
            }
            let Some(id) = self.lookup_available_session(&alias_key) else {
                tracing::warn!("SPDY Pool: alias {} has no available session", alias_key);
                continue;
            };
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if !session.verify_domain_authentication(key.host_port_pair.host()) {
                continue;
            }
            session.add_pooled_alias(key.clone());
            tracing::debug!(
                "SPDY Pool: pooling {} onto session {} via {}",
                key,
                id,
                address
            );
            self.map_key_to_available_session(key.clone(), id);
            return Some(id);
        }
        None
    }

    pub fn has_session(&self, key: &SpdySessionKey) -> bool {
        self.lookup_available_session(key).is_some()
    }

    pub fn session(&self, id: SessionId) -> Option<&SpdySession> {
        self.sessions.get(&id)
    }

    /// Run `f` against a live session and flush whatever it posted.
    pub fn with_session<R>(
        &mut self,
        id: SessionId,
        f: impl FnOnce(&mut SpdySession) -> R,
    ) -> Option<R> {
        let result = f(self.sessions.get_mut(&id)?);
        self.flush(id);
        Some(result)
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn num_available_keys(&self) -> usize {
        self.available_sessions.len()
    }

    /// Delist a session and all its aliases from lookups.
    pub fn make_session_unavailable(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let mut keys = vec![session.spdy_session_key().clone()];
        keys.extend(session.pooled_aliases().iter().cloned());
        for key in &keys {
            self.unmap_key(key, id);
            self.remove_aliases(key);
        }
        tracing::debug!("SPDY Pool: session {} is no longer available", id);
    }

    /// Destroy a session that has finished draining.
    pub fn remove_unavailable_session(&mut self, id: SessionId) {
        debug_assert!(!self.available_sessions.values().any(|sid| *sid == id));
        if self.sessions.remove(&id).is_some() {
            self.tasks.retain(|(sid, _)| *sid != id);
            tracing::debug!("SPDY Pool: removed session {}", id);
        }
    }

    /// Close every session with `err`.
    pub fn close_current_sessions(&mut self, err: Error) {
        self.close_current_sessions_helper(err, "Closing current sessions.", false);
    }

    /// Close every session without active or created streams.
    pub fn close_current_idle_sessions(&mut self) {
        self.close_current_sessions_helper(Error::Aborted, "Closing idle sessions.", true);
    }

    pub fn close_all_sessions(&mut self) {
        self.close_current_sessions_helper(Error::Aborted, "Closing all sessions.", false);
    }

    fn close_current_sessions_helper(&mut self, err: Error, description: &str, idle_only: bool) {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort();
        for id in ids {
            if idle_only && self.sessions.get(&id).is_some_and(SpdySession::is_active) {
                continue;
            }
            self.with_session(id, |session| session.close_session_on_error(err, description));
            debug_assert!(self.sessions.get(&id).map_or(true, |s| !s.is_available()));
        }
    }

    /// The local network changed: retire every session and forget persisted
    /// settings. Active streams may still finish.
    pub fn on_ip_address_changed(&mut self) {
        tracing::debug!("SPDY Pool: IP address changed");
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.with_session(id, |session| session.go_away(Error::NetworkChanged));
        }
        self.http_server_properties.clear_all_spdy_settings();
    }

    /// Close one session with nothing active, to free its connection for
    /// another use. Returns whether one was found.
    pub fn close_one_idle_connection(&mut self) -> bool {
        let mut ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_draining() && s.num_active_streams() == 0)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        let Some(id) = ids.first().copied() else {
            return false;
        };
        self.with_session(id, SpdySession::close_one_idle_connection);
        true
    }

    pub fn info(&self) -> Vec<SessionInfo> {
        let mut ids: Vec<&SessionId> = self.sessions.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.sessions.get(id))
            .map(SpdySession::info)
            .collect()
    }

    pub fn info_as_value(&self) -> serde_json::Value {
        serde_json::Value::Array(self.info().iter().map(SessionInfo::to_value).collect())
    }

    // ------------------------------------------------------------------
    // Socket completions and tasks
    // ------------------------------------------------------------------

    pub fn on_read_complete(&mut self, id: SessionId, result: Result<Bytes>) {
        if self
            .with_session(id, |session| session.on_read_complete(result))
            .is_none()
        {
            tracing::trace!("SPDY Pool: read completion for gone session {}", id);
        }
    }

    pub fn on_write_complete(&mut self, id: SessionId, result: Result<usize>) {
        if self
            .with_session(id, |session| session.on_write_complete(result))
            .is_none()
        {
            tracing::trace!("SPDY Pool: write completion for gone session {}", id);
        }
    }

    /// Run tasks until none is runnable, including tasks they post. Returns
    /// the number of tasks run.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Some((id, task)) = self.tasks.pop_ready(Instant::now()) {
            self.run_task(id, task);
            ran += 1;
        }
        ran
    }

    /// Run the tasks that were runnable on entry, but not tasks they post.
    pub fn run_due_tasks(&mut self) -> usize {
        let due = self.tasks.runnable_count(Instant::now());
        let mut ran = 0;
        while ran < due {
            let Some((id, task)) = self.tasks.pop_ready(Instant::now()) else {
                break;
            };
            self.run_task(id, task);
            ran += 1;
        }
        ran
    }

    fn run_task(&mut self, id: SessionId, task: SessionTask) {
        if self
            .with_session(id, |session| session.run_task(task))
            .is_none()
        {
            tracing::trace!("SPDY Pool: dropping task for gone session {}", id);
        }
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// When the earliest delayed task becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.next_deadline()
    }

    pub fn take_events(&mut self) -> Vec<(SessionId, SessionEvent)> {
        self.events.drain(..).collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn flush(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let tasks = session.take_tasks();
        let events = session.take_events();
        let actions = session.take_pool_actions();

        let now = Instant::now();
        for posted in tasks {
            match posted.delay {
                None => self.tasks.post((id, posted.task)),
                Some(delay) => self.tasks.post_delayed(now, delay, (id, posted.task)),
            }
        }
        self.events
            .extend(events.into_iter().map(|event| (id, event)));
        for action in actions {
            match action {
                PoolAction::MakeUnavailable => self.make_session_unavailable(id),
                PoolAction::RemoveUnavailable => {
                    self.make_session_unavailable(id);
                    self.remove_unavailable_session(id);
                }
            }
        }
    }

    /// All lookups go through one key when single-domain mode is configured.
    fn normalize_key<'a>(&'a self, key: &'a SpdySessionKey) -> &'a SpdySessionKey {
        self.config
            .session
            .single_domain_key
            .as_ref()
            .unwrap_or(key)
    }

    fn lookup_available_session(&self, key: &SpdySessionKey) -> Option<SessionId> {
        self.available_sessions
            .get(self.normalize_key(key))
            .copied()
    }

    fn map_key_to_available_session(&mut self, key: SpdySessionKey, id: SessionId) {
        let key = self.normalize_key(&key).clone();
        self.available_sessions.insert(key, id);
    }

    fn unmap_key(&mut self, key: &SpdySessionKey, id: SessionId) {
        let key = self.normalize_key(key).clone();
        if self.available_sessions.get(&key) == Some(&id) {
            self.available_sessions.remove(&key);
        }
    }

    fn remove_aliases(&mut self, key: &SpdySessionKey) {
        self.aliases.retain(|_, alias_key| alias_key != key);
    }
}

impl std::fmt::Debug for SpdySessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdySessionPool")
            .field("sessions", &self.sessions.len())
            .field("available_keys", &self.available_sessions.len())
            .field("aliases", &self.aliases.len())
            .field("pending_tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::InMemoryServerProperties;

    fn pool() -> SpdySessionPool {
        SpdySessionPool::new(
            SpdySessionPoolConfig::default(),
            Arc::new(InMemoryServerProperties::new()),
        )
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = pool();
        let key = SpdySessionKey::direct("www.example.org", 443);
        assert!(pool.find_available_session(&key, &[]).is_none());
        assert!(!pool.has_session(&key));
        assert_eq!(pool.num_sessions(), 0);
        assert!(!pool.close_one_idle_connection());
        assert_eq!(pool.info_as_value(), serde_json::json!([]));
    }

    #[test]
    fn test_tasks_for_unknown_sessions_are_dropped() {
        let mut pool = pool();
        pool.tasks.post((SessionId::new(7), SessionTask::PumpReadLoop));
        assert_eq!(pool.run_until_idle(), 1);
        assert!(!pool.has_pending_tasks());
        assert!(pool.take_events().is_empty());
    }

    #[test]
    fn test_single_domain_key_normalizes_lookups() {
        let mut config = SpdySessionPoolConfig::default();
        let single = SpdySessionKey::direct("proxy.example.org", 443);
        config.session.single_domain_key = Some(single.clone());
        let pool = SpdySessionPool::new(config, Arc::new(InMemoryServerProperties::new()));

        let other = SpdySessionKey::direct("www.example.org", 443);
        assert_eq!(pool.normalize_key(&other), &single);
    }
}
