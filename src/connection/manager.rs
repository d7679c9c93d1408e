//! Connection manager: multi-round failover with single-flight connects

use crate::config::Config;
use crate::connection::{Connector, TransportEvent};
use crate::error::{Result, SdkError};
use crate::events::{ConnectionEvent, EventHub};
use crate::session::Session;
use crate::types::{ConnectionState, ConnectionStatus, Endpoint};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

type ConnectFuture = Shared<BoxFuture<'static, Result<Arc<Session>>>>;

/// Ordered candidate endpoints
///
/// The order only changes through [`EndpointPool::deprioritize`].
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: RwLock<Vec<Endpoint>>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: RwLock::new(endpoints),
        }
    }

    /// Current order
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Move `endpoint` to the back, keeping the relative order of the rest
    pub fn deprioritize(&self, endpoint: &Endpoint) -> bool {
        let mut endpoints = self.endpoints.write();
        match endpoints.iter().position(|e| e == endpoint) {
            Some(index) => {
                let failed = endpoints.remove(index);
                endpoints.push(failed);
                true
            }
            None => false,
        }
    }
}

/// Timing knobs for a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectSettings {
    /// Bound on each open and on each wait for readiness
    pub connect_timeout: Duration,
    /// Pause after a round in which every endpoint failed
    pub round_delay: Duration,
    /// Rounds after the first
    pub max_rounds: u32,
}

impl From<&Config> for ConnectSettings {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.connection_timeout,
            round_delay: config.reconnect_delay,
            max_rounds: config.max_reconnect_rounds,
        }
    }
}

/// Raised when the transport behind a session goes away
#[derive(Debug, Clone)]
pub struct DisconnectNotice {
    pub session_id: Uuid,
    pub endpoint: Endpoint,
}

struct Slot {
    state: ConnectionState,
    reconnect_attempts: u32,
    session: Option<Arc<Session>>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    pool: EndpointPool,
    settings: ConnectSettings,
    slot: RwLock<Slot>,
    inflight: Mutex<Option<ConnectFuture>>,
    events: EventHub,
    notices: mpsc::UnboundedSender<DisconnectNotice>,
    closed: AtomicBool,
}

/// Owns the current session and the connection state
///
/// Cloning is cheap; all clones share one session slot.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager; the receiver yields a notice whenever a live session's transport drops
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoints: Vec<Endpoint>,
        settings: ConnectSettings,
        events: EventHub,
    ) -> (Self, mpsc::UnboundedReceiver<DisconnectNotice>) {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(ManagerInner {
                connector,
                pool: EndpointPool::new(endpoints),
                settings,
                slot: RwLock::new(Slot {
                    state: ConnectionState::Disconnected,
                    reconnect_attempts: 0,
                    session: None,
                }),
                inflight: Mutex::new(None),
                events,
                notices,
                closed: AtomicBool::new(false),
            }),
        };
        (manager, notices_rx)
    }

    /// Return the live session, connecting first if there is none
    ///
    /// Concurrent callers share one in-flight attempt.
    pub async fn connect(&self) -> Result<Arc<Session>> {
        self.inner.closed.store(false, Ordering::SeqCst);
        if let Ok(session) = self.current_session() {
            return Ok(session);
        }
        self.join_or_start().await
    }

    /// Join the in-flight attempt or start a new one
    pub(crate) fn join_or_start(&self) -> ConnectFuture {
        let mut inflight = self.inner.inflight.lock();
        if let Some(pending) = inflight.as_ref() {
            debug!("joining in-flight connect");
            return pending.clone();
        }

        let manager = self.clone();
        let task = tokio::spawn(async move {
            let outcome = manager.establish().await;
            *manager.inner.inflight.lock() = None;
            outcome
        });

        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SdkError::Internal(format!("connect task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        *inflight = Some(pending.clone());
        pending
    }

    async fn establish(&self) -> Result<Arc<Session>> {
        let settings = self.inner.settings;
        self.inner.slot.write().state = ConnectionState::Connecting;

        let mut attempts = 0u32;
        let mut last_error = None;

        for round in 0..=settings.max_rounds {
            if self.is_closed() {
                break;
            }

            for endpoint in self.inner.pool.snapshot() {
                attempts += 1;
                match self.try_endpoint(&endpoint).await {
                    Ok(session) => {
                        if self.is_closed() {
                            let _ = session.transport().disconnect().await;
                            self.inner.slot.write().state = ConnectionState::Disconnected;
                            return Err(SdkError::NotConnected);
                        }
                        return Ok(self.install(session));
                    }
                    Err(e) => {
                        warn!(
                            endpoint = %endpoint,
                            round,
                            attempt = attempts,
                            error = %e,
                            "endpoint failed"
                        );
                        self.inner.slot.write().reconnect_attempts += 1;
                        last_error = Some(e);
                    }
                }
            }

            if round < settings.max_rounds {
                debug!(
                    round,
                    delay_ms = settings.round_delay.as_millis() as u64,
                    "all endpoints failed, waiting before next round"
                );
                tokio::time::sleep(settings.round_delay).await;
            }
        }

        self.inner.slot.write().state = ConnectionState::Disconnected;

        if self.is_closed() {
            return Err(SdkError::NotConnected);
        }

        Err(SdkError::NoEndpointReachable {
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| SdkError::config("endpoint pool is empty"))),
        })
    }

    async fn try_endpoint(&self, endpoint: &Endpoint) -> Result<Session> {
        let limit = self.inner.settings.connect_timeout;
        debug!(endpoint = %endpoint, timeout_ms = limit.as_millis() as u64, "opening transport");

        let transport = timeout(limit, self.inner.connector.open(endpoint))
            .await
            .map_err(|_| SdkError::ConnectionTimeout(limit))??;

        let ready = async {
            timeout(limit, transport.await_ready())
                .await
                .map_err(|_| SdkError::ConnectionTimeout(limit))??;
            timeout(limit, Session::establish(endpoint.clone(), transport.clone()))
                .await
                .map_err(|_| SdkError::ConnectionTimeout(limit))?
        }
        .await;

        if ready.is_err() {
            let _ = transport.disconnect().await;
        }
        ready
    }

    fn install(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let previous = {
            let mut slot = self.inner.slot.write();
            slot.state = ConnectionState::Connected;
            slot.reconnect_attempts = 0;
            slot.session.replace(session.clone())
        };

        info!(
            endpoint = %session.endpoint(),
            chain = %session.chain().chain,
            spec_version = session.runtime().spec_version,
            "connected"
        );

        self.inner.events.publish(ConnectionEvent::Connected {
            endpoint: session.endpoint().url().to_string(),
            chain: session.chain().chain.clone(),
        });

        self.watch_transport(&session);

        if let Some(old) = previous {
            tokio::spawn(async move {
                let _ = old.transport().disconnect().await;
            });
        }

        session
    }

    fn watch_transport(&self, session: &Session) {
        let mut events = session.transport().events();
        let already_down = !session.transport().is_connected();
        let notice = DisconnectNotice {
            session_id: session.id(),
            endpoint: session.endpoint().clone(),
        };
        let notices = self.inner.notices.clone();

        tokio::spawn(async move {
            if !already_down {
                loop {
                    match events.recv().await {
                        Ok(TransportEvent::Disconnected) | Err(broadcast::error::RecvError::Closed) => break,
                        Ok(TransportEvent::Error(message)) => {
                            warn!(endpoint = %notice.endpoint, error = %message, "transport error");
                        }
                        Ok(TransportEvent::Connected) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "transport events lagged");
                        }
                    }
                }
            }
            let _ = notices.send(notice);
        });
    }

    /// The live session, or `NotConnected`
    pub fn current_session(&self) -> Result<Arc<Session>> {
        self.inner
            .slot
            .read()
            .session
            .as_ref()
            .filter(|s| s.is_live())
            .cloned()
            .ok_or(SdkError::NotConnected)
    }

    /// Drop the session if it is still the current one
    pub(crate) fn invalidate(&self, session_id: Uuid) -> Option<Arc<Session>> {
        let mut slot = self.inner.slot.write();
        if slot.session.as_ref().map(|s| s.id()) != Some(session_id) {
            return None;
        }
        if slot.state == ConnectionState::Connected {
            slot.state = ConnectionState::Disconnected;
        }
        slot.session.take()
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.inflight.lock().is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.current_session().is_ok()
    }

    pub fn status(&self) -> ConnectionStatus {
        let slot = self.inner.slot.read();
        let live = slot.session.as_ref().filter(|s| s.is_live());
        let state = match (slot.state, live) {
            (ConnectionState::Connected, None) => ConnectionState::Disconnected,
            (state, _) => state,
        };
        ConnectionStatus {
            state,
            endpoint: live.map(|s| s.endpoint().url().to_string()),
            reconnect_attempts: slot.reconnect_attempts,
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.inner.pool
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub fn settings(&self) -> ConnectSettings {
        self.inner.settings
    }

    /// Tear down the session and suppress automatic reconnection until the next `connect`
    pub async fn close(&self) -> Result<()> {
        if let Some(session) = self.detach() {
            info!(endpoint = %session.endpoint(), "closing session");
            session.transport().disconnect().await?;
        }
        Ok(())
    }

    /// Mark the manager closed and hand back the session for teardown
    pub(crate) fn detach(&self) -> Option<Arc<Session>> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut slot = self.inner.slot.write();
        slot.state = ConnectionState::Disconnected;
        slot.session.take()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
