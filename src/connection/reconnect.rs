//! Automatic recovery after transport loss

use crate::connection::{ConnectionManager, DisconnectNotice};
use crate::error::{Result, SdkError};
use crate::events::ConnectionEvent;
use crate::session::Session;
use crate::types::Endpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reacts to disconnect notices by rotating the pool and reconnecting once
///
/// A failed recovery is reported through [`ConnectionEvent::ReconnectFailed`]
/// and not retried here; the next outbound call connects lazily.
#[derive(Clone)]
pub struct ReconnectCoordinator {
    manager: ConnectionManager,
    settle_delay: Duration,
}

impl ReconnectCoordinator {
    pub fn new(manager: ConnectionManager, settle_delay: Duration) -> Self {
        Self {
            manager,
            settle_delay,
        }
    }

    /// Start handling notices in the background
    pub fn spawn(self, mut notices: tokio::sync::mpsc::UnboundedReceiver<DisconnectNotice>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                self.on_disconnect(notice).await;
            }
            debug!("reconnect coordinator stopped");
        })
    }

    async fn on_disconnect(&self, notice: DisconnectNotice) {
        let Some(previous) = self.manager.invalidate(notice.session_id) else {
            debug!(endpoint = %notice.endpoint, "ignoring disconnect of replaced session");
            return;
        };

        warn!(endpoint = %notice.endpoint, "connection lost");
        self.manager.events().publish(ConnectionEvent::Disconnected {
            endpoint: notice.endpoint.url().to_string(),
        });

        if self.manager.is_closed() {
            return;
        }

        match self.recover(&notice.endpoint, &previous).await {
            Ok(session) => {
                info!(endpoint = %session.endpoint(), "reconnected");
            }
            Err(SdkError::AlreadyConnecting) => {
                debug!("connect already in flight, leaving recovery to it");
            }
            Err(SdkError::NotConnected) if self.manager.is_closed() => {
                debug!("client closed during recovery");
            }
            Err(e) => {
                error!(endpoint = %notice.endpoint, error = %e, "reconnect failed");
                self.manager
                    .events()
                    .publish(ConnectionEvent::ReconnectFailed { error: e });
            }
        }
    }

    async fn recover(&self, failed: &Endpoint, previous: &Session) -> Result<Arc<Session>> {
        if self.manager.is_connecting() {
            return Err(SdkError::AlreadyConnecting);
        }

        self.manager.pool().deprioritize(failed);
        tokio::time::sleep(self.settle_delay).await;

        if self.manager.is_closed() {
            return Err(SdkError::NotConnected);
        }

        // A caller may have reconnected while we were waiting
        if let Ok(session) = self.manager.current_session() {
            debug!(endpoint = %session.endpoint(), "session restored during settle delay");
            log_runtime_change(previous, &session);
            return Ok(session);
        }
        if self.manager.is_connecting() {
            return Err(SdkError::AlreadyConnecting);
        }

        let session = self.manager.join_or_start().await?;
        log_runtime_change(previous, &session);
        Ok(session)
    }

    /// Force a rotation away from the current endpoint and connect again
    pub async fn reconnect_now(&self) -> Result<Arc<Session>> {
        if self.manager.is_connecting() {
            return Err(SdkError::AlreadyConnecting);
        }

        let previous = self.manager.current_session().ok();
        if let Some(previous) = &previous {
            info!(endpoint = %previous.endpoint(), "reconnect requested");
            self.manager.pool().deprioritize(previous.endpoint());
        }

        let session = self.manager.join_or_start().await?;
        if let Some(previous) = &previous {
            log_runtime_change(previous, &session);
        }
        Ok(session)
    }
}

fn log_runtime_change(previous: &Session, current: &Session) {
    let (old, new) = (previous.runtime(), current.runtime());
    if old.spec_name != new.spec_name || old.spec_version != new.spec_version {
        warn!(
            old_spec = %old.spec_name,
            old_version = old.spec_version,
            new_spec = %new.spec_name,
            new_version = new.spec_version,
            "runtime changed across reconnect"
        );
    }
    if previous.chain().genesis_hash != current.chain().genesis_hash {
        error!(
            old_genesis = %previous.chain().genesis_hash,
            new_genesis = %current.chain().genesis_hash,
            "reconnected to a different chain"
        );
    }
}
