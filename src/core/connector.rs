//! WiFi connection service with per-adapter state machines

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    backend::WifiBackend,
    core::{
        error::{ServiceError, ServiceResult, WifiError},
        events::{EventBus, WifiEvent},
        types::{AccessPoint, ConnectionState, InterfaceRecord},
    },
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_CANCELLED: &str = "connect cancelled";

/// Tracked state of one adapter
#[derive(Debug, Default)]
struct AdapterSlot {
    state: ConnectionState,
    ssid: Option<String>,
    error: Option<String>,
    /// Bumped by every reset; a connect attempt only applies its outcome
    /// while the generation it started with is current
    generation: u64,
}

/// Connection state machine
#[derive(Debug, Default)]
struct ConnectionStateMachine {
    adapters: HashMap<String, AdapterSlot>,
}

impl ConnectionStateMachine {
    fn new() -> Self {
        Self::default()
    }

    /// Start connection attempt, returning its generation
    fn start_connect(&mut self, adapter: &str, ssid: String) -> ServiceResult<u64> {
        let slot = self.adapters.entry(adapter.to_string()).or_default();
        match slot.state {
            ConnectionState::Connecting => Err(ServiceError::OperationInProgress),
            _ => {
                slot.state = ConnectionState::Connecting;
                slot.ssid = Some(ssid);
                slot.error = None;
                Ok(slot.generation)
            }
        }
    }

    fn is_current(&self, adapter: &str, generation: u64) -> bool {
        self.adapters
            .get(adapter)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Mark connection as successful
    fn complete_connect(&mut self, adapter: &str, generation: u64) -> bool {
        match self.adapters.get_mut(adapter) {
            Some(slot) if slot.generation == generation => {
                slot.state = ConnectionState::Connected;
                slot.error = None;
                true
            }
            _ => false,
        }
    }

    /// Mark connection as failed
    fn fail_connect(&mut self, adapter: &str, generation: u64, error: String) -> bool {
        match self.adapters.get_mut(adapter) {
            Some(slot) if slot.generation == generation => {
                slot.state = ConnectionState::Disconnected;
                slot.ssid = None;
                slot.error = Some(error);
                true
            }
            _ => false,
        }
    }

    /// Reset the adapter, superseding any attempt in flight
    fn reset(&mut self, adapter: &str) {
        let slot = self.adapters.entry(adapter.to_string()).or_default();
        slot.generation += 1;
        slot.state = ConnectionState::Disconnected;
        slot.ssid = None;
        slot.error = None;
    }

    /// Record a failed reset, tracking what the backend still reports
    fn fail_reset(&mut self, adapter: &str, observed: Option<InterfaceRecord>, error: String) {
        let slot = self.adapters.entry(adapter.to_string()).or_default();
        if let Some(record) = observed {
            slot.state = record.state;
            slot.ssid = record.ssid;
        }
        slot.error = Some(error);
    }

    fn state(&self, adapter: &str) -> ConnectionState {
        self.adapters
            .get(adapter)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    fn status(&self, adapter: &str) -> InterfaceRecord {
        match self.adapters.get(adapter) {
            Some(slot) => InterfaceRecord::new(adapter, slot.state, slot.ssid.clone()),
            None => InterfaceRecord::disconnected(adapter),
        }
    }

    fn last_error(&self, adapter: &str) -> Option<String> {
        self.adapters.get(adapter).and_then(|slot| slot.error.clone())
    }
}

fn cancel_attempt(
    sm: &mut ConnectionStateMachine,
    events: &EventBus,
    adapter: &str,
    generation: u64,
) {
    if sm.fail_connect(adapter, generation, CONNECT_CANCELLED.to_string()) {
        events.publish(WifiEvent::interface_failed(
            adapter,
            CONNECT_CANCELLED.to_string(),
        ));
    }
}

/// Fails the attempt if its future is dropped before it finishes
struct ConnectGuard {
    state_machine: Arc<RwLock<ConnectionStateMachine>>,
    events: EventBus,
    adapter: String,
    generation: u64,
    armed: bool,
}

impl ConnectGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Connecting {} cancelled", self.adapter);
        match self.state_machine.try_write() {
            Ok(mut sm) => cancel_attempt(&mut sm, &self.events, &self.adapter, self.generation),
            Err(_) => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    return;
                };
                let state_machine = self.state_machine.clone();
                let events = self.events.clone();
                let adapter = std::mem::take(&mut self.adapter);
                let generation = self.generation;
                handle.spawn(async move {
                    let mut sm = state_machine.write().await;
                    cancel_attempt(&mut sm, &events, &adapter, generation);
                });
            }
        }
    }
}

/// WiFi connection service
pub struct ConnectionService<B: WifiBackend> {
    backend: Arc<B>,
    state_machine: Arc<RwLock<ConnectionStateMachine>>,
    events: EventBus,
    timeout: Duration,
}

impl<B: WifiBackend> ConnectionService<B> {
    /// Create a new connection service
    ///
    /// `timeout` bounds each connect attempt from request to association.
    pub fn new(backend: Arc<B>, events: EventBus, timeout: Duration) -> Self {
        Self {
            backend,
            state_machine: Arc::new(RwLock::new(ConnectionStateMachine::new())),
            events,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn require_adapter(&self, adapter: &str) -> ServiceResult<InterfaceRecord> {
        self.backend
            .interfaces()
            .await?
            .into_iter()
            .find(|r| r.adapter_name == adapter)
            .ok_or_else(|| WifiError::AdapterNotFound(adapter.to_string()).into())
    }

    /// Connect `adapter` to `ap` and wait until it is associated
    pub async fn connect(&self, ap: &AccessPoint, adapter: &str) -> ServiceResult<InterfaceRecord> {
        ap.validate()?;
        self.require_adapter(adapter).await?;

        // Check and update state
        let generation = self
            .state_machine
            .write()
            .await
            .start_connect(adapter, ap.ssid.clone())?;
        let mut guard = ConnectGuard {
            state_machine: self.state_machine.clone(),
            events: self.events.clone(),
            adapter: adapter.to_string(),
            generation,
            armed: true,
        };
        self.events.publish(WifiEvent::interface(
            adapter,
            ConnectionState::Connecting,
            Some(ap.ssid.clone()),
        ));
        info!("Connecting {} to {}", adapter, ap.ssid);

        let result = match tokio::time::timeout(self.timeout, self.attempt(ap, adapter, generation))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout {
                ssid: ap.ssid.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(record) => {
                let completed = self
                    .state_machine
                    .write()
                    .await
                    .complete_connect(adapter, generation);
                guard.disarm();
                if completed {
                    info!("{} connected to {}", adapter, ap.ssid);
                    self.events.publish(WifiEvent::interface(
                        adapter,
                        ConnectionState::Connected,
                        record.ssid.clone(),
                    ));
                    Ok(record)
                } else {
                    Err(ServiceError::Cancelled(adapter.to_string()))
                }
            }
            Err(e) => {
                warn!("Connecting {} to {} failed: {}", adapter, ap.ssid, e);
                let failed = self
                    .state_machine
                    .write()
                    .await
                    .fail_connect(adapter, generation, e.to_string());
                guard.disarm();
                if failed {
                    self.events
                        .publish(WifiEvent::interface_failed(adapter, e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        ap: &AccessPoint,
        adapter: &str,
        generation: u64,
    ) -> ServiceResult<InterfaceRecord> {
        self.backend.connect(ap, adapter, self.timeout).await?;
        debug!("Connect request accepted, waiting for association");

        let poll_interval = POLL_INTERVAL.min(self.timeout);
        loop {
            if !self
                .state_machine
                .read()
                .await
                .is_current(adapter, generation)
            {
                return Err(ServiceError::Cancelled(adapter.to_string()));
            }

            let record = self
                .backend
                .interfaces()
                .await?
                .into_iter()
                .find(|r| r.adapter_name == adapter)
                .ok_or_else(|| WifiError::AdapterNotFound(adapter.to_string()))?;

            if record.is_connected_to(&ap.ssid) {
                return Ok(record);
            }
            debug!("{} is {}, waiting", adapter, record.state);

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Reset `adapter`, leaving it disconnected
    pub async fn reset(&self, adapter: &str) -> ServiceResult<()> {
        self.require_adapter(adapter).await?;

        self.state_machine.write().await.reset(adapter);
        info!("Resetting {}", adapter);
        if let Err(e) = self.backend.reset(adapter).await {
            warn!("Resetting {} failed: {}", adapter, e);
            let observed = self
                .backend
                .interfaces()
                .await
                .ok()
                .and_then(|records| records.into_iter().find(|r| r.adapter_name == adapter));

            let mut sm = self.state_machine.write().await;
            sm.fail_reset(adapter, observed, e.to_string());
            let status = sm.status(adapter);
            drop(sm);

            self.events.publish(WifiEvent::InterfaceStateChanged {
                adapter: adapter.to_string(),
                state: status.state,
                ssid: status.ssid,
                error: Some(e.to_string()),
            });
            return Err(e.into());
        }

        self.events.publish(WifiEvent::interface(
            adapter,
            ConnectionState::Disconnected,
            None,
        ));
        Ok(())
    }

    /// Get tracked connection state of `adapter`
    pub async fn state(&self, adapter: &str) -> ConnectionState {
        self.state_machine.read().await.state(adapter)
    }

    /// Get tracked connection status of `adapter`
    pub async fn status(&self, adapter: &str) -> InterfaceRecord {
        self.state_machine.read().await.status(adapter)
    }

    /// Error message of the last failed attempt on `adapter`
    pub async fn last_error(&self, adapter: &str) -> Option<String> {
        self.state_machine.read().await.last_error(adapter)
    }
}
