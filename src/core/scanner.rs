//! WiFi scanning service with state machine

use std::{collections::HashSet, sync::Arc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    backend::WifiBackend,
    core::{
        error::{ServiceError, ServiceResult},
        events::{EventBus, WifiEvent},
        types::{ScanState, WifiNetwork},
    },
};

const SCAN_CANCELLED: &str = "scan cancelled";

/// Scan state machine
///
/// Manages the state transitions for WiFi scanning operations
#[derive(Debug)]
struct ScanStateMachine {
    state: ScanState,
    results: Option<Vec<WifiNetwork>>,
    error: Option<String>,
}

impl ScanStateMachine {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            results: None,
            error: None,
        }
    }

    /// Start a scan operation
    fn start_scan(&mut self) -> ServiceResult<()> {
        match self.state {
            ScanState::Idle | ScanState::Finished | ScanState::Error => {
                self.state = ScanState::Scanning;
                self.results = None;
                self.error = None;
                Ok(())
            }
            _ => Err(ServiceError::OperationInProgress),
        }
    }

    /// Mark scan as completed with results
    fn complete_scan(&mut self, networks: Vec<WifiNetwork>) {
        self.state = ScanState::Finished;
        self.results = Some(networks);
        self.error = None;
    }

    /// Mark scan as failed
    fn fail_scan(&mut self, error: String) {
        self.state = ScanState::Error;
        self.error = Some(error);
        self.results = None;
    }

    /// Reset to idle state
    fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.results = None;
        self.error = None;
    }

    fn state(&self) -> ScanState {
        self.state
    }

    fn results(&self) -> Option<&[WifiNetwork]> {
        self.results.as_deref()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Drop hidden networks and duplicate BSSIDs, strongest signal first
fn normalize(mut networks: Vec<WifiNetwork>) -> Vec<WifiNetwork> {
    networks.retain(|n| !n.ssid.is_empty());
    networks.sort_by(|a, b| b.signal_level.cmp(&a.signal_level));

    let mut seen = HashSet::new();
    networks.retain(|n| seen.insert((n.ssid.clone(), n.mac.clone())));
    networks
}

fn cancel_scan(sm: &mut ScanStateMachine, events: &EventBus) {
    sm.fail_scan(SCAN_CANCELLED.to_string());
    events.publish(WifiEvent::scan_failed(SCAN_CANCELLED.to_string()));
}

/// Fails the scan if its future is dropped before the backend answers
struct ScanGuard {
    state_machine: Arc<RwLock<ScanStateMachine>>,
    events: EventBus,
    armed: bool,
}

impl ScanGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Scan cancelled");
        match self.state_machine.try_write() {
            Ok(mut sm) => cancel_scan(&mut sm, &self.events),
            Err(_) => {
                // The state stays Scanning until this runs, so no newer scan
                // can be clobbered
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    return;
                };
                let state_machine = self.state_machine.clone();
                let events = self.events.clone();
                handle.spawn(async move {
                    cancel_scan(&mut *state_machine.write().await, &events);
                });
            }
        }
    }
}

/// WiFi scanning service
///
/// Coordinates scanning operations using the WiFi backend
pub struct ScanService<B: WifiBackend> {
    backend: Arc<B>,
    state_machine: Arc<RwLock<ScanStateMachine>>,
    events: EventBus,
}

impl<B: WifiBackend> ScanService<B> {
    /// Create a new scan service with the given backend
    pub fn new(backend: Arc<B>, events: EventBus) -> Self {
        Self {
            backend,
            state_machine: Arc::new(RwLock::new(ScanStateMachine::new())),
            events,
        }
    }

    /// Run a WiFi scan and wait for its results
    ///
    /// Returns an error if a scan is already in progress. Dropping the
    /// returned future fails the scan, so a later scan can start.
    pub async fn scan(&self, adapter: Option<&str>) -> ServiceResult<Vec<WifiNetwork>> {
        // Check and update state
        self.state_machine.write().await.start_scan()?;
        let mut guard = ScanGuard {
            state_machine: self.state_machine.clone(),
            events: self.events.clone(),
            armed: true,
        };
        self.events.publish(WifiEvent::scan(ScanState::Scanning));

        match self.backend.scan(adapter).await {
            Ok(networks) => {
                let networks = normalize(networks);
                info!("Scan found {} networks", networks.len());
                self.state_machine
                    .write()
                    .await
                    .complete_scan(networks.clone());
                guard.disarm();
                self.events.publish(WifiEvent::scan_finished(networks.len()));
                Ok(networks)
            }
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.state_machine.write().await.fail_scan(e.to_string());
                guard.disarm();
                self.events.publish(WifiEvent::scan_failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Get the current scan state
    pub async fn state(&self) -> ScanState {
        self.state_machine.read().await.state()
    }

    /// Get scan results (if available)
    pub async fn results(&self) -> ServiceResult<Vec<WifiNetwork>> {
        let sm = self.state_machine.read().await;
        sm.results()
            .map(|r| r.to_vec())
            .ok_or(ServiceError::NoScanResults)
    }

    /// Error message of the last failed scan
    pub async fn last_error(&self) -> Option<String> {
        self.state_machine.read().await.error().map(str::to_string)
    }

    /// Reset the scan state to idle
    pub async fn reset(&self) {
        self.state_machine.write().await.reset();
        self.events.publish(WifiEvent::scan(ScanState::Idle));
    }
}
