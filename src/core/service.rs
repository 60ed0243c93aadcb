//! Main WiFi control facade

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    backend::WifiBackend,
    config::Settings,
    core::{
        connector::ConnectionService,
        error::ServiceResult,
        events::{EventBus, WifiEvent},
        scanner::ScanService,
        types::{AccessPoint, ConnectionState, InterfaceRecord, ScanState, WifiNetwork},
    },
};

/// Main WiFi control facade
///
/// Orchestrates interface queries, scanning, connecting and resetting on
/// top of a single platform backend. Share it with `Arc` when several tasks
/// drive the same adapters.
pub struct WifiControl<B: WifiBackend> {
    backend: Arc<B>,
    settings: Settings,
    default_interface: Option<String>,
    events: EventBus,
    pub scanner: Arc<ScanService<B>>,
    pub connector: Arc<ConnectionService<B>>,
}

impl<B: WifiBackend> WifiControl<B> {
    /// Initialize the facade
    ///
    /// Queries the backend once to pick the default interface: the
    /// configured one when the backend reports it, otherwise the first
    /// adapter found.
    pub async fn init(settings: Settings, backend: Arc<B>) -> ServiceResult<Self> {
        let events = EventBus::new();
        let scanner = Arc::new(ScanService::new(backend.clone(), events.clone()));
        let connector = Arc::new(ConnectionService::new(
            backend.clone(),
            events.clone(),
            settings.connection_timeout,
        ));

        let interfaces = backend.interfaces().await?;
        let default_interface = match &settings.interface {
            Some(wanted) if interfaces.iter().any(|r| &r.adapter_name == wanted) => {
                Some(wanted.clone())
            }
            Some(wanted) => {
                warn!(
                    "Configured interface {} not reported by {} backend",
                    wanted,
                    backend.name()
                );
                Some(wanted.clone())
            }
            None => interfaces.first().map(|r| r.adapter_name.clone()),
        };

        match &default_interface {
            Some(iface) => info!(
                backend = backend.name(),
                debug = settings.debug,
                timeout_ms = settings.connection_timeout.as_millis() as u64,
                "WiFi control initialized on interface {}",
                iface
            ),
            None => warn!(
                backend = backend.name(),
                "WiFi control initialized without a wireless interface"
            ),
        }

        Ok(Self {
            backend,
            settings,
            default_interface,
            events,
            scanner,
            connector,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Interface used by [`scan`](Self::scan)
    pub fn default_interface(&self) -> Option<&str> {
        self.default_interface.as_deref()
    }

    /// Receive state change events
    pub fn subscribe(&self) -> broadcast::Receiver<WifiEvent> {
        self.events.subscribe()
    }

    /// List wireless interfaces and their current state
    pub async fn list_interfaces(&self) -> ServiceResult<Vec<InterfaceRecord>> {
        Ok(self.backend.interfaces().await?)
    }

    /// Scan for networks on the default interface
    pub async fn scan(&self) -> ServiceResult<Vec<WifiNetwork>> {
        self.scanner.scan(self.default_interface.as_deref()).await
    }

    /// Get scan state
    pub async fn scan_state(&self) -> ScanState {
        self.scanner.state().await
    }

    /// Results of the last successful scan
    pub async fn last_scan_results(&self) -> Option<Vec<WifiNetwork>> {
        self.scanner.results().await.ok()
    }

    /// Connect `adapter` to `ap`, waiting up to the connection timeout
    pub async fn connect(&self, ap: &AccessPoint, adapter: &str) -> ServiceResult<InterfaceRecord> {
        self.connector.connect(ap, adapter).await
    }

    /// Reset `adapter`
    pub async fn reset(&self, adapter: &str) -> ServiceResult<()> {
        self.connector.reset(adapter).await
    }

    /// Connection state as tracked by this facade
    pub async fn connection_state(&self, adapter: &str) -> ConnectionState {
        self.connector.state(adapter).await
    }
}
