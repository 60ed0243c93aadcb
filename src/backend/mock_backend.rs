//! Mock WiFi backend for testing

use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

use crate::backend::WifiBackend;
use crate::core::error::{WifiError, WifiResult};
use crate::core::types::{AccessPoint, ConnectionState, InterfaceRecord, WifiNetwork};

/// Internal state for the mock backend
#[derive(Debug, Clone)]
struct MockState {
    adapters: Vec<InterfaceRecord>,
    scan_results: Vec<WifiNetwork>,
    scan_delay: Duration,
    scan_failure: Option<WifiError>,
    connect_failure: Option<WifiError>,
    reset_failure: Option<WifiError>,
    auto_associate: bool,
    connect_calls: usize,
    reset_calls: usize,
}

/// Mock WiFi backend for testing
///
/// Allows configuring behavior for tests without requiring actual hardware.
#[derive(Debug, Clone)]
pub struct MockWifiBackend {
    inner: Arc<Mutex<MockState>>,
}

impl MockWifiBackend {
    /// Create a new mock backend with a single disconnected `wlan0`
    pub fn new() -> Self {
        Self::with_adapters(&["wlan0"])
    }

    pub fn with_adapters(names: &[&str]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                adapters: names
                    .iter()
                    .map(|n| InterfaceRecord::disconnected(*n))
                    .collect(),
                scan_results: vec![],
                scan_delay: Duration::ZERO,
                scan_failure: None,
                connect_failure: None,
                reset_failure: None,
                auto_associate: true,
                connect_calls: 0,
                reset_calls: 0,
            })),
        }
    }

    /// Configure mock to return specific networks on scan
    pub async fn set_scan_results(&self, networks: Vec<WifiNetwork>) {
        self.inner.lock().await.scan_results = networks;
    }

    /// Make each scan take `delay`
    pub async fn set_scan_delay(&self, delay: Duration) {
        self.inner.lock().await.scan_delay = delay;
    }

    /// Configure mock to fail scan operations
    pub async fn set_scan_failure(&self, should_fail: bool) {
        self.inner.lock().await.scan_failure =
            should_fail.then(|| WifiError::ScanFailed("Mock scan failure".into()));
    }

    /// Configure mock to fail connect operations with `error`
    pub async fn set_connect_failure(&self, error: Option<WifiError>) {
        self.inner.lock().await.connect_failure = error;
    }

    /// Configure mock to fail reset operations with `error`
    pub async fn set_reset_failure(&self, error: Option<WifiError>) {
        self.inner.lock().await.reset_failure = error;
    }

    /// When false, connect leaves the adapter connecting until
    /// [`complete_connection`](Self::complete_connection) is called
    pub async fn set_auto_associate(&self, auto: bool) {
        self.inner.lock().await.auto_associate = auto;
    }

    /// Simulate the adapter finishing association with its pending SSID
    pub async fn complete_connection(&self, adapter: &str) {
        let mut state = self.inner.lock().await;
        if let Some(record) = state.adapters.iter_mut().find(|r| r.adapter_name == adapter) {
            record.state = ConnectionState::Connected;
        }
    }

    pub async fn connect_calls(&self) -> usize {
        self.inner.lock().await.connect_calls
    }

    pub async fn reset_calls(&self) -> usize {
        self.inner.lock().await.reset_calls
    }
}

impl Default for MockWifiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiBackend for MockWifiBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn interfaces(&self) -> WifiResult<Vec<InterfaceRecord>> {
        Ok(self.inner.lock().await.adapters.clone())
    }

    async fn scan(&self, _adapter: Option<&str>) -> WifiResult<Vec<WifiNetwork>> {
        let (delay, result) = {
            let state = self.inner.lock().await;
            let result = match &state.scan_failure {
                Some(e) => Err(e.clone()),
                None => Ok(state.scan_results.clone()),
            };
            (state.scan_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn connect(
        &self,
        ap: &AccessPoint,
        adapter: &str,
        _timeout: Duration,
    ) -> WifiResult<()> {
        let mut state = self.inner.lock().await;
        state.connect_calls += 1;
        if let Some(e) = &state.connect_failure {
            return Err(e.clone());
        }

        let auto_associate = state.auto_associate;
        let record = state
            .adapters
            .iter_mut()
            .find(|r| r.adapter_name == adapter)
            .ok_or_else(|| WifiError::AdapterNotFound(adapter.to_string()))?;
        record.state = if auto_associate {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        };
        record.ssid = Some(ap.ssid.clone());
        Ok(())
    }

    async fn reset(&self, adapter: &str) -> WifiResult<()> {
        let mut state = self.inner.lock().await;
        state.reset_calls += 1;
        if let Some(e) = &state.reset_failure {
            return Err(e.clone());
        }
        let record = state
            .adapters
            .iter_mut()
            .find(|r| r.adapter_name == adapter)
            .ok_or_else(|| WifiError::AdapterNotFound(adapter.to_string()))?;
        *record = InterfaceRecord::disconnected(adapter);
        Ok(())
    }
}
