//! WiFi backend trait definition

use std::time::Duration;

use trait_variant::make;

use crate::core::error::WifiResult;
use crate::core::types::{AccessPoint, InterfaceRecord, WifiNetwork};

/// Abstraction over a platform's WiFi control tooling
///
/// This trait enables testing by allowing mock implementations
/// while providing a standard interface for WiFi operations.
#[make(Send)]
pub trait WifiBackend: Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Enumerate wireless adapters with their current state
    async fn interfaces(&self) -> WifiResult<Vec<InterfaceRecord>>;

    /// Scan for available WiFi networks
    ///
    /// `adapter` selects the adapter to scan on where the platform allows it.
    /// The scan operation may take several seconds.
    async fn scan(&self, adapter: Option<&str>) -> WifiResult<Vec<WifiNetwork>>;

    /// Ask the platform to join `ap` on `adapter`
    ///
    /// Returning `Ok` means the request was accepted, not that the adapter is
    /// associated yet. `timeout` bounds how long the tool itself may block.
    async fn connect(&self, ap: &AccessPoint, adapter: &str, timeout: Duration)
    -> WifiResult<()>;

    /// Drop the adapter's association and restart the adapter
    ///
    /// Only `adapter` is affected. Backends without per-adapter restart
    /// control only disconnect.
    async fn reset(&self, adapter: &str) -> WifiResult<()>;
}
