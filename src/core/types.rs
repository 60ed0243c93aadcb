//! Domain types for WiFi adapter control

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{WifiError, WifiResult};

/// Maximum SSID length in bytes (IEEE 802.11)
pub const MAX_SSID_LEN: usize = 32;

/// WiFi connection state of an adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl TryFrom<u8> for ConnectionState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(ConnectionState::Disconnected),
            1 => Ok(ConnectionState::Connecting),
            2 => Ok(ConnectionState::Connected),
            _ => Err(()),
        }
    }
}

impl From<ConnectionState> for u8 {
    fn from(state: ConnectionState) -> Self {
        state as u8
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Snapshot of a wireless adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceRecord {
    /// Adapter name as the OS reports it (`wlan0`, `en0`, `Wi-Fi`)
    pub adapter_name: String,
    pub state: ConnectionState,
    /// Associated SSID; only set while connecting or connected
    pub ssid: Option<String>,
}

impl InterfaceRecord {
    pub fn new(
        adapter_name: impl Into<String>,
        state: ConnectionState,
        ssid: Option<String>,
    ) -> Self {
        let ssid = match state {
            ConnectionState::Disconnected => None,
            _ => ssid.filter(|s| !s.is_empty()),
        };
        Self {
            adapter_name: adapter_name.into(),
            state,
            ssid,
        }
    }

    pub fn disconnected(adapter_name: impl Into<String>) -> Self {
        Self::new(adapter_name, ConnectionState::Disconnected, None)
    }

    pub fn is_connected_to(&self, ssid: &str) -> bool {
        self.state == ConnectionState::Connected && self.ssid.as_deref() == Some(ssid)
    }
}

/// Access point to connect to
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl AccessPoint {
    pub fn new(ssid: impl Into<String>, password: Option<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn open(ssid: impl Into<String>) -> Self {
        Self::new(ssid, None)
    }

    /// Check the SSID is 1 to 32 bytes
    pub fn validate(&self) -> WifiResult<()> {
        if self.ssid.is_empty() {
            return Err(WifiError::InvalidSsid("SSID must not be empty".into()));
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(WifiError::InvalidSsid(format!(
                "SSID is {} bytes, maximum is {}",
                self.ssid.len(),
                MAX_SSID_LEN
            )));
        }
        Ok(())
    }
}

// Keep the password out of logs.
impl fmt::Debug for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPoint")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Represents a discovered WiFi network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network SSID
    pub ssid: String,
    /// MAC address (BSSID)
    pub mac: String,
    /// Channel number, 0 if unknown
    pub channel: u16,
    /// Signal strength in dBm
    pub signal_level: i16,
    /// Security description as reported by the platform tool
    pub security: String,
}

impl WifiNetwork {
    pub fn access_point(&self) -> AccessPoint {
        AccessPoint::open(self.ssid.clone())
    }
}

/// WiFi scan state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Scanning = 1,
    Finished = 2,
    Error = 3,
}

impl TryFrom<u8> for ScanState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(ScanState::Idle),
            1 => Ok(ScanState::Scanning),
            2 => Ok(ScanState::Finished),
            3 => Ok(ScanState::Error),
            _ => Err(()),
        }
    }
}

impl From<ScanState> for u8 {
    fn from(state: ScanState) -> Self {
        state as u8
    }
}
