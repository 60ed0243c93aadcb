//! WiFi Control
//!
//! A cross-platform facade over the operating system's WiFi tooling:
//! - NetworkManager (`nmcli`) and wpa_supplicant on Linux
//! - `airport` / `networksetup` on macOS
//! - `netsh wlan` on Windows

pub mod backend;
pub mod config;
pub mod core;

pub use core::{
    error::{ServiceError, WifiError},
    events::WifiEvent,
    service::WifiControl,
    types::{AccessPoint, ConnectionState, InterfaceRecord, ScanState, WifiNetwork},
};
