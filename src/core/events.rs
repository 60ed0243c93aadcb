//! State change events broadcast by the facade

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::types::{ConnectionState, ScanState};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted on adapter and scan state changes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WifiEvent {
    InterfaceStateChanged {
        adapter: String,
        state: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        ssid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ScanStateChanged {
        state: ScanState,
        #[serde(skip_serializing_if = "Option::is_none")]
        networks: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WifiEvent {
    pub fn interface(adapter: &str, state: ConnectionState, ssid: Option<String>) -> Self {
        WifiEvent::InterfaceStateChanged {
            adapter: adapter.to_string(),
            state,
            ssid,
            error: None,
        }
    }

    pub fn interface_failed(adapter: &str, error: String) -> Self {
        WifiEvent::InterfaceStateChanged {
            adapter: adapter.to_string(),
            state: ConnectionState::Disconnected,
            ssid: None,
            error: Some(error),
        }
    }

    pub fn scan(state: ScanState) -> Self {
        WifiEvent::ScanStateChanged {
            state,
            networks: None,
            error: None,
        }
    }

    pub fn scan_finished(networks: usize) -> Self {
        WifiEvent::ScanStateChanged {
            state: ScanState::Finished,
            networks: Some(networks),
            error: None,
        }
    }

    pub fn scan_failed(error: String) -> Self {
        WifiEvent::ScanStateChanged {
            state: ScanState::Error,
            networks: None,
            error: Some(error),
        }
    }
}

/// Fan-out of [`WifiEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WifiEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WifiEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: WifiEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_event_serialization() {
        let event = WifiEvent::interface("wlan0", ConnectionState::Connected, Some("Home".into()));
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""event":"interface_state_changed""#));
        assert!(json.contains(r#""state":"connected""#));
        assert!(json.contains(r#""ssid":"Home""#));
        assert!(!json.contains(r#""error""#));

        let deserialized: WifiEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[test]
    fn test_scan_event_serialization() {
        let json = serde_json::to_string(&WifiEvent::scan_finished(3)).unwrap();
        assert!(json.contains(r#""event":"scan_state_changed""#));
        assert!(json.contains(r#""networks":3"#));
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(WifiEvent::scan(ScanState::Scanning));

        assert_eq!(rx.recv().await.unwrap(), WifiEvent::scan(ScanState::Scanning));
    }

    #[test]
    fn test_event_bus_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(WifiEvent::scan(ScanState::Idle));
    }
}
