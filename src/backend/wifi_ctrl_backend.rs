//! wpa_supplicant backend built on the wifi-ctrl crate

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use wifi_ctrl::sta::{
    Broadcast, BroadcastReceiver, KeyMgmt, RequestClient, ScanResult, SelectResult, Status,
    WifiSetup,
};

use crate::{
    backend::{
        WifiBackend,
        channel::frequency_to_channel,
        command::{CommandRunner, SystemRunner, args, run_checked},
    },
    core::{
        error::{WifiError, WifiResult},
        types::{AccessPoint, ConnectionState, InterfaceRecord, WifiNetwork},
    },
};

const BROADCAST_RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub struct WifiCtrlBackend<R: CommandRunner = SystemRunner> {
    interface: String,
    client: RequestClient,
    broadcast_receiver: BroadcastReceiver,
    runner: R,
}

impl WifiCtrlBackend<SystemRunner> {
    /// Attach to the wpa_supplicant control socket of `interface`
    pub async fn new(interface: String, verbose: bool) -> WifiResult<Self> {
        Self::with_runner(interface, SystemRunner::new(verbose)).await
    }
}

/// Removes an added network unless the connect attempt succeeded
///
/// Covers error returns as well as a caller dropping the connect future.
struct NetworkGuard {
    client: RequestClient,
    network_id: usize,
    armed: bool,
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let network_id = self.network_id;
        handle.spawn(async move {
            match client.remove_network(network_id).await {
                Ok(()) => debug!("Removed network {}", network_id),
                Err(e) => warn!("Failed to remove network {}: {}", network_id, e),
            }
        });
    }
}

impl<R: CommandRunner> WifiCtrlBackend<R> {
    pub async fn with_runner(interface: String, runner: R) -> WifiResult<Self> {
        let path = format!("/var/run/wpa_supplicant/{}", interface);
        let mut setup =
            WifiSetup::new().map_err(|e| WifiError::WpaSupplicantError(e.to_string()))?;
        setup.set_socket_path(path);

        let client = setup.get_request_client();
        let broadcast_receiver = setup.get_broadcast_receiver();
        let station = setup.complete();

        // Spawn the station runtime
        tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("WifiStation runtime error: {}", e);
            }
        });

        Ok(Self {
            interface,
            client,
            broadcast_receiver,
            runner,
        })
    }

    fn parse_wpa_state(wpa_state: &str) -> ConnectionState {
        match wpa_state {
            "COMPLETED" => ConnectionState::Connected,
            "ASSOCIATING" | "ASSOCIATED" | "AUTHENTICATING" | "4WAY_HANDSHAKE"
            | "GROUP_HANDSHAKE" => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Build the record for `interface` from `STATUS`
    ///
    /// Associated without an IPv4 address yet is still connecting.
    fn record_from_status(interface: &str, status: &Status, has_ipv4: bool) -> InterfaceRecord {
        let wpa_state = status
            .get("wpa_state")
            .map(|s| s.as_str())
            .unwrap_or("UNKNOWN");

        let state = match Self::parse_wpa_state(wpa_state) {
            ConnectionState::Connected if !has_ipv4 => ConnectionState::Connecting,
            state => state,
        };
        InterfaceRecord::new(interface, state, status.get("ssid").cloned())
    }

    fn network_from_scan(result: &ScanResult) -> WifiNetwork {
        let secured = ["WPA", "WEP", "SAE"]
            .iter()
            .any(|scheme| result.flags.contains(scheme));

        WifiNetwork {
            ssid: result.name.clone(),
            mac: result.mac.to_lowercase(),
            channel: frequency_to_channel(result.frequency.parse().unwrap_or(0)),
            signal_level: result.signal.clamp(i16::MIN as isize, i16::MAX as isize) as i16,
            security: if secured {
                result.flags.clone()
            } else {
                "open".to_string()
            },
        }
    }

    /// Interpret the outcome of `SELECT_NETWORK`
    ///
    /// `Ok(true)` once associated, `Ok(false)` while the outcome is still
    /// pending.
    fn select_outcome(result: SelectResult, ap: &AccessPoint) -> WifiResult<bool> {
        match result {
            SelectResult::Success | SelectResult::AlreadyConnected => Ok(true),
            SelectResult::Timeout => Ok(false),
            SelectResult::WrongPsk => Err(WifiError::AuthenticationFailed(ap.ssid.clone())),
            SelectResult::NotFound => Err(WifiError::NetworkNotFound(ap.ssid.clone())),
            other @ (SelectResult::PendingSelect | SelectResult::InvalidNetworkId) => Err(
                WifiError::WpaSupplicantError(format!("Failed to select network: {}", other)),
            ),
        }
    }

    fn parse_ipv4_present(ip_output: &str) -> bool {
        ip_output
            .lines()
            .any(|line| line.trim().starts_with("inet "))
    }

    async fn has_ipv4_address(&self) -> bool {
        match run_checked(
            &self.runner,
            "ip",
            &args(["-4", "addr", "show", self.interface.as_str()]),
        )
        .await
        {
            Ok(output) => Self::parse_ipv4_present(&output.stdout),
            Err(e) => {
                debug!("Address query failed: {}", e);
                false
            }
        }
    }

    async fn wait_for_association(
        &self,
        mut receiver: BroadcastReceiver,
        ap: &AccessPoint,
        timeout: Duration,
    ) -> WifiResult<()> {
        let start = Instant::now();

        loop {
            if start.elapsed() > timeout {
                return Err(WifiError::ConnectionFailed(format!(
                    "{} did not associate within {:?}",
                    ap.ssid, timeout
                )));
            }

            match tokio::time::timeout(BROADCAST_RECV_TIMEOUT, receiver.recv()).await {
                Ok(Ok(event)) => {
                    debug!("Received broadcast event: {:?}", event);
                    match event {
                        Broadcast::Connected => return Ok(()),
                        Broadcast::WrongPsk => {
                            return Err(WifiError::AuthenticationFailed(ap.ssid.clone()));
                        }
                        Broadcast::NetworkNotFound => {
                            return Err(WifiError::NetworkNotFound(ap.ssid.clone()));
                        }
                        // Seen while switching networks
                        _ => {}
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    warn!("Broadcast receiver lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(WifiError::WpaSupplicantError(
                        "Broadcast channel closed".to_string(),
                    ));
                }
                Err(_) => {}
            }
        }
    }
}

impl<R: CommandRunner> WifiBackend for WifiCtrlBackend<R> {
    fn name(&self) -> &'static str {
        "wpa_supplicant"
    }

    async fn interfaces(&self) -> WifiResult<Vec<InterfaceRecord>> {
        let status =
            self.client.get_status().await.map_err(|e| {
                WifiError::WpaSupplicantError(format!("Failed to get status: {}", e))
            })?;

        let has_ipv4 = self.has_ipv4_address().await;
        Ok(vec![Self::record_from_status(
            &self.interface,
            &status,
            has_ipv4,
        )])
    }

    async fn scan(&self, adapter: Option<&str>) -> WifiResult<Vec<WifiNetwork>> {
        if let Some(adapter) = adapter.filter(|a| *a != self.interface) {
            return Err(WifiError::AdapterNotFound(adapter.to_string()));
        }
        debug!("Starting WiFi scan on interface: {}", self.interface);

        let results = self
            .client
            .get_scan()
            .await
            .map_err(|e| WifiError::ScanFailed(e.to_string()))?;

        let networks: Vec<WifiNetwork> = results.iter().map(Self::network_from_scan).collect();

        debug!("Scan complete, found {} networks", networks.len());
        Ok(networks)
    }

    async fn connect(
        &self,
        ap: &AccessPoint,
        adapter: &str,
        timeout: Duration,
    ) -> WifiResult<()> {
        if adapter != self.interface {
            return Err(WifiError::AdapterNotFound(adapter.to_string()));
        }
        debug!("Connecting to network: {}", ap.ssid);
        let start = Instant::now();

        // Start listening to events BEFORE connecting to avoid race condition
        let receiver = self.broadcast_receiver.resubscribe();

        let network_id =
            self.client.add_network().await.map_err(|e| {
                WifiError::WpaSupplicantError(format!("Failed to add network: {}", e))
            })?;
        let mut guard = NetworkGuard {
            client: self.client.clone(),
            network_id,
            armed: true,
        };

        self.client
            .set_network_ssid(network_id, ap.ssid.clone())
            .await
            .map_err(|e| WifiError::WpaSupplicantError(format!("Failed to set SSID: {}", e)))?;

        match &ap.password {
            Some(password) => self
                .client
                .set_network_psk(network_id, password.clone())
                .await
                .map_err(|e| WifiError::WpaSupplicantError(format!("Failed to set PSK: {}", e)))?,
            None => self
                .client
                .set_network_keymgmt(network_id, KeyMgmt::None)
                .await
                .map_err(|e| {
                    WifiError::WpaSupplicantError(format!("Failed to set key_mgmt: {}", e))
                })?,
        }

        let selected = self.client.select_network(network_id).await.map_err(|e| {
            WifiError::WpaSupplicantError(format!("Failed to select network: {}", e))
        })?;
        if !Self::select_outcome(selected, ap)? {
            let remaining = timeout.saturating_sub(start.elapsed());
            self.wait_for_association(receiver, ap, remaining).await?;
        }

        guard.armed = false;
        if let Err(e) = self.client.save_config().await {
            warn!("Failed to save wpa_supplicant config: {}", e);
        }

        debug!("Connection initiated");
        Ok(())
    }

    async fn reset(&self, adapter: &str) -> WifiResult<()> {
        if adapter != self.interface {
            return Err(WifiError::AdapterNotFound(adapter.to_string()));
        }
        debug!("Disconnecting {}", adapter);

        // wpa_supplicant has no radio control; DISCONNECT stays disconnected
        // until the next connect
        self.client
            .send_custom("DISCONNECT".to_string())
            .await
            .map_err(|e| WifiError::WpaSupplicantError(format!("DISCONNECT failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::command::{CommandOutput, ScriptedRunner};
    use pretty_assertions::assert_eq;

    type Backend = WifiCtrlBackend<ScriptedRunner>;

    fn status(pairs: &[(&str, &str)]) -> Status {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn scan_result(flags: &str, frequency: &str) -> ScanResult {
        ScanResult {
            mac: "AA:BB:CC:DD:EE:FF".into(),
            frequency: frequency.into(),
            signal: -52,
            flags: flags.into(),
            name: "Home Net".into(),
        }
    }

    #[test]
    fn test_parse_wpa_state() {
        assert_eq!(
            Backend::parse_wpa_state("COMPLETED"),
            ConnectionState::Connected
        );
        assert_eq!(
            Backend::parse_wpa_state("4WAY_HANDSHAKE"),
            ConnectionState::Connecting
        );
        assert_eq!(
            Backend::parse_wpa_state("ASSOCIATED"),
            ConnectionState::Connecting
        );
        assert_eq!(
            Backend::parse_wpa_state("INACTIVE"),
            ConnectionState::Disconnected
        );
        assert_eq!(
            Backend::parse_wpa_state("UNKNOWN"),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_record_from_status() {
        let completed = status(&[("wpa_state", "COMPLETED"), ("ssid", "Home")]);

        assert_eq!(
            Backend::record_from_status("wlan0", &completed, true),
            InterfaceRecord::new("wlan0", ConnectionState::Connected, Some("Home".into()))
        );
        // No address yet
        assert_eq!(
            Backend::record_from_status("wlan0", &completed, false),
            InterfaceRecord::new("wlan0", ConnectionState::Connecting, Some("Home".into()))
        );
        assert_eq!(
            Backend::record_from_status("wlan0", &status(&[("wpa_state", "INACTIVE")]), false),
            InterfaceRecord::disconnected("wlan0")
        );
    }

    #[test]
    fn test_network_from_scan() {
        let network = Backend::network_from_scan(&scan_result("[WPA2-PSK-CCMP][ESS]", "2437"));
        assert_eq!(
            network,
            WifiNetwork {
                ssid: "Home Net".into(),
                mac: "aa:bb:cc:dd:ee:ff".into(),
                channel: 6,
                signal_level: -52,
                security: "[WPA2-PSK-CCMP][ESS]".into(),
            }
        );

        let open = Backend::network_from_scan(&scan_result("[ESS]", "5180"));
        assert_eq!(open.channel, 36);
        assert_eq!(open.security, "open");

        let wpa3 = Backend::network_from_scan(&scan_result("[RSN-SAE-CCMP][ESS]", "5745"));
        assert_eq!(wpa3.channel, 149);
        assert_eq!(wpa3.security, "[RSN-SAE-CCMP][ESS]");

        assert_eq!(
            Backend::network_from_scan(&scan_result("[ESS]", "garbage")).channel,
            0
        );
    }

    #[test]
    fn test_select_outcome() {
        let ap = AccessPoint::new("Home", Some("secret".into()));

        assert_eq!(Backend::select_outcome(SelectResult::Success, &ap), Ok(true));
        assert_eq!(
            Backend::select_outcome(SelectResult::AlreadyConnected, &ap),
            Ok(true)
        );
        assert_eq!(Backend::select_outcome(SelectResult::Timeout, &ap), Ok(false));
        assert_eq!(
            Backend::select_outcome(SelectResult::WrongPsk, &ap),
            Err(WifiError::AuthenticationFailed("Home".into()))
        );
        assert_eq!(
            Backend::select_outcome(SelectResult::NotFound, &ap),
            Err(WifiError::NetworkNotFound("Home".into()))
        );
        assert!(matches!(
            Backend::select_outcome(SelectResult::InvalidNetworkId, &ap),
            Err(WifiError::WpaSupplicantError(_))
        ));
    }

    #[test]
    fn test_parse_ipv4_present() {
        let output = "3: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP\n    \
                      inet 192.168.1.23/24 brd 192.168.1.255 scope global dynamic wlan0\n";
        assert!(Backend::parse_ipv4_present(output));
        assert!(!Backend::parse_ipv4_present(
            "3: wlan0: <NO-CARRIER,BROADCAST,MULTICAST,UP> mtu 1500 state DOWN\n"
        ));
        assert!(!Backend::parse_ipv4_present(""));
    }

    #[tokio::test]
    async fn test_has_ipv4_address_uses_runner() {
        let runner = ScriptedRunner::new();
        runner
            .expect(
                "ip -4 addr show wlan0",
                CommandOutput::success("    inet 10.0.0.5/24 scope global wlan0\n"),
            )
            .await;
        runner
            .expect("ip -4 addr show wlan0", CommandOutput::failure(1, "Device does not exist"))
            .await;

        let backend = Backend::with_runner("wlan0".into(), runner.clone())
            .await
            .unwrap();
        assert!(backend.has_ipv4_address().await);
        assert!(!backend.has_ipv4_address().await);
        assert_eq!(runner.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_foreign_adapter() {
        let backend = Backend::with_runner("wlan0".into(), ScriptedRunner::new())
            .await
            .unwrap();

        assert_eq!(
            backend.scan(Some("wlan1")).await.unwrap_err(),
            WifiError::AdapterNotFound("wlan1".into())
        );
        assert_eq!(
            backend
                .connect(&AccessPoint::open("Home"), "wlan1", Duration::from_secs(1))
                .await
                .unwrap_err(),
            WifiError::AdapterNotFound("wlan1".into())
        );
        assert_eq!(
            backend.reset("wlan1").await.unwrap_err(),
            WifiError::AdapterNotFound("wlan1".into())
        );
    }
}
