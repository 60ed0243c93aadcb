//! macOS backend driven through `airport` and `networksetup`

use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::{
    backend::{
        WifiBackend,
        channel::parse_channel,
        command::{CommandRunner, SystemRunner, args, run_checked},
    },
    core::{
        error::{WifiError, WifiResult},
        types::{AccessPoint, ConnectionState, InterfaceRecord, WifiNetwork},
    },
};

const AIRPORT: &str =
    "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport";
const NETWORKSETUP: &str = "networksetup";

/// macOS backend
pub struct AirportBackend<R: CommandRunner = SystemRunner> {
    runner: R,
}

impl AirportBackend<SystemRunner> {
    pub fn new(verbose: bool) -> Self {
        Self::with_runner(SystemRunner::new(verbose))
    }
}

impl<R: CommandRunner> AirportBackend<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    /// Devices of Wi-Fi hardware ports from `networksetup -listallhardwareports`
    fn parse_hardware_ports(output: &str) -> Vec<String> {
        let mut devices = Vec::new();
        let mut wifi_port = false;

        for line in output.lines().map(str::trim) {
            if let Some(port) = line.strip_prefix("Hardware Port:") {
                let port = port.trim();
                wifi_port = port == "Wi-Fi" || port == "AirPort";
            } else if let Some(device) = line.strip_prefix("Device:") {
                if wifi_port {
                    devices.push(device.trim().to_string());
                }
                wifi_port = false;
            }
        }

        devices
    }

    /// Parse `networksetup -getairportnetwork <device>`
    fn parse_airport_network(device: &str, output: &str) -> InterfaceRecord {
        let ssid = output
            .lines()
            .find_map(|line| line.trim().strip_prefix("Current Wi-Fi Network:"))
            .or_else(|| {
                output
                    .lines()
                    .find_map(|line| line.trim().strip_prefix("Current AirPort Network:"))
            })
            .map(|s| s.trim().to_string());

        match ssid {
            Some(ssid) if !ssid.is_empty() => {
                InterfaceRecord::new(device, ConnectionState::Connected, Some(ssid))
            }
            _ => InterfaceRecord::disconnected(device),
        }
    }

    fn is_mac_address(token: &str) -> bool {
        let parts: Vec<&str> = token.split(':').collect();
        parts.len() == 6
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.len() <= 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
    }

    /// Split `line` where the BSSID column starts
    ///
    /// `col` is the header's byte offset. Multi-byte SSIDs can push the BSSID
    /// past it, so the split lands before the first MAC-like token at or
    /// after `col`.
    fn split_at_column(line: &str, col: usize) -> Option<(&str, &str)> {
        let mut offset = (col..=line.len()).find(|&i| line.is_char_boundary(i))?;
        for token in line[offset..].split_whitespace() {
            let idx = offset + line[offset..].find(token)?;
            if Self::is_mac_address(token) {
                return Some(line.split_at(idx));
            }
            offset = idx + token.len();
        }
        None
    }

    /// Parse `airport -s`
    ///
    /// SSIDs are right-aligned in a column ending where the BSSID column
    /// starts and may contain spaces.
    fn parse_scan_results(output: &str) -> Vec<WifiNetwork> {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        let Some(header) = lines.next() else {
            return Vec::new();
        };
        let Some(bssid_col) = header.find("BSSID") else {
            return Vec::new();
        };

        let mut networks = Vec::new();
        for line in lines {
            let Some((ssid_part, rest)) = Self::split_at_column(line, bssid_col) else {
                continue;
            };

            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.len() < 3 || !Self::is_mac_address(tokens[0]) {
                continue;
            }
            let Ok(signal_level) = tokens[1].parse::<i16>() else {
                continue;
            };

            // BSSID RSSI CHANNEL HT CC SECURITY...
            let security = tokens
                .get(5..)
                .filter(|t| !t.is_empty())
                .map(|t| t.join(" "))
                .unwrap_or_else(|| "open".to_string());

            networks.push(WifiNetwork {
                ssid: ssid_part.trim().to_string(),
                mac: tokens[0].to_lowercase(),
                channel: parse_channel(tokens[2]),
                signal_level,
                security: if security == "NONE" {
                    "open".to_string()
                } else {
                    security
                },
            });
        }

        networks
    }

    /// networksetup exits 0 on join failures and reports them on stdout
    fn check_join_output(output: &str, ap: &AccessPoint, adapter: &str) -> WifiResult<()> {
        let text = output.trim();
        let lower = text.to_lowercase();

        if text.is_empty() {
            Ok(())
        } else if lower.contains("could not find network") {
            Err(WifiError::NetworkNotFound(ap.ssid.clone()))
        } else if lower.contains("is not a wi-fi interface")
            || lower.contains("is not an airport")
        {
            Err(WifiError::AdapterNotFound(adapter.to_string()))
        } else if lower.contains("-3924") || lower.contains("-3900") || lower.contains("password")
        {
            Err(WifiError::AuthenticationFailed(ap.ssid.clone()))
        } else if lower.contains("failed") || lower.contains("error") {
            Err(WifiError::ConnectionFailed(text.to_string()))
        } else {
            Ok(())
        }
    }

    async fn network_of(&self, device: String) -> WifiResult<InterfaceRecord> {
        let output = run_checked(
            &self.runner,
            NETWORKSETUP,
            &args(["-getairportnetwork", device.as_str()]),
        )
        .await?;
        Ok(Self::parse_airport_network(&device, &output.stdout))
    }

    async fn set_power(&self, adapter: &str, on: bool) -> WifiResult<()> {
        let state = if on { "on" } else { "off" };
        let output = run_checked(
            &self.runner,
            NETWORKSETUP,
            &args(["-setairportpower", adapter, state]),
        )
        .await?;
        if output.stdout.to_lowercase().contains("error") {
            return Err(WifiError::InterfaceError(output.stdout.trim().to_string()));
        }
        Ok(())
    }
}

impl<R: CommandRunner> WifiBackend for AirportBackend<R> {
    fn name(&self) -> &'static str {
        "airport"
    }

    async fn interfaces(&self) -> WifiResult<Vec<InterfaceRecord>> {
        let output = run_checked(&self.runner, NETWORKSETUP, &args(["-listallhardwareports"]))
            .await?;
        let devices = Self::parse_hardware_ports(&output.stdout);
        debug!("Found Wi-Fi devices: {:?}", devices);

        try_join_all(devices.into_iter().map(|device| self.network_of(device))).await
    }

    async fn scan(&self, adapter: Option<&str>) -> WifiResult<Vec<WifiNetwork>> {
        // airport always scans on the primary Wi-Fi device
        if let Some(adapter) = adapter {
            debug!("Starting WiFi scan (requested interface {})", adapter);
        }

        let output = run_checked(&self.runner, AIRPORT, &args(["-s"]))
            .await
            .map_err(|e| WifiError::ScanFailed(e.to_string()))?;

        let networks = Self::parse_scan_results(&output.stdout);
        debug!("Scan complete, found {} networks", networks.len());
        Ok(networks)
    }

    async fn connect(
        &self,
        ap: &AccessPoint,
        adapter: &str,
        _timeout: Duration,
    ) -> WifiResult<()> {
        debug!("Connecting {} to network: {}", adapter, ap.ssid);

        let mut cmd = args(["-setairportnetwork", adapter, ap.ssid.as_str()]);
        let mut secrets = Vec::new();
        if let Some(password) = &ap.password {
            secrets.push(cmd.len());
            cmd.push(password.clone());
        }

        let output = self.runner.run(NETWORKSETUP, &cmd, &secrets).await?;
        if !output.is_success() {
            warn!("networksetup exited with {:?}", output.status);
            return Err(WifiError::ConnectionFailed(output.message().to_string()));
        }
        Self::check_join_output(&output.stdout, ap, adapter)?;

        debug!("Connection initiated");
        Ok(())
    }

    async fn reset(&self, adapter: &str) -> WifiResult<()> {
        debug!("Power cycling {}", adapter);
        self.set_power(adapter, false).await?;
        self.set_power(adapter, true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::command::{CommandOutput, ScriptedRunner};
    use pretty_assertions::assert_eq;

    type Backend = AirportBackend<ScriptedRunner>;

    const HARDWARE_PORTS: &str = "\n\
Hardware Port: Ethernet\n\
Device: en1\n\
Ethernet Address: 00:11:22:33:44:55\n\
\n\
Hardware Port: Wi-Fi\n\
Device: en0\n\
Ethernet Address: 66:77:88:99:aa:bb\n\
\n\
Hardware Port: Thunderbolt Bridge\n\
Device: bridge0\n\
Ethernet Address: N/A\n\
\n\
VLAN Configurations\n\
===================\n";

    fn scan_line(ssid: &str, bssid: &str, rssi: &str, channel: &str, security: &str) -> String {
        format!(
            "{:>32} {:<17} {:<4} {:<7} {:<2} {:<2} {}\n",
            ssid, bssid, rssi, channel, "Y", "US", security
        )
    }

    fn scan_output(rows: &[(&str, &str, &str, &str, &str)]) -> String {
        let mut output = scan_line(
            "SSID",
            "BSSID",
            "RSSI",
            "CHANNEL",
            "SECURITY (auth/unicast/group)",
        );
        for (ssid, bssid, rssi, channel, security) in rows {
            output.push_str(&scan_line(ssid, bssid, rssi, channel, security));
        }
        output
    }

    #[test]
    fn test_parse_hardware_ports() {
        assert_eq!(Backend::parse_hardware_ports(HARDWARE_PORTS), vec!["en0"]);
    }

    #[test]
    fn test_parse_airport_network_connected() {
        let record = Backend::parse_airport_network("en0", "Current Wi-Fi Network: Home Net\n");
        assert_eq!(
            record,
            InterfaceRecord::new("en0", ConnectionState::Connected, Some("Home Net".into()))
        );
    }

    #[test]
    fn test_parse_airport_network_disconnected() {
        let record = Backend::parse_airport_network(
            "en0",
            "You are not associated with an AirPort network.\n",
        );
        assert_eq!(record, InterfaceRecord::disconnected("en0"));
    }

    #[test]
    fn test_parse_scan_results() {
        let output = scan_output(&[
            ("Home Net", "00:11:22:33:44:55", "-45", "6", "WPA2(PSK/AES/AES)"),
            ("Cafe", "66:77:88:99:AA:BB", "-80", "36,+1", "NONE"),
            (
                "Office 5GHz",
                "a0:b1:c2:d3:e4:f5",
                "-62",
                "149,80",
                "WPA(PSK/TKIP/TKIP) WPA2(PSK/AES/TKIP)",
            ),
        ]);
        let networks = Backend::parse_scan_results(&output);

        assert_eq!(networks.len(), 3);
        assert_eq!(
            networks[0],
            WifiNetwork {
                ssid: "Home Net".into(),
                mac: "00:11:22:33:44:55".into(),
                channel: 6,
                signal_level: -45,
                security: "WPA2(PSK/AES/AES)".into(),
            }
        );
        assert_eq!(networks[1].ssid, "Cafe");
        assert_eq!(networks[1].mac, "66:77:88:99:aa:bb");
        assert_eq!(networks[1].channel, 36);
        assert_eq!(networks[1].security, "open");
        assert_eq!(networks[2].ssid, "Office 5GHz");
        assert_eq!(networks[2].channel, 149);
        assert_eq!(
            networks[2].security,
            "WPA(PSK/TKIP/TKIP) WPA2(PSK/AES/TKIP)"
        );
    }

    #[test]
    fn test_parse_scan_results_multibyte_ssid() {
        // Padded by characters
        let mut output = scan_output(&[("Café", "00:11:22:33:44:55", "-50", "11", "NONE")]);
        // Padded by bytes
        let width = 32 - ("Café ☕".len() - "Café ☕".chars().count());
        output.push_str(&format!(
            "{:>width$} {:<17} {:<4} {:<7} {:<2} {:<2} {}\n",
            "Café ☕", "66:77:88:99:aa:bb", "-60", "1", "Y", "US", "WPA2(PSK/AES/AES)"
        ));

        let networks = Backend::parse_scan_results(&output);
        let summary: Vec<(&str, &str, u16)> = networks
            .iter()
            .map(|n| (n.ssid.as_str(), n.mac.as_str(), n.channel))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Café", "00:11:22:33:44:55", 11),
                ("Café ☕", "66:77:88:99:aa:bb", 1)
            ]
        );
    }

    #[test]
    fn test_parse_scan_results_skips_redacted_bssid() {
        // Recent macOS versions hide BSSIDs without location permission
        let output = scan_output(&[("Home", "", "-45", "6", "WPA2(PSK/AES/AES)")]);
        assert!(Backend::parse_scan_results(&output).is_empty());
    }

    #[test]
    fn test_parse_scan_results_empty() {
        assert!(Backend::parse_scan_results("").is_empty());
        assert!(Backend::parse_scan_results("No networks found\n").is_empty());
    }

    #[test]
    fn test_check_join_output() {
        let ap = AccessPoint::new("Home", Some("wrong".into()));
        assert!(Backend::check_join_output("", &ap, "en0").is_ok());
        assert_eq!(
            Backend::check_join_output("Could not find network Home.", &ap, "en0"),
            Err(WifiError::NetworkNotFound("Home".into()))
        );
        assert_eq!(
            Backend::check_join_output("Failed to join network Home.\nError: -3900", &ap, "en0"),
            Err(WifiError::AuthenticationFailed("Home".into()))
        );
        assert_eq!(
            Backend::check_join_output("en5 is not a Wi-Fi interface.", &ap, "en5"),
            Err(WifiError::AdapterNotFound("en5".into()))
        );
        assert!(matches!(
            Backend::check_join_output("Failed to join network Home.", &ap, "en0"),
            Err(WifiError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_interfaces_queries_each_device() {
        let runner = ScriptedRunner::new();
        runner
            .expect(
                "networksetup -listallhardwareports",
                CommandOutput::success(HARDWARE_PORTS),
            )
            .await;
        runner
            .expect(
                "networksetup -getairportnetwork en0",
                CommandOutput::success("Current Wi-Fi Network: Home Net\n"),
            )
            .await;

        let backend = AirportBackend::with_runner(runner);
        let records = backend.interfaces().await.unwrap();
        assert_eq!(
            records,
            vec![InterfaceRecord::new(
                "en0",
                ConnectionState::Connected,
                Some("Home Net".into())
            )]
        );
    }

    #[tokio::test]
    async fn test_connect_with_password() {
        let runner = ScriptedRunner::new();
        runner
            .expect(
                "networksetup -setairportnetwork en0 Home pw",
                CommandOutput::success(""),
            )
            .await;

        let backend = AirportBackend::with_runner(runner.clone());
        let ap = AccessPoint::new("Home", Some("pw".into()));
        backend
            .connect(&ap, "en0", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(
            runner.calls().await,
            vec!["networksetup -setairportnetwork en0 Home ***"]
        );
    }

    #[tokio::test]
    async fn test_reset_power_cycles() {
        let runner = ScriptedRunner::new();
        runner
            .expect("networksetup -setairportpower en0 off", CommandOutput::success(""))
            .await;
        runner
            .expect("networksetup -setairportpower en0 on", CommandOutput::success(""))
            .await;

        let backend = AirportBackend::with_runner(runner.clone());
        backend.reset("en0").await.unwrap();
        assert_eq!(runner.calls().await.len(), 2);
    }
}
