//! Windows backend driven through `netsh`

use std::{path::PathBuf, time::Duration};

use tokio::fs;
use tracing::{debug, warn};

use crate::{
    backend::{
        WifiBackend,
        channel::{parse_channel, quality_to_dbm},
        command::{CommandRunner, SystemRunner, args, run_checked},
    },
    core::{
        error::{WifiError, WifiResult},
        types::{AccessPoint, ConnectionState, InterfaceRecord, WifiNetwork},
    },
};

const NETSH: &str = "netsh";

/// Windows backend
pub struct NetshBackend<R: CommandRunner = SystemRunner> {
    runner: R,
    profile_dir: PathBuf,
}

impl NetshBackend<SystemRunner> {
    pub fn new(verbose: bool) -> Self {
        Self::with_runner(SystemRunner::new(verbose), std::env::temp_dir())
    }
}

/// Split a `Key : Value` line of netsh output
fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Escape text for inclusion in XML element content
fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl<R: CommandRunner> NetshBackend<R> {
    /// `profile_dir` receives temporary WLAN profile files during connect
    pub fn with_runner(runner: R, profile_dir: PathBuf) -> Self {
        Self {
            runner,
            profile_dir,
        }
    }

    fn parse_interface_state(state: &str) -> ConnectionState {
        match state.to_lowercase().as_str() {
            "connected" => ConnectionState::Connected,
            "associating" | "authenticating" | "discovering" => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Parse `netsh wlan show interfaces`
    fn parse_interfaces(output: &str) -> Vec<InterfaceRecord> {
        struct Block {
            name: String,
            state: ConnectionState,
            ssid: Option<String>,
        }

        let mut blocks: Vec<Block> = Vec::new();
        for line in output.lines() {
            let Some((key, value)) = key_value(line) else {
                continue;
            };
            match key {
                "Name" => blocks.push(Block {
                    name: value.to_string(),
                    state: ConnectionState::Disconnected,
                    ssid: None,
                }),
                "State" => {
                    if let Some(block) = blocks.last_mut() {
                        block.state = Self::parse_interface_state(value);
                    }
                }
                "SSID" => {
                    if let Some(block) = blocks.last_mut() {
                        block.ssid = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }

        blocks
            .into_iter()
            .map(|b| InterfaceRecord::new(b.name, b.state, b.ssid))
            .collect()
    }

    /// Parse `netsh wlan show networks mode=Bssid`, one entry per BSSID
    fn parse_scan_results(output: &str) -> Vec<WifiNetwork> {
        let mut networks = Vec::new();
        let mut ssid = String::new();
        let mut security = String::from("open");

        for line in output.lines() {
            let Some((key, value)) = key_value(line) else {
                continue;
            };

            if key.starts_with("SSID") {
                ssid = value.to_string();
                security = String::from("open");
            } else if key == "Authentication" {
                security = match value {
                    "Open" => "open".to_string(),
                    other => other.to_string(),
                };
            } else if key.starts_with("BSSID") {
                // The value itself contains colons
                let mac = line
                    .split_once(':')
                    .map(|(_, mac)| mac.trim().to_lowercase())
                    .unwrap_or_default();
                networks.push(WifiNetwork {
                    ssid: ssid.clone(),
                    mac,
                    channel: 0,
                    signal_level: -100,
                    security: security.clone(),
                });
            } else if key == "Signal" {
                if let Some(network) = networks.last_mut() {
                    let quality = value.trim_end_matches('%').trim().parse().unwrap_or(0);
                    network.signal_level = quality_to_dbm(quality);
                }
            } else if key == "Channel" {
                if let Some(network) = networks.last_mut() {
                    network.channel = parse_channel(value);
                }
            }
        }

        networks
    }

    /// WLAN profile XML for `netsh wlan add profile`
    fn profile_xml(ap: &AccessPoint) -> String {
        let name = xml_escape(&ap.ssid);
        let ssid_hex = hex::encode_upper(ap.ssid.as_bytes());
        let security = match &ap.password {
            Some(password) => format!(
                "<authEncryption><authentication>WPA2PSK</authentication><encryption>AES</encryption><useOneX>false</useOneX></authEncryption>\
                 <sharedKey><keyType>passPhrase</keyType><protected>false</protected><keyMaterial>{}</keyMaterial></sharedKey>",
                xml_escape(password)
            ),
            None => "<authEncryption><authentication>open</authentication><encryption>none</encryption><useOneX>false</useOneX></authEncryption>".to_string(),
        };

        format!(
            "<?xml version=\"1.0\"?>\
             <WLANProfile xmlns=\"http://www.microsoft.com/networking/WLAN/profile/v1\">\
             <name>{name}</name>\
             <SSIDConfig><SSID><hex>{ssid_hex}</hex><name>{name}</name></SSID></SSIDConfig>\
             <connectionType>ESS</connectionType>\
             <connectionMode>manual</connectionMode>\
             <MSM><security>{security}</security></MSM>\
             </WLANProfile>"
        )
    }

    fn classify_failure(message: &str, ap: &AccessPoint, adapter: &str) -> WifiError {
        let lower = message.to_lowercase();
        if lower.contains("there is no such wireless interface")
            || lower.contains("interface name is not valid")
        {
            WifiError::AdapterNotFound(adapter.to_string())
        } else if lower.contains("is not available") || lower.contains("not found") {
            WifiError::NetworkNotFound(ap.ssid.clone())
        } else {
            WifiError::ConnectionFailed(message.to_string())
        }
    }

    async fn add_profile(&self, ap: &AccessPoint, adapter: &str) -> WifiResult<()> {
        let path = self
            .profile_dir
            .join(format!("wifi-control-{}.xml", uuid::Uuid::new_v4()));
        fs::write(&path, Self::profile_xml(ap)).await?;

        let result = run_checked(
            &self.runner,
            NETSH,
            &args([
                "wlan".to_string(),
                "add".to_string(),
                "profile".to_string(),
                format!("filename={}", path.display()),
                format!("interface={}", adapter),
            ]),
        )
        .await;

        // The file holds the passphrase in clear text
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to remove profile file {}: {}", path.display(), e);
        }

        result
            .map(|_| ())
            .map_err(|e| Self::classify_failure(&e.to_string(), ap, adapter))
    }

    async fn set_admin_state(&self, adapter: &str, enabled: bool) -> WifiResult<()> {
        let state = if enabled { "enabled" } else { "disabled" };
        run_checked(
            &self.runner,
            NETSH,
            &args([
                "interface".to_string(),
                "set".to_string(),
                "interface".to_string(),
                format!("name={}", adapter),
                format!("admin={}", state),
            ]),
        )
        .await?;
        Ok(())
    }
}

impl<R: CommandRunner> WifiBackend for NetshBackend<R> {
    fn name(&self) -> &'static str {
        "netsh"
    }

    async fn interfaces(&self) -> WifiResult<Vec<InterfaceRecord>> {
        let output = run_checked(&self.runner, NETSH, &args(["wlan", "show", "interfaces"])).await?;
        let records = Self::parse_interfaces(&output.stdout);
        debug!("Found {} wireless interfaces", records.len());
        Ok(records)
    }

    async fn scan(&self, adapter: Option<&str>) -> WifiResult<Vec<WifiNetwork>> {
        debug!("Starting WiFi scan on interface: {:?}", adapter);

        let mut cmd = args(["wlan", "show", "networks", "mode=Bssid"]);
        if let Some(adapter) = adapter {
            cmd.push(format!("interface={}", adapter));
        }

        let output = run_checked(&self.runner, NETSH, &cmd)
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

        self.add_profile(ap, adapter).await?;

        run_checked(
            &self.runner,
            NETSH,
            &args([
                "wlan".to_string(),
                "connect".to_string(),
                format!("ssid={}", ap.ssid),
                format!("name={}", ap.ssid),
                format!("interface={}", adapter),
            ]),
        )
        .await
        .map_err(|e| Self::classify_failure(&e.to_string(), ap, adapter))?;

        debug!("Connection initiated");
        Ok(())
    }

    async fn reset(&self, adapter: &str) -> WifiResult<()> {
        debug!("Restarting interface {}", adapter);

        if let Err(e) = run_checked(
            &self.runner,
            NETSH,
            &args(["wlan".to_string(), "disconnect".to_string(), format!("interface={}", adapter)]),
        )
        .await
        {
            debug!("Disconnect before reset failed: {}", e);
        }

        self.set_admin_state(adapter, false).await?;
        self.set_admin_state(adapter, true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::command::{CommandOutput, ScriptedRunner};
    use pretty_assertions::assert_eq;

    type Backend = NetshBackend<ScriptedRunner>;

    const INTERFACES: &str = "\r\n\
There are 2 interfaces on the system: \r\n\
\r\n\
    Name                   : Wi-Fi\r\n\
    Description            : Intel(R) Wi-Fi 6 AX201 160MHz\r\n\
    GUID                   : 4b1f0b2c-3a55-4c4e-9d2a-0d6f1c2a9e11\r\n\
    Physical address       : 8c:c6:81:aa:bb:cc\r\n\
    State                  : connected\r\n\
    SSID                   : Home Net\r\n\
    BSSID                  : 00:11:22:33:44:55\r\n\
    Network type           : Infrastructure\r\n\
    Signal                 : 92%\r\n\
\r\n\
    Name                   : Wi-Fi 2\r\n\
    Description            : USB Wireless LAN\r\n\
    State                  : disconnected\r\n\
\r\n\
    Hosted network status  : Not available\r\n";

    const NETWORKS: &str = "\r\n\
Interface name : Wi-Fi \r\n\
There are 2 networks currently visible. \r\n\
\r\n\
SSID 1 : Home Net\r\n\
    Network type            : Infrastructure\r\n\
    Authentication          : WPA2-Personal\r\n\
    Encryption              : CCMP \r\n\
    BSSID 1                 : 00:11:22:33:44:55\r\n\
         Signal             : 90%  \r\n\
         Radio type         : 802.11ax\r\n\
         Channel            : 6 \r\n\
    BSSID 2                 : 00:11:22:33:44:56\r\n\
         Signal             : 40%  \r\n\
         Channel            : 36 \r\n\
\r\n\
SSID 2 : Cafe\r\n\
    Network type            : Infrastructure\r\n\
    Authentication          : Open\r\n\
    Encryption              : None\r\n\
    BSSID 1                 : AA:BB:CC:DD:EE:FF\r\n\
         Signal             : 70%  \r\n\
         Channel            : 11 \r\n";

    #[test]
    fn test_parse_interfaces() {
        let records = Backend::parse_interfaces(INTERFACES);
        assert_eq!(
            records,
            vec![
                InterfaceRecord::new("Wi-Fi", ConnectionState::Connected, Some("Home Net".into())),
                InterfaceRecord::disconnected("Wi-Fi 2"),
            ]
        );
    }

    #[test]
    fn test_parse_interface_states() {
        assert_eq!(
            Backend::parse_interface_state("authenticating"),
            ConnectionState::Connecting
        );
        assert_eq!(
            Backend::parse_interface_state("disconnecting"),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_parse_scan_results_one_entry_per_bssid() {
        let networks = Backend::parse_scan_results(NETWORKS);

        assert_eq!(
            networks,
            vec![
                WifiNetwork {
                    ssid: "Home Net".into(),
                    mac: "00:11:22:33:44:55".into(),
                    channel: 6,
                    signal_level: -55,
                    security: "WPA2-Personal".into(),
                },
                WifiNetwork {
                    ssid: "Home Net".into(),
                    mac: "00:11:22:33:44:56".into(),
                    channel: 36,
                    signal_level: -80,
                    security: "WPA2-Personal".into(),
                },
                WifiNetwork {
                    ssid: "Cafe".into(),
                    mac: "aa:bb:cc:dd:ee:ff".into(),
                    channel: 11,
                    signal_level: -65,
                    security: "open".into(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_scan_results_empty() {
        let output = "Interface name : Wi-Fi\r\nThere are 0 networks currently visible.\r\n";
        assert!(Backend::parse_scan_results(output).is_empty());
    }

    #[test]
    fn test_profile_xml_with_password() {
        let xml = Backend::profile_xml(&AccessPoint::new("R&D", Some("p<w>".into())));
        assert!(xml.contains("<name>R&amp;D</name>"));
        assert!(xml.contains("<hex>522644</hex>"));
        assert!(xml.contains("<authentication>WPA2PSK</authentication>"));
        assert!(xml.contains("<keyMaterial>p&lt;w&gt;</keyMaterial>"));
    }

    #[test]
    fn test_profile_xml_open() {
        let xml = Backend::profile_xml(&AccessPoint::open("Cafe"));
        assert!(xml.contains("<authentication>open</authentication>"));
        assert!(!xml.contains("sharedKey"));
    }

    #[tokio::test]
    async fn test_connect_adds_profile_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.expect("netsh wlan add profile", CommandOutput::success("added")).await;
        runner
            .expect(
                "netsh wlan connect ssid=Home name=Home interface=Wi-Fi",
                CommandOutput::success("Connection request was completed successfully."),
            )
            .await;

        let backend = NetshBackend::with_runner(runner.clone(), dir.path().to_path_buf());
        backend
            .connect(
                &AccessPoint::new("Home", Some("pw".into())),
                "Wi-Fi",
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let calls = runner.calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("interface=Wi-Fi"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_connect_unknown_interface() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner
            .expect(
                "netsh wlan add profile",
                CommandOutput::failure(1, "There is no such wireless interface on the system."),
            )
            .await;

        let backend = NetshBackend::with_runner(runner, dir.path().to_path_buf());
        let err = backend
            .connect(&AccessPoint::open("Home"), "Wi-Fi 9", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, WifiError::AdapterNotFound("Wi-Fi 9".into()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reset_toggles_admin_state() {
        let runner = ScriptedRunner::new();
        runner
            .expect("netsh wlan disconnect", CommandOutput::success(""))
            .await;
        runner
            .expect(
                "netsh interface set interface name=Wi-Fi admin=disabled",
                CommandOutput::success(""),
            )
            .await;
        runner
            .expect(
                "netsh interface set interface name=Wi-Fi admin=enabled",
                CommandOutput::success(""),
            )
            .await;

        let backend = NetshBackend::with_runner(runner.clone(), std::env::temp_dir());
        backend.reset("Wi-Fi").await.unwrap();
        assert_eq!(runner.calls().await.len(), 3);
    }
}
