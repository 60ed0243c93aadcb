//! NetworkManager backend driven through `nmcli`

use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    backend::{
        WifiBackend,
        channel::{frequency_to_channel, parse_channel, parse_frequency, quality_to_dbm},
        command::{CommandOutput, CommandRunner, SystemRunner, args, display_command, run_checked},
    },
    core::{
        error::{WifiError, WifiResult},
        types::{AccessPoint, ConnectionState, InterfaceRecord, WifiNetwork},
    },
};

const NMCLI: &str = "nmcli";

/// NetworkManager backend (Linux)
pub struct NmcliBackend<R: CommandRunner = SystemRunner> {
    runner: R,
}

impl NmcliBackend<SystemRunner> {
    pub fn new(verbose: bool) -> Self {
        Self::with_runner(SystemRunner::new(verbose))
    }
}

impl<R: CommandRunner> NmcliBackend<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    /// Split a terse (`-t`) nmcli line on unescaped colons
    fn split_terse(line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut chars = line.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                ':' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        fields.push(current);

        fields
    }

    fn parse_device_state(state: &str) -> ConnectionState {
        // e.g. "connected", "connecting (getting IP configuration)", "unavailable"
        if state.starts_with("connected") {
            ConnectionState::Connected
        } else if state.starts_with("connecting") {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Parse `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device status`
    fn parse_device_status(output: &str) -> Vec<InterfaceRecord> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let fields = Self::split_terse(line);
                if fields.len() < 3 || fields[1] != "wifi" {
                    return None;
                }
                let connection = fields.get(3).filter(|c| !c.is_empty() && *c != "--");
                Some(InterfaceRecord::new(
                    fields[0].clone(),
                    Self::parse_device_state(&fields[2]),
                    connection.cloned(),
                ))
            })
            .collect()
    }

    /// Parse `nmcli -t -f ACTIVE,SSID device wifi list` for the active SSID
    fn parse_active_ssid(output: &str) -> Option<String> {
        output.lines().find_map(|line| {
            let fields = Self::split_terse(line);
            match fields.as_slice() {
                [active, ssid, ..] if active == "yes" && !ssid.is_empty() => Some(ssid.clone()),
                _ => None,
            }
        })
    }

    /// Parse `nmcli -t -f SSID,BSSID,CHAN,FREQ,SIGNAL,SECURITY device wifi list`
    fn parse_scan_results(output: &str) -> Vec<WifiNetwork> {
        let mut networks = Vec::new();

        for line in output.lines() {
            let fields = Self::split_terse(line);
            if fields.len() < 6 {
                continue;
            }

            let channel = match parse_channel(&fields[2]) {
                0 => parse_frequency(&fields[3])
                    .map(frequency_to_channel)
                    .unwrap_or(0),
                chan => chan,
            };
            let security = match fields[5].trim() {
                "" | "--" => "open".to_string(),
                s => s.to_string(),
            };

            networks.push(WifiNetwork {
                ssid: fields[0].clone(),
                mac: fields[1].to_lowercase(),
                channel,
                signal_level: quality_to_dbm(fields[4].trim().parse().unwrap_or(0)),
                security,
            });
        }

        networks
    }

    /// Map nmcli's failure text to a specific error
    fn classify_failure(output: &CommandOutput, ap: &AccessPoint, adapter: &str) -> WifiError {
        let message = output.message();
        let lower = message.to_lowercase();

        if lower.contains("secrets were required")
            || lower.contains("802-1x")
            || lower.contains("password")
        {
            WifiError::AuthenticationFailed(ap.ssid.clone())
        } else if lower.contains("no network with ssid") {
            WifiError::NetworkNotFound(ap.ssid.clone())
        } else if lower.contains("device") && lower.contains("not found") {
            WifiError::AdapterNotFound(adapter.to_string())
        } else {
            WifiError::ConnectionFailed(message.to_string())
        }
    }

    async fn active_ssid(&self, adapter: &str) -> Option<String> {
        let output = run_checked(
            &self.runner,
            NMCLI,
            &args([
                "-t", "-f", "ACTIVE,SSID", "device", "wifi", "list", "ifname", adapter, "--rescan",
                "no",
            ]),
        )
        .await
        .ok()?;
        Self::parse_active_ssid(&output.stdout)
    }
}

impl<R: CommandRunner> WifiBackend for NmcliBackend<R> {
    fn name(&self) -> &'static str {
        "networkmanager"
    }

    async fn interfaces(&self) -> WifiResult<Vec<InterfaceRecord>> {
        let output = run_checked(
            &self.runner,
            NMCLI,
            &args(["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device", "status"]),
        )
        .await?;

        let mut records = Self::parse_device_status(&output.stdout);
        for record in records
            .iter_mut()
            .filter(|r| r.state != ConnectionState::Disconnected)
        {
            // The connection column is the profile name; prefer the real SSID
            if let Some(ssid) = self.active_ssid(&record.adapter_name).await {
                record.ssid = Some(ssid);
            }
        }

        debug!("Found {} wifi devices", records.len());
        Ok(records)
    }

    async fn scan(&self, adapter: Option<&str>) -> WifiResult<Vec<WifiNetwork>> {
        debug!("Starting WiFi scan on interface: {:?}", adapter);

        let mut cmd = args([
            "-t",
            "-f",
            "SSID,BSSID,CHAN,FREQ,SIGNAL,SECURITY",
            "device",
            "wifi",
            "list",
            "--rescan",
            "yes",
        ]);
        if let Some(adapter) = adapter {
            cmd.extend(args(["ifname", adapter]));
        }

        let output = run_checked(&self.runner, NMCLI, &cmd)
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
        timeout: Duration,
    ) -> WifiResult<()> {
        debug!("Connecting {} to network: {}", adapter, ap.ssid);

        let wait_secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        let mut cmd = args(["-w".to_string(), wait_secs.to_string()]);
        cmd.extend(args(["device", "wifi", "connect", ap.ssid.as_str()]));
        let mut secrets = Vec::new();
        if let Some(password) = &ap.password {
            cmd.push("password".to_string());
            secrets.push(cmd.len());
            cmd.push(password.clone());
        }
        cmd.extend(args(["ifname", adapter]));

        let output = self.runner.run(NMCLI, &cmd, &secrets).await?;
        // nmcli reports some failures on stdout with exit 0
        if !output.is_success() || output.stdout.trim_start().starts_with("Error:") {
            warn!(
                "{} failed: {}",
                display_command(NMCLI, &cmd, &secrets),
                output.message()
            );
            return Err(Self::classify_failure(&output, ap, adapter));
        }

        debug!("Connection initiated");
        Ok(())
    }

    async fn reset(&self, adapter: &str) -> WifiResult<()> {
        debug!("Resetting WiFi on {}", adapter);

        if let Err(e) = run_checked(&self.runner, NMCLI, &args(["device", "disconnect", adapter])).await
        {
            // Fails when the device has no active connection
            debug!("Disconnect before reset failed: {}", e);
        }

        // Restart this device only
        for managed in ["no", "yes"] {
            run_checked(
                &self.runner,
                NMCLI,
                &args(["device", "set", adapter, "managed", managed]),
            )
            .await?;
        }

        debug!("Reset complete");
        Ok(())
    }
}
