//! Command-line argument parsing

use clap::{Parser, Subcommand, ValueEnum};

/// Platform backend selection
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Pick the backend native to the running OS
    #[default]
    Auto,
    /// NetworkManager via nmcli (Linux)
    Nmcli,
    /// wpa_supplicant control socket (Linux)
    WpaSupplicant,
    /// airport and networksetup (macOS)
    Airport,
    /// netsh wlan (Windows)
    Netsh,
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "wifi-control", version, author)]
#[clap(about = "Enumerate, scan, connect and reset WiFi adapters")]
pub struct CliArgs {
    /// Enable verbose diagnostics (traces every command and its output)
    #[clap(short, long, global = true)]
    pub debug: bool,

    /// Milliseconds to wait for a connect attempt before failing
    #[clap(long, default_value = "5000", global = true)]
    pub connection_timeout: u64,

    /// Preferred wireless network interface
    #[clap(short, long, global = true)]
    pub interface: Option<String>,

    /// Backend driving the platform's WiFi tooling
    #[clap(long, value_enum, default_value_t = BackendKind::Auto, global = true)]
    pub backend: BackendKind,

    /// Print results as JSON
    #[clap(long, global = true)]
    pub json: bool,

    #[clap(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// List wireless interfaces and their state
    Interfaces,

    /// Scan for access points
    Scan,

    /// Connect an adapter to an access point
    Connect {
        /// Network SSID
        #[clap(long)]
        ssid: String,

        /// Network passphrase; omit for open networks
        #[clap(long)]
        password: Option<String>,

        /// Adapter to connect; defaults to the preferred interface
        #[clap(long)]
        adapter: Option<String>,
    },

    /// Reset an adapter
    Reset {
        /// Adapter to reset; defaults to the preferred interface
        #[clap(long)]
        adapter: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["wifi-control", "interfaces"]);
        assert!(!args.debug);
        assert_eq!(args.connection_timeout, 5000);
        assert_eq!(args.backend, BackendKind::Auto);
        assert_eq!(args.command, CliCommand::Interfaces);
    }

    #[test]
    fn test_connect_arguments() {
        let args = CliArgs::parse_from([
            "wifi-control",
            "connect",
            "--ssid",
            "Home",
            "--password",
            "secret",
            "--debug",
            "--connection-timeout",
            "2000",
            "--backend",
            "wpa-supplicant",
        ]);

        assert!(args.debug);
        assert_eq!(args.connection_timeout, 2000);
        assert_eq!(args.backend, BackendKind::WpaSupplicant);
        assert_eq!(
            args.command,
            CliCommand::Connect {
                ssid: "Home".into(),
                password: Some("secret".into()),
                adapter: None,
            }
        );
    }

    #[test]
    fn test_connect_requires_ssid() {
        assert!(CliArgs::try_parse_from(["wifi-control", "connect"]).is_err());
    }
}
