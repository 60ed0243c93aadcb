//! Runtime settings

use std::time::Duration;

use crate::config::{BackendKind, CliArgs};

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub connection_timeout: Duration,
    pub interface: Option<String>,
    pub backend: BackendKind,
}

impl Settings {
    /// Backend to use, with `Auto` resolved for the running OS
    pub fn resolved_backend(&self) -> BackendKind {
        match self.backend {
            BackendKind::Auto if cfg!(target_os = "macos") => BackendKind::Airport,
            BackendKind::Auto if cfg!(target_os = "windows") => BackendKind::Netsh,
            BackendKind::Auto => BackendKind::Nmcli,
            other => other,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug: false,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            interface: None,
            backend: BackendKind::Auto,
        }
    }
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        // A zero timeout could never succeed
        let connection_timeout = match args.connection_timeout {
            0 => DEFAULT_CONNECTION_TIMEOUT,
            ms => Duration::from_millis(ms),
        };

        Settings {
            debug: args.debug,
            connection_timeout,
            interface: args.interface,
            backend: args.backend,
        }
    }
}
