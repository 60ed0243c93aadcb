//! WiFi Control - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wifi_control::{
    AccessPoint, WifiControl,
    backend::{AirportBackend, NetshBackend, NmcliBackend, WifiBackend, WifiCtrlBackend},
    config::{BackendKind, CliArgs, CliCommand, Settings},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize tracing
    let default_filter = if args.debug {
        "debug"
    } else {
        "info,wifi_control=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let command = args.command.clone();
    let json = args.json;
    let settings = Settings::from(args);
    let backend_kind = settings.resolved_backend();
    info!(?settings, ?backend_kind, "Starting WiFi control");

    // Dropping the command future kills any spawned tool via kill_on_drop
    let result = tokio::select! {
        result = dispatch(backend_kind, settings, command, json) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, aborting");
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

async fn dispatch(
    backend_kind: BackendKind,
    settings: Settings,
    command: CliCommand,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let verbose = settings.debug;
    match backend_kind {
        BackendKind::Nmcli => run(settings, NmcliBackend::new(verbose), command, json).await,
        BackendKind::Airport => run(settings, AirportBackend::new(verbose), command, json).await,
        BackendKind::Netsh => run(settings, NetshBackend::new(verbose), command, json).await,
        BackendKind::WpaSupplicant | BackendKind::Auto => {
            let interface = settings
                .interface
                .clone()
                .unwrap_or_else(|| "wlan0".to_string());
            let backend = WifiCtrlBackend::new(interface, verbose).await?;
            run(settings, backend, command, json).await
        }
    }
}

async fn run<B: WifiBackend>(
    settings: Settings,
    backend: B,
    command: CliCommand,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let control = WifiControl::init(settings, Arc::new(backend)).await?;

    let adapter_or_default = |adapter: Option<String>| {
        adapter
            .or_else(|| control.default_interface().map(str::to_string))
            .ok_or("No wireless interface found; pass --adapter")
    };

    match command {
        CliCommand::Interfaces => {
            let interfaces = control.list_interfaces().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&interfaces)?);
            } else {
                for iface in &interfaces {
                    println!(
                        "{:<16} {:<13} {}",
                        iface.adapter_name,
                        iface.state,
                        iface.ssid.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        CliCommand::Scan => {
            let networks = control.scan().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&networks)?);
            } else {
                for network in &networks {
                    println!(
                        "{:<32} {:<17} {:>4} dBm  ch {:<3} {}",
                        network.ssid,
                        network.mac,
                        network.signal_level,
                        network.channel,
                        network.security
                    );
                }
            }
        }
        CliCommand::Connect {
            ssid,
            password,
            adapter,
        } => {
            let adapter = adapter_or_default(adapter)?;
            let ap = AccessPoint::new(ssid, password);
            let record = control.connect(&ap, &adapter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{} connected to {}", record.adapter_name, ap.ssid);
            }
        }
        CliCommand::Reset { adapter } => {
            let adapter = adapter_or_default(adapter)?;
            control.reset(&adapter).await?;
            if json {
                println!("{}", serde_json::json!({ "adapter": adapter, "reset": true }));
            } else {
                println!("{} reset", adapter);
            }
        }
    }

    Ok(())
}
