//! auto-natpmp daemon
//!
//! Keeps a NAT-PMP port forward alive and writes the public port to a file.

use anyhow::Context;
use auto_natpmp::daemon::{run, shutdown_signal};
use auto_natpmp::natpmp::ProtocolSet;
use auto_natpmp::settings::Settings;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// NAT-PMP port forwarding service with port tracking
#[derive(Parser, Debug)]
#[command(name = "auto-natpmp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON settings file; command line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File to store the current public port [default: /var/run/auto-natpmp/port]
    #[arg(long)]
    port_file: Option<PathBuf>,

    /// Gateway IP address or hostname [default: 10.2.0.1]
    #[arg(short, long)]
    gateway_ip: Option<String>,

    /// Requested port forwarding lifetime in seconds [default: 60]
    #[arg(long)]
    lifetime: Option<u32>,

    /// Fraction of the granted lifetime after which to renew [default: 0.5]
    #[arg(long)]
    renew_fraction: Option<f64>,

    /// First retry delay in seconds [default: 5]
    #[arg(long)]
    retry_base: Option<u64>,

    /// Maximum retry delay in seconds [default: 60]
    #[arg(long)]
    retry_max: Option<u64>,

    /// Log file location (logs always go to stderr too)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Logging level: trace, debug, info, warn(ing), error, critical [default: info]
    #[arg(long)]
    log_level: Option<String>,

    /// Local port to forward [default: 0]
    #[arg(long)]
    local_port: Option<u16>,

    /// External port to request, 0 for any [default: 1]
    #[arg(long)]
    external_port: Option<u16>,

    /// Protocols to map: udp, tcp or both [default: udp]
    #[arg(long)]
    protocol: Option<ProtocolSet>,

    /// Protocol helper program [default: natpmpc]
    #[arg(long)]
    helper: Option<String>,

    /// Helper timeout in seconds [default: 10]
    #[arg(long)]
    helper_timeout: Option<u64>,
}

impl Cli {
    /// Defaults, then the settings file, then command line flags
    fn into_settings(self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(v) = self.port_file {
            settings.port_file = v;
        }
        if let Some(v) = self.gateway_ip {
            settings.gateway = v;
        }
        if let Some(v) = self.lifetime {
            settings.lifetime_secs = v;
        }
        if let Some(v) = self.renew_fraction {
            settings.renew_fraction = v;
        }
        if let Some(v) = self.retry_base {
            settings.retry_base_secs = v;
        }
        if let Some(v) = self.retry_max {
            settings.retry_max_secs = v;
        }
        if let Some(v) = self.log_file {
            settings.log_file = Some(v);
        }
        if let Some(v) = self.log_level {
            settings.log_level = v;
        }
        if let Some(v) = self.local_port {
            settings.local_port = v;
        }
        if let Some(v) = self.external_port {
            settings.external_port = v;
        }
        if let Some(v) = self.protocol {
            settings.protocol = v;
        }
        if let Some(v) = self.helper {
            settings.helper = v;
        }
        if let Some(v) = self.helper_timeout {
            settings.helper_timeout_secs = v;
        }

        settings.validate().context("invalid configuration")?;
        Ok(settings)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let settings = match Cli::parse().into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("auto-natpmp: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let setup = settings
        .log_level_filter()
        .and_then(|level| auto_natpmp::logging::init(level, settings.log_file.as_deref()));
    if let Err(e) = setup {
        eprintln!("auto-natpmp: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!("Starting auto-natpmp service");

    match run(&settings, shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
