//! Daemon runner
//!
//! Wires validated [`Settings`] into a [`LeaseManager`] and runs it until a
//! termination signal arrives.

use crate::clock::SystemClock;
use crate::lease::LeaseManager;
use crate::natpmp::NatpmpcClient;
use crate::publisher::PortFilePublisher;
use crate::settings::Settings;
use crate::Result;
use std::future::Future;
use tracing::{info, warn};

/// Run the daemon until `shutdown` completes
///
/// Configuration problems are returned before any gateway traffic happens.
/// After that the only way out is `shutdown`; gateway and filesystem errors
/// are retried.
pub async fn run<F>(settings: &Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    settings.validate()?;
    let endpoint = settings.gateway_endpoint()?;

    info!(
        "Configuration: Gateway={}, Lifetime={}s, Protocol={:?}, PortFile={}, Local Port={}, External Port={}",
        endpoint,
        settings.lifetime_secs,
        settings.protocol,
        settings.port_file.display(),
        settings.local_port,
        settings.external_port
    );

    let client = NatpmpcClient::new(
        endpoint,
        settings.helper.clone(),
        settings.helper_timeout(),
        SystemClock,
    )
    .with_leading_args(settings.helper_args.clone());
    let publisher = PortFilePublisher::new(&settings.port_file);

    let mut manager = LeaseManager::new(
        client,
        publisher,
        SystemClock,
        settings.lease_request(),
        settings.lease_policy(),
    );

    manager.run(shutdown).await;
    info!("auto-natpmp stopped");
    Ok(())
}

/// Completes when the process is asked to terminate
///
/// Listens for SIGTERM, SIGINT and SIGHUP on unix and Ctrl-C elsewhere.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut streams = Vec::new();
        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            match signal(kind) {
                Ok(stream) => streams.push((stream, name)),
                Err(e) => warn!("Cannot listen for {}: {}", name, e),
            }
        }

        if streams.is_empty() {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received signal to exit. Cleaning up...");
            return;
        }

        let name = std::future::poll_fn(|cx| {
            for (stream, name) in streams.iter_mut() {
                if stream.poll_recv(cx).is_ready() {
                    return std::task::Poll::Ready(*name);
                }
            }
            std::task::Poll::Pending
        })
        .await;

        info!("Received {}. Cleaning up...", name);
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received signal to exit. Cleaning up...");
    }
}
