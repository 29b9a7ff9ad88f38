//! qcnetd - QingCloud vxnet network plugin for Docker.
//!
//! Serves the Docker remote network driver protocol on a unix socket and
//! backs every endpoint with a QingCloud NIC.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use qcnet_cloud::QingCloudClient;
use qcnet_network::{EndpointLifecycle, NetlinkRegistry};

mod api;
mod args;
mod instance;
mod socket;

use args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.default_log_level())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cloud_config = args.cloud_config()?;
    let zone = cloud_config.zone.clone();
    let cloud = QingCloudClient::new(cloud_config)?;

    let instance_id = match args.instance_id.as_deref() {
        Some(id) => instance::validate(id)?,
        None => instance::discover(&[
            Path::new(instance::INSTANCE_ID_FILE),
            Path::new(instance::HOSTNAME_FILE),
        ])?,
    };

    let links = NetlinkRegistry::new()?;
    let lifecycle = EndpointLifecycle::new(
        args.driver_config(&instance_id),
        Arc::new(cloud),
        Arc::new(links),
    );
    lifecycle.load()?;
    let lifecycle = Arc::new(lifecycle);

    let listener = socket::bind(&args.socket)?;
    tracing::info!(
        socket = %args.socket.display(),
        %instance_id,
        %zone,
        version = env!("CARGO_PKG_VERSION"),
        "qcnetd started"
    );

    let served = axum::serve(listener, api::server::app(Arc::clone(&lifecycle)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    lifecycle.wait_for_detaches().await;
    socket::remove(&args.socket);
    served?;

    tracing::info!("qcnetd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
