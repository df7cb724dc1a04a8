use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Result;
use forward_core::{
    proxy::Forwarder,
    server::Server,
    supervisor::supervise,
    trace::{ConsoleTrace, Trace},
};
use tracing::{error, info};

use crate::config::Config;

/// Binds one listener per target on all interfaces.
///
/// Fails on the first listener that cannot be bound; listeners bound so far
/// are dropped, so nothing is left serving.
pub async fn bind(config: &Config, trace: Arc<dyn Trace>) -> Result<Vec<Server>> {
    let mut servers = Vec::with_capacity(2);

    for target in config.targets() {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, target.listen_port));
        let forwarder = Forwarder::new(target.upstream.clone());

        let server = Server::new(target.name, addr, forwarder, trace.clone()).await?;
        info!(
            "{} proxy bound to {}, forwarding to {}",
            target.name,
            server.local_addr()?,
            target.upstream
        );
        servers.push(server);
    }

    Ok(servers)
}

/// Binds both proxy instances, then serves until a termination signal or
/// until either listener stops.
pub async fn run(config: Config) -> Result<()> {
    let servers = bind(&config, Arc::new(ConsoleTrace)).await?;
    supervise(servers, shutdown_signal()).await
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
