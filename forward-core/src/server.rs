use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use hyper_util::{
    rt::{TokioExecutor, TokioIo as HyperSocket},
    server::conn::auto::Builder,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, error, info};

use crate::{capture::Capture, proxy::Forwarder, trace::Trace};

/// Delay before accepting again after a failed accept (e.g. out of file
/// descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Sleeps for `delay` unless the stop sender goes away first.
///
/// Returns `true` when the sender is gone. A flag change wakes it early too,
/// leaving the flag for the caller to check.
async fn backoff(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err(),
    }
}

/// One proxy instance: a listener whose every request is forwarded to a
/// single upstream.
///
/// Each accepted connection is served on its own task by a [`Capture`]
/// decorated [`Forwarder`] bound to the connection's peer address.
pub struct Server {
    name: Arc<str>,
    /// The TCP listener for accepting incoming connections
    connection: TcpListener,
    forwarder: Forwarder,
    trace: Arc<dyn Trace>,
}

impl Server {
    /// Creates a new server instance bound to the specified address.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs and traces, e.g. `portal`
    /// * `addr` - The network address to bind to
    /// * `forwarder` - Forwarder for the upstream of this instance
    /// * `trace` - Sink for the per-request trace
    ///
    /// # Returns
    ///
    /// Returns a `Result<Server>` containing the new server instance, or an
    /// error naming the instance and address if binding fails.
    pub async fn new(
        name: &str,
        addr: SocketAddr,
        forwarder: Forwarder,
        trace: Arc<dyn Trace>,
    ) -> Result<Self> {
        let connection = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {} listener on {}", name, addr))?;

        Ok(Self {
            name: Arc::from(name),
            connection,
            forwarder,
            trace,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.connection.local_addr()?)
    }

    /// Accepts a new connection and spawns a task to handle it.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` when a connection is accepted and handed off,
    /// or an error if accepting fails.
    pub async fn accept(&self) -> Result<()> {
        let (conn, address) = self.connection.accept().await?;

        let service = Capture::new(
            self.forwarder.for_peer(address),
            self.name.clone(),
            self.trace.clone(),
        );
        let io = HyperSocket::new(conn);
        let name = self.name.clone();

        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!("Error serving {} connection from {}: {:?}", name, address, e);
            }
        });
        Ok(())
    }

    /// Accepts connections until `shutdown` flips to `true` or its sender
    /// goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Listening on {} for incoming {} requests to {}...",
            self.local_addr()?,
            self.name,
            self.forwarder.upstream()
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let accepted = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                accepted = self.accept() => accepted,
            };

            match accepted {
                Ok(()) => debug!("Accepted new {} connection", self.name),
                Err(e) => {
                    error!("Failed to accept {} connection: {}", self.name, e);
                    if backoff(&mut shutdown, ACCEPT_ERROR_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        info!("Stopped {} listener", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{trace::ConsoleTrace, upstream::Upstream};
    use std::{net::Ipv4Addr, time::Instant};

    async fn bind(name: &str, port: u16) -> Result<Server> {
        let forwarder = Forwarder::new(Upstream::parse("http://127.0.0.1:1").unwrap());
        Server::new(
            name,
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            forwarder,
            Arc::new(ConsoleTrace),
        )
        .await
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = bind("portal", 0).await.unwrap();
        assert_eq!(server.name(), "portal");
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_names_listener() {
        let first = bind("portal", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let err = match bind("backend", port).await {
            Ok(_) => panic!("second bind on port {} succeeded", port),
            Err(e) => e,
        };
        let message = err.to_string();
        assert!(message.contains("backend"), "{}", message);
        assert!(message.contains(&port.to_string()), "{}", message);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = bind("backend", 0).await.unwrap();
        let (stop, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(server.run(stop_rx));
        stop.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let server = bind("backend", 0).await.unwrap();
        let (stop, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(server.run(stop_rx));
        drop(stop);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_backoff_waits_out_delay() {
        let (_stop, mut stop_rx) = watch::channel(false);

        let started = Instant::now();
        assert!(!backoff(&mut stop_rx, Duration::from_millis(50)).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_backoff_cut_short_by_stop() {
        let (stop, mut stop_rx) = watch::channel(false);
        stop.send(true).unwrap();

        let woke = tokio::time::timeout(
            Duration::from_secs(5),
            backoff(&mut stop_rx, Duration::from_secs(60)),
        )
        .await
        .expect("backoff ignored the stop flag");
        assert!(!woke);
        assert!(*stop_rx.borrow_and_update());

        drop(stop);
        let gone = tokio::time::timeout(
            Duration::from_secs(5),
            backoff(&mut stop_rx, Duration::from_secs(60)),
        )
        .await
        .expect("backoff ignored the dropped sender");
        assert!(gone);
    }
}
