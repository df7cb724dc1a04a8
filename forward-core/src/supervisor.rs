//! Supervision of several proxy instances sharing one completion signal.
//!
//! Every server runs on its own task. The first of these events ends the
//! whole group: the `shutdown` future resolving (clean stop) or any server
//! task finishing on its own (failure). Either way the remaining servers
//! are told to stop through a shared `watch` flag and awaited.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use futures::{
    FutureExt as _,
    future::{BoxFuture, join_all, select_all},
};
use tokio::{sync::watch, task::JoinError};
use tracing::{error, info, warn};

use crate::server::Server;

type Supervised = BoxFuture<'static, (Arc<str>, Result<Result<()>, JoinError>)>;

fn flatten(result: Result<Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(e.into()),
    }
}

/// A named unit of work run under supervision.
pub type Task = (Arc<str>, BoxFuture<'static, Result<()>>);

/// Runs `servers` until `shutdown` resolves or one of them stops.
///
/// Returns `Ok(())` after a requested shutdown. Returns an error naming the
/// listener when one stopped without being asked to.
pub async fn supervise<F>(servers: Vec<Server>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (stop, stop_rx) = watch::channel(false);

    let tasks: Vec<Task> = servers
        .into_iter()
        .map(|server| {
            let name: Arc<str> = Arc::from(server.name());
            (name, server.run(stop_rx.clone()).boxed())
        })
        .collect();
    drop(stop_rx);

    supervise_tasks(tasks, stop, shutdown).await
}

/// Runs every task on its own tokio task until `shutdown` resolves or one
/// of them finishes. `stop` is flipped to `true` before the remaining tasks
/// are awaited.
pub async fn supervise_tasks<F>(
    tasks: Vec<Task>,
    stop: watch::Sender<bool>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    if tasks.is_empty() {
        bail!("no listeners to supervise");
    }

    let tasks: Vec<Supervised> = tasks
        .into_iter()
        .map(|(name, task)| {
            let handle = tokio::spawn(task);
            async move { (name, handle.await) }.boxed()
        })
        .collect();

    let mut running = select_all(tasks);

    let exited = tokio::select! {
        _ = shutdown => None,
        (exited, _, rest) = &mut running => Some((exited, rest)),
    };

    match exited {
        None => {
            info!("Termination requested, stopping all listeners");
            let _ = stop.send(true);

            for (name, result) in join_all(running.into_inner()).await {
                if let Err(e) = flatten(result) {
                    warn!("{} listener failed while stopping: {:#}", name, e);
                }
            }
            Ok(())
        }
        Some(((name, result), rest)) => {
            let cause = match flatten(result) {
                Ok(()) => anyhow!("{} listener exited", name),
                Err(e) => e.context(format!("{} listener failed", name)),
            };
            error!("{:#}, stopping remaining listeners", cause);
            let _ = stop.send(true);

            for (name, result) in join_all(rest).await {
                if let Err(e) = flatten(result) {
                    warn!("{} listener failed while stopping: {:#}", name, e);
                }
            }
            Err(cause)
        }
    }
}
