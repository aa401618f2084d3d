//! Spark operator subsystems.
//!
//! Each subsystem implements [`sparkop_lifecycle::Subsystem`]: `start` spawns its
//! workers and returns, workers unwind when the shutdown observer closes, and
//! `stop` waits for them.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use kube::runtime::{
    controller::{self, Action},
    reflector::{ObjectRef, Store},
};
use sparkop_core::ShutdownObserver;
use sparkop_kubehub::{Feed, Ticks};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod application;
pub mod scheduled;
pub mod webhook;

pub use application::ApplicationController;
pub use scheduled::ScheduledApplicationController;
pub use webhook::{WebhookOptions, WebhookSubsystem};

/// Upper bound on how long `start` waits for the shared caches to fill.
pub const CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("object is missing metadata.{0}")]
    MissingObjectKey(&'static str),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Block until `store` has completed its initial list, the deadline passes, or shutdown begins.
pub(crate) async fn wait_for_cache<K>(name: &str, store: &Store<K>, shutdown: &ShutdownObserver) -> anyhow::Result<()>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Eq + std::hash::Hash + Clone,
{
    debug!(controller = %name, "waiting for caches to sync");
    tokio::select! {
        res = tokio::time::timeout(CACHE_SYNC_TIMEOUT, store.wait_until_ready()) => match res {
            Ok(Ok(())) => {
                info!(controller = %name, cached = store.state().len(), "caches synced");
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow!("{name}: cache writer dropped: {e}")),
            Err(_) => Err(anyhow!("{name}: timed out after {:?} waiting for caches to sync", CACHE_SYNC_TIMEOUT)),
        },
        _ = shutdown.closed() => Err(anyhow!("{name}: shutdown requested before caches synced")),
    }
}

/// Controller tuning shared by both controllers.
pub(crate) fn controller_config(concurrency: usize) -> controller::Config {
    let workers = concurrency.clamp(1, u16::MAX as usize) as u16;
    controller::Config::default().concurrency(workers)
}

/// Drain a controller's result stream, logging each outcome.
pub(crate) async fn drain<K, S, E>(name: &'static str, results: S)
where
    K: kube::Resource,
    S: futures::Stream<Item = Result<(ObjectRef<K>, Action), controller::Error<E, kube::runtime::watcher::Error>>>,
    E: std::error::Error + 'static,
{
    results
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => {
                    debug!(controller = name, object = %obj.name, namespace = ?obj.namespace, ?action, "reconciled")
                }
                Err(e) => warn!(controller = name, error = %e, "reconcile failed"),
            }
        })
        .await;
    info!(controller = name, "controller stopped");
}

/// Hand over the trigger inputs of a controller; they can be consumed once.
pub(crate) fn take_inputs<K>(name: &str, feed: &mut Option<Feed<K>>, ticks: &mut Option<Ticks>) -> anyhow::Result<(Feed<K>, Ticks)> {
    match (feed.take(), ticks.take()) {
        (Some(feed), Some(ticks)) => Ok((feed, ticks)),
        _ => Err(anyhow!("{name}: already started")),
    }
}

/// Wait for a spawned worker to finish.
pub(crate) async fn join_worker(name: &str, worker: Option<JoinHandle<()>>) -> anyhow::Result<()> {
    match worker {
        Some(handle) => handle.await.map_err(|e| anyhow!("{name}: worker task failed: {e}")),
        None => Ok(()),
    }
}
