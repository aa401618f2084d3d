//! SparkApplication controller.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    runtime::{controller::Action, reflector::Store, watcher, Controller},
    ResourceExt,
};
use metrics::counter;
use sparkop_core::ShutdownObserver;
use sparkop_kubehub::{Feed, NamespaceScope, Ticks};
use sparkop_lifecycle::Subsystem;
use sparkop_schema::{ApplicationStateType, SparkApplication};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{controller_config, drain, join_worker, take_inputs, wait_for_cache, ControllerError};

const NAME: &str = "application-controller";

/// Reconciles SparkApplications from the shared cache and its feed.
pub struct ApplicationController {
    scope: NamespaceScope,
    apps: Store<SparkApplication>,
    feed: Option<Feed<SparkApplication>>,
    ticks: Option<Ticks>,
    worker: Option<JoinHandle<()>>,
}

impl ApplicationController {
    pub fn new(scope: NamespaceScope, apps: Store<SparkApplication>, feed: Feed<SparkApplication>, ticks: Ticks) -> Self {
        Self { scope, apps, feed: Some(feed), ticks: Some(ticks), worker: None }
    }
}

/// State recorded on the application, `New` when it has no status yet.
pub fn observed_state(app: &SparkApplication) -> ApplicationStateType {
    app.status.as_ref().map(|s| s.application_state.state).unwrap_or_default()
}

async fn reconcile(app: Arc<SparkApplication>, _ctx: Arc<()>) -> Result<Action, ControllerError> {
    let namespace = app.namespace().ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let state = observed_state(&app);
    counter!("reconcile_total", 1u64, "controller" => NAME);
    info!(
        app = %app.name_any(),
        namespace = %namespace,
        ?state,
        terminal = state.is_terminal(),
        "observed SparkApplication"
    );
    Ok(Action::await_change())
}

fn error_policy(app: Arc<SparkApplication>, err: &ControllerError, _ctx: Arc<()>) -> Action {
    warn!(app = %app.name_any(), error = %err, "reconcile failed; requeueing");
    Action::requeue(Duration::from_secs(30))
}

#[async_trait::async_trait]
impl Subsystem for ApplicationController {
    fn name(&self) -> &str { NAME }

    async fn start(&mut self, concurrency: usize, shutdown: &ShutdownObserver) -> anyhow::Result<()> {
        wait_for_cache(NAME, &self.apps, shutdown).await?;
        let (feed, ticks) = take_inputs(NAME, &mut self.feed, &mut self.ticks)?;
        let results = Controller::for_stream(feed.map(Ok::<_, watcher::Error>), self.apps.clone())
            .with_config(controller_config(concurrency))
            .reconcile_all_on(ticks)
            .graceful_shutdown_on(shutdown.closed_owned())
            .run(reconcile, error_policy, Arc::new(()));
        self.worker = Some(tokio::spawn(drain(NAME, results)));
        info!(controller = NAME, concurrency, namespace = %self.scope, "controller started");
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        join_worker(NAME, self.worker.take()).await
    }
}
