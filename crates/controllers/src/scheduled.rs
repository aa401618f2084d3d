//! ScheduledSparkApplication controller.
//!
//! Runs are the SparkApplications controlled by a scheduled application; they
//! are looked up in the shared application cache rather than listed per reconcile.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    runtime::{controller::Action, reflector::Store, watcher, Controller},
    ResourceExt,
};
use metrics::counter;
use sparkop_core::{owner::is_controlled_by, ShutdownObserver};
use sparkop_kubehub::{Feed, NamespaceScope, Ticks};
use sparkop_lifecycle::Subsystem;
use sparkop_schema::{ApplicationStateType, ScheduledSparkApplication, SparkApplication};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    application::observed_state, controller_config, drain, join_worker, take_inputs, wait_for_cache, ControllerError,
};

const NAME: &str = "scheduled-application-controller";

pub struct ScheduledApplicationController {
    scope: NamespaceScope,
    scheduled: Store<ScheduledSparkApplication>,
    apps: Store<SparkApplication>,
    feed: Option<Feed<ScheduledSparkApplication>>,
    ticks: Option<Ticks>,
    worker: Option<JoinHandle<()>>,
}

impl ScheduledApplicationController {
    pub fn new(
        scope: NamespaceScope,
        scheduled: Store<ScheduledSparkApplication>,
        feed: Feed<ScheduledSparkApplication>,
        apps: Store<SparkApplication>,
        ticks: Ticks,
    ) -> Self {
        Self { scope, scheduled, apps, feed: Some(feed), ticks: Some(ticks), worker: None }
    }
}

struct Context {
    apps: Store<SparkApplication>,
}

/// Run counts for one scheduled application.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub active: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Tally the runs in `apps` controlled by `owner_uid` within `namespace`.
pub fn summarize_runs<'a, I>(namespace: &str, owner_uid: &str, apps: I) -> RunSummary
where
    I: IntoIterator<Item = &'a SparkApplication>,
{
    let mut summary = RunSummary::default();
    for app in apps {
        if app.namespace().as_deref() != Some(namespace) || !is_controlled_by(&app.metadata, owner_uid) {
            continue;
        }
        match observed_state(app) {
            ApplicationStateType::Completed => summary.succeeded += 1,
            ApplicationStateType::Failed | ApplicationStateType::FailedSubmission => summary.failed += 1,
            _ => summary.active += 1,
        }
    }
    summary
}

async fn reconcile(sched: Arc<ScheduledSparkApplication>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let namespace = sched.namespace().ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let uid = sched.uid().ok_or(ControllerError::MissingObjectKey("uid"))?;
    counter!("reconcile_total", 1u64, "controller" => NAME);

    if sched.spec.suspend.unwrap_or(false) {
        debug!(app = %sched.name_any(), namespace = %namespace, "schedule suspended");
    }
    let cached = ctx.apps.state();
    let runs = summarize_runs(&namespace, &uid, cached.iter().map(|a| a.as_ref()));
    info!(
        app = %sched.name_any(),
        namespace = %namespace,
        schedule = %sched.spec.schedule,
        policy = ?sched.spec.concurrency_policy,
        active = runs.active,
        succeeded = runs.succeeded,
        failed = runs.failed,
        "observed ScheduledSparkApplication"
    );
    Ok(Action::await_change())
}

fn error_policy(sched: Arc<ScheduledSparkApplication>, err: &ControllerError, _ctx: Arc<Context>) -> Action {
    warn!(app = %sched.name_any(), error = %err, "reconcile failed; requeueing");
    Action::requeue(Duration::from_secs(30))
}

#[async_trait::async_trait]
impl Subsystem for ScheduledApplicationController {
    fn name(&self) -> &str { NAME }

    async fn start(&mut self, concurrency: usize, shutdown: &ShutdownObserver) -> anyhow::Result<()> {
        wait_for_cache(NAME, &self.scheduled, shutdown).await?;
        wait_for_cache(NAME, &self.apps, shutdown).await?;
        let (feed, ticks) = take_inputs(NAME, &mut self.feed, &mut self.ticks)?;
        let ctx = Arc::new(Context { apps: self.apps.clone() });
        let results = Controller::for_stream(feed.map(Ok::<_, watcher::Error>), self.scheduled.clone())
            .with_config(controller_config(concurrency))
            .reconcile_all_on(ticks)
            .graceful_shutdown_on(shutdown.closed_owned())
            .run(reconcile, error_policy, ctx);
        self.worker = Some(tokio::spawn(drain(NAME, results)));
        info!(controller = NAME, concurrency, namespace = %self.scope, "controller started");
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        join_worker(NAME, self.worker.take()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use sparkop_schema::SparkApplicationStatus;

    fn run(name: &str, namespace: &str, owner_uid: Option<&str>, state: ApplicationStateType) -> SparkApplication {
        let mut app: SparkApplication = serde_json::from_value(serde_json::json!({
            "apiVersion": "sparkoperator.k8s.io/v1alpha1",
            "kind": "SparkApplication",
            "metadata": { "name": name, "namespace": namespace },
            "spec": { "type": "Python", "driver": {}, "executor": {} }
        }))
        .unwrap();
        app.metadata.owner_references = owner_uid.map(|uid| {
            vec![OwnerReference {
                api_version: "sparkoperator.k8s.io/v1alpha1".into(),
                kind: "ScheduledSparkApplication".into(),
                name: "nightly".into(),
                uid: uid.into(),
                controller: Some(true),
                block_owner_deletion: None,
            }]
        });
        let mut status = SparkApplicationStatus::default();
        status.application_state.state = state;
        app.status = Some(status);
        app
    }

    #[test]
    fn counts_only_controlled_runs_in_namespace() {
        let apps = vec![
            run("nightly-1", "etl", Some("u-1"), ApplicationStateType::Completed),
            run("nightly-2", "etl", Some("u-1"), ApplicationStateType::Failed),
            run("nightly-3", "etl", Some("u-1"), ApplicationStateType::Running),
            run("nightly-4", "etl", Some("u-1"), ApplicationStateType::New),
            run("other", "etl", Some("u-2"), ApplicationStateType::Completed),
            run("adhoc", "etl", None, ApplicationStateType::Running),
            run("elsewhere", "ml", Some("u-1"), ApplicationStateType::Completed),
        ];
        let summary = summarize_runs("etl", "u-1", &apps);
        assert_eq!(summary, RunSummary { active: 2, succeeded: 1, failed: 1 });
    }

    #[test]
    fn failed_submission_counts_as_failed() {
        let apps = [run("nightly-1", "etl", Some("u-1"), ApplicationStateType::FailedSubmission)];
        assert_eq!(summarize_runs("etl", "u-1", &apps).failed, 1);
    }

    #[test]
    fn no_runs_is_empty_summary() {
        assert_eq!(summarize_runs("etl", "u-1", &[]), RunSummary::default());
    }
}
