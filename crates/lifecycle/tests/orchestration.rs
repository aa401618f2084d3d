#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::error::ErrorResponse;
use sparkop_core::ShutdownObserver;
use sparkop_lifecycle::{Lifecycle, LifecycleError, Subsystem};
use sparkop_schema::{descriptors, RegistryError, SchemaRegistry};

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> { log.lock().unwrap().clone() }

struct Recorder {
    name: String,
    log: Log,
    fail_start: bool,
    fail_stop: bool,
    observer: Option<ShutdownObserver>,
}

impl Recorder {
    fn boxed(name: &str, log: &Log) -> Box<Self> {
        Box::new(Self { name: name.into(), log: log.clone(), fail_start: false, fail_stop: false, observer: None })
    }
}

#[async_trait::async_trait]
impl Subsystem for Recorder {
    fn name(&self) -> &str { &self.name }

    async fn start(&mut self, concurrency: usize, shutdown: &ShutdownObserver) -> anyhow::Result<()> {
        if self.fail_start {
            self.log.lock().unwrap().push(format!("start-failed:{}", self.name));
            anyhow::bail!("{} refused to start", self.name);
        }
        self.observer = Some(shutdown.clone());
        self.log.lock().unwrap().push(format!("start:{}:{}", self.name, concurrency));
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        let closed = self.observer.as_ref().map(|o| o.is_closed()).unwrap_or(false);
        self.log.lock().unwrap().push(format!("stop:{}:closed={}", self.name, closed));
        if self.fail_stop {
            anyhow::bail!("{} stop failed", self.name);
        }
        Ok(())
    }
}

/// Registry that records creates into the shared log.
struct Registry {
    log: Log,
    existing: Mutex<HashSet<String>>,
    broken: bool,
}

impl Registry {
    fn new(log: &Log) -> Arc<Self> { Arc::new(Self { log: log.clone(), existing: Mutex::new(HashSet::new()), broken: false }) }
}

#[async_trait::async_trait]
impl SchemaRegistry for Registry {
    async fn create(&self, crd: &CustomResourceDefinition) -> Result<CustomResourceDefinition, RegistryError> {
        let name = crd.metadata.name.clone().unwrap_or_default();
        if self.broken {
            return Err(RegistryError::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "apiextensions unavailable".into(),
                reason: "ServiceUnavailable".into(),
                code: 503,
            })));
        }
        if !self.existing.lock().unwrap().insert(name.clone()) {
            return Err(RegistryError::AlreadyExists(name));
        }
        self.log.lock().unwrap().push(format!("install:{name}"));
        Ok(crd.clone())
    }

    async fn get(&self, _name: &str) -> Result<CustomResourceDefinition, RegistryError> {
        unreachable!("no pre-existing schemas in these tests")
    }

    async fn replace(&self, crd: &CustomResourceDefinition) -> Result<CustomResourceDefinition, RegistryError> {
        Ok(crd.clone())
    }
}

fn plan(log: &Log, webhook_enabled: bool) -> Lifecycle {
    let factory_log = log.clone();
    let mut lc = Lifecycle::new()
        .install_schemas(Registry::new(log), descriptors())
        .detached("watch-factory", move |_obs| factory_log.lock().unwrap().push("factory".into()))
        .enlist(Recorder::boxed("application-controller", log), 10)
        .enlist(Recorder::boxed("scheduled-application-controller", log), 4);
    if webhook_enabled {
        lc = lc.enlist(Recorder::boxed("webhook", log), 1);
    }
    lc
}

#[tokio::test]
async fn full_cycle_starts_in_order_and_stops_in_reverse() {
    let log: Log = Default::default();
    let lc = plan(&log, false);
    let observer = lc.observer();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let run = tokio::spawn(lc.run(async move {
        let _ = rx.await;
    }));
    tx.send(()).unwrap();
    run.await.unwrap().unwrap();

    assert!(observer.is_closed());
    assert_eq!(entries(&log), vec![
        "install:sparkapplications.sparkoperator.k8s.io",
        "install:scheduledsparkapplications.sparkoperator.k8s.io",
        "factory",
        "start:application-controller:10",
        "start:scheduled-application-controller:4",
        "stop:scheduled-application-controller:closed=true",
        "stop:application-controller:closed=true",
    ]);
}

#[tokio::test]
async fn webhook_slots_in_last_and_stops_first() {
    let log: Log = Default::default();
    plan(&log, true).run(async {}).await.unwrap();
    let got = entries(&log);
    let starts: Vec<_> = got.iter().filter(|e| e.starts_with("start:")).cloned().collect();
    let stops: Vec<_> = got.iter().filter(|e| e.starts_with("stop:")).cloned().collect();
    assert_eq!(starts, vec![
        "start:application-controller:10",
        "start:scheduled-application-controller:4",
        "start:webhook:1",
    ]);
    assert_eq!(stops, vec![
        "stop:webhook:closed=true",
        "stop:scheduled-application-controller:closed=true",
        "stop:application-controller:closed=true",
    ]);
}

#[tokio::test]
async fn disabled_webhook_is_never_touched() {
    let log: Log = Default::default();
    plan(&log, false).run(async {}).await.unwrap();
    let got = entries(&log);
    assert!(!got.iter().any(|e| e.contains("webhook")), "log={got:?}");
    assert_eq!(got.iter().filter(|e| e.starts_with("start:")).count(), 2);
    assert_eq!(got.iter().filter(|e| e.starts_with("stop:")).count(), 2);
}

#[tokio::test]
async fn repeated_shutdown_runs_once() {
    let log: Log = Default::default();
    let mut running = plan(&log, false).start().await.unwrap();
    assert_eq!(running.started(), vec!["application-controller", "scheduled-application-controller"]);

    running.shutdown().await;
    running.shutdown().await;
    assert_eq!(entries(&log).iter().filter(|e| e.starts_with("stop:")).count(), 2);
    assert!(running.started().is_empty());
}

#[tokio::test]
async fn start_failure_unwinds_started_subsystems() {
    let log: Log = Default::default();
    let mut bad = Recorder::boxed("webhook", &log);
    bad.fail_start = true;
    let lc = plan(&log, false).enlist(bad, 1);
    let observer = lc.observer();

    let err = lc.run(async { panic!("must not wait for termination after a failed start") }).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Start { ref name, .. } if name == "webhook"), "err={err:?}");
    assert!(observer.is_closed());

    let got = entries(&log);
    let tail: Vec<_> = got.iter().skip_while(|e| !e.starts_with("start-failed")).cloned().collect();
    assert_eq!(tail, vec![
        "start-failed:webhook",
        "stop:scheduled-application-controller:closed=true",
        "stop:application-controller:closed=true",
    ]);
}

#[tokio::test]
async fn stop_errors_do_not_block_remaining_stops() {
    let log: Log = Default::default();
    let mut flaky = Recorder::boxed("scheduled-application-controller", &log);
    flaky.fail_stop = true;
    let lc = Lifecycle::new()
        .enlist(Recorder::boxed("application-controller", &log), 2)
        .enlist(flaky, 2);

    lc.run(async {}).await.unwrap();
    let stops: Vec<_> = entries(&log).into_iter().filter(|e| e.starts_with("stop:")).collect();
    assert_eq!(stops, vec![
        "stop:scheduled-application-controller:closed=true",
        "stop:application-controller:closed=true",
    ]);
}

#[tokio::test]
async fn schema_failure_prevents_any_start() {
    let log: Log = Default::default();
    let registry = Arc::new(Registry { log: log.clone(), existing: Mutex::new(HashSet::new()), broken: true });
    let factory_log = log.clone();
    let err = Lifecycle::new()
        .install_schemas(registry, descriptors())
        .detached("watch-factory", move |_| factory_log.lock().unwrap().push("factory".into()))
        .enlist(Recorder::boxed("application-controller", &log), 1)
        .run(async {})
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Schema(_)), "err={err:?}");
    assert!(err.to_string().contains("sparkapplications.sparkoperator.k8s.io"));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn schemas_are_skipped_when_not_requested() {
    let log: Log = Default::default();
    Lifecycle::new()
        .enlist(Recorder::boxed("application-controller", &log), 1)
        .run(async {})
        .await
        .unwrap();
    assert!(!entries(&log).iter().any(|e| e.starts_with("install:")));
}
