//! Spark operator lifecycle: schema installation, ordered subsystem startup and
//! coordinated shutdown around a single process-wide shutdown signal.

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use metrics::counter;
use sparkop_core::{ShutdownObserver, ShutdownSignal};
use sparkop_schema::{install_or_update, InstallError, SchemaRegistry};
use tracing::{debug, error, info, warn};

/// An independently startable and stoppable unit of long-running work.
///
/// `start` launches the subsystem's workers and returns once they are running;
/// workers must watch the observer and unwind when it closes. `stop` is called
/// only after the signal is closed.
#[async_trait::async_trait]
pub trait Subsystem: Send {
    fn name(&self) -> &str;
    async fn start(&mut self, concurrency: usize, shutdown: &ShutdownObserver) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Schema(#[from] InstallError),
    #[error("starting {name}: {source:#}")]
    Start {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

type Launch = Box<dyn FnOnce(ShutdownObserver) + Send>;

struct Enlisted {
    subsystem: Box<dyn Subsystem>,
    concurrency: usize,
}

/// Startup plan: schemas, detached background tasks, then subsystems in order.
pub struct Lifecycle {
    signal: ShutdownSignal,
    schemas: Option<(Arc<dyn SchemaRegistry>, Vec<CustomResourceDefinition>)>,
    detached: Vec<(String, Launch)>,
    enlisted: Vec<Enlisted>,
}

impl Default for Lifecycle {
    fn default() -> Self { Self::new() }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self { signal: ShutdownSignal::new(), schemas: None, detached: Vec::new(), enlisted: Vec::new() }
    }

    /// Install `descriptors` into `registry` before anything else starts.
    pub fn install_schemas(mut self, registry: Arc<dyn SchemaRegistry>, descriptors: Vec<CustomResourceDefinition>) -> Self {
        self.schemas = Some((registry, descriptors));
        self
    }

    /// Launch a fire-and-forget background task after schemas are installed.
    /// It has no error path; its failures surface through its dependents.
    pub fn detached<F>(mut self, name: impl Into<String>, launch: F) -> Self
    where
        F: FnOnce(ShutdownObserver) + Send + 'static,
    {
        self.detached.push((name.into(), Box::new(launch)));
        self
    }

    /// Append a subsystem to the start order.
    pub fn enlist(mut self, subsystem: Box<dyn Subsystem>, concurrency: usize) -> Self {
        self.enlisted.push(Enlisted { subsystem, concurrency });
        self
    }

    pub fn observer(&self) -> ShutdownObserver { self.signal.observer() }

    /// Run startup. On a subsystem start failure the already-started ones are
    /// stopped (reverse order) before the error is returned.
    pub async fn start(self) -> Result<Running, LifecycleError> {
        let Lifecycle { signal, schemas, detached, enlisted } = self;

        if let Some((registry, descriptors)) = schemas {
            for crd in &descriptors {
                install_or_update(registry.as_ref(), crd).await?;
            }
        }

        for (name, launch) in detached {
            debug!(task = %name, "launching background task");
            launch(signal.observer());
        }

        let observer = signal.observer();
        let mut running = Running { signal, started: Vec::with_capacity(enlisted.len()) };
        for Enlisted { mut subsystem, concurrency } in enlisted {
            let name = subsystem.name().to_string();
            info!(subsystem = %name, concurrency, "starting subsystem");
            match subsystem.start(concurrency, &observer).await {
                Ok(()) => {
                    counter!("subsystem_start_total", 1u64, "subsystem" => name.clone());
                    running.started.push(subsystem);
                }
                Err(source) => {
                    error!(subsystem = %name, error = %source, "subsystem failed to start");
                    running.shutdown().await;
                    return Err(LifecycleError::Start { name, source });
                }
            }
        }
        Ok(running)
    }

    /// Start everything, wait for `terminate`, then shut down.
    pub async fn run<F>(self, terminate: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        let mut running = self.start().await?;
        info!(subsystems = running.started.len(), "startup complete; waiting for termination");
        terminate.await;
        running.shutdown().await;
        Ok(())
    }
}

/// Started subsystems plus the signal that governs them.
pub struct Running {
    signal: ShutdownSignal,
    started: Vec<Box<dyn Subsystem>>,
}

impl Running {
    pub fn observer(&self) -> ShutdownObserver { self.signal.observer() }

    pub fn started(&self) -> Vec<String> { self.started.iter().map(|s| s.name().to_string()).collect() }

    /// Close the signal, then stop every started subsystem in reverse start order.
    /// Stop failures are logged and do not prevent the remaining stops.
    /// Only the first call has any effect.
    pub async fn shutdown(&mut self) {
        if !self.signal.close() {
            debug!("shutdown already performed");
            return;
        }
        info!("shutting down");
        while let Some(mut subsystem) = self.started.pop() {
            let name = subsystem.name().to_string();
            match subsystem.stop().await {
                Ok(()) => info!(subsystem = %name, "subsystem stopped"),
                Err(e) => {
                    counter!("subsystem_stop_errors_total", 1u64, "subsystem" => name.clone());
                    warn!(subsystem = %name, error = %e, "subsystem failed to stop cleanly");
                }
            }
        }
    }
}
