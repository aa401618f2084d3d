//! Idempotent create-or-update of CustomResourceDefinitions.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, PostParams},
    Client,
};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, info};

/// Errors reported by a schema registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Minimal view of the cluster's CRD registry needed for installation.
#[async_trait::async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn create(&self, crd: &CustomResourceDefinition) -> Result<CustomResourceDefinition, RegistryError>;
    async fn get(&self, name: &str) -> Result<CustomResourceDefinition, RegistryError>;
    async fn replace(&self, crd: &CustomResourceDefinition) -> Result<CustomResourceDefinition, RegistryError>;
}

/// Registry backed by the apiextensions API.
#[derive(Clone)]
pub struct KubeSchemaRegistry {
    api: Api<CustomResourceDefinition>,
}

impl KubeSchemaRegistry {
    pub fn new(client: Client) -> Self { Self { api: Api::all(client) } }
}

fn is_already_exists(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}

#[async_trait::async_trait]
impl SchemaRegistry for KubeSchemaRegistry {
    async fn create(&self, crd: &CustomResourceDefinition) -> Result<CustomResourceDefinition, RegistryError> {
        match self.api.create(&PostParams::default(), crd).await {
            Ok(c) => Ok(c),
            Err(e) if is_already_exists(&e) => Err(RegistryError::AlreadyExists(crd_name(crd).to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, name: &str) -> Result<CustomResourceDefinition, RegistryError> {
        Ok(self.api.get(name).await?)
    }

    async fn replace(&self, crd: &CustomResourceDefinition) -> Result<CustomResourceDefinition, RegistryError> {
        Ok(self.api.replace(crd_name(crd), &PostParams::default(), crd).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("creating CustomResourceDefinition {name}: {source}")]
    Create { name: String, #[source] source: RegistryError },
    #[error("fetching existing CustomResourceDefinition {name}: {source}")]
    Fetch { name: String, #[source] source: RegistryError },
    #[error("updating CustomResourceDefinition {name}: {source}")]
    Update { name: String, #[source] source: RegistryError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installed {
    Created,
    Updated,
    Unchanged,
}

impl Installed {
    fn as_str(self) -> &'static str {
        match self {
            Installed::Created => "created",
            Installed::Updated => "updated",
            Installed::Unchanged => "unchanged",
        }
    }
}

pub fn crd_name(crd: &CustomResourceDefinition) -> &str {
    crd.metadata.name.as_deref().unwrap_or("")
}

/// Whether every field set in `desired` holds the same value in `existing`.
///
/// Fields absent from `desired` are ignored, so defaults the API server fills
/// in on the stored object never count as drift. Arrays compare element-wise
/// and must have the same length.
fn covers(existing: &Value, desired: &Value) -> bool {
    match (existing, desired) {
        (_, Value::Null) => true,
        (Value::Null, Value::Object(want)) => want.is_empty(),
        (Value::Object(have), Value::Object(want)) => {
            want.iter().all(|(k, w)| covers(have.get(k).unwrap_or(&Value::Null), w))
        }
        (Value::Array(have), Value::Array(want)) => {
            have.len() == want.len() && have.iter().zip(want).all(|(h, w)| covers(h, w))
        }
        (have, want) => have == want,
    }
}

fn as_json<T: serde::Serialize>(v: &T) -> Value { serde_json::to_value(v).unwrap_or(Value::Null) }

fn diverges(existing: &CustomResourceDefinition, desired: &CustomResourceDefinition) -> bool {
    !covers(&as_json(&existing.spec), &as_json(&desired.spec))
        || !covers(&as_json(&existing.metadata.labels), &as_json(&desired.metadata.labels))
        || !covers(&as_json(&existing.metadata.annotations), &as_json(&desired.metadata.annotations))
}

/// Create `desired`, or bring an existing definition in line with it.
///
/// Safe to run on every start and under concurrent installers: a losing racer
/// sees "already exists" and converges on the same end state.
pub async fn install_or_update(
    registry: &dyn SchemaRegistry,
    desired: &CustomResourceDefinition,
) -> Result<Installed, InstallError> {
    let name = crd_name(desired).to_string();
    let outcome = match registry.create(desired).await {
        Ok(_) => Installed::Created,
        Err(RegistryError::AlreadyExists(_)) => {
            let existing = registry
                .get(&name)
                .await
                .map_err(|source| InstallError::Fetch { name: name.clone(), source })?;
            if diverges(&existing, desired) {
                let mut next = desired.clone();
                next.metadata.resource_version = existing.metadata.resource_version.clone();
                registry
                    .replace(&next)
                    .await
                    .map_err(|source| InstallError::Update { name: name.clone(), source })?;
                Installed::Updated
            } else {
                debug!(crd = %name, "CustomResourceDefinition already up to date");
                Installed::Unchanged
            }
        }
        Err(source) => return Err(InstallError::Create { name, source }),
    };
    counter!("schema_install_total", 1u64, "outcome" => outcome.as_str());
    info!(crd = %name, outcome = outcome.as_str(), "CustomResourceDefinition installed");
    Ok(outcome)
}
