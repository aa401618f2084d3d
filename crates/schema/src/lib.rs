//! Spark operator schema: CRD types, their definitions, and idempotent installation.

#![forbid(unsafe_code)]

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub mod crd;
pub mod install;

pub use crd::{
    ApplicationStateType, ScheduledSparkApplication, ScheduledSparkApplicationSpec, SparkApplication, SparkApplicationSpec,
    SparkApplicationStatus,
};
pub use install::{install_or_update, InstallError, Installed, KubeSchemaRegistry, RegistryError, SchemaRegistry};

/// Definitions of every custom resource the operator manages, in install order.
pub fn descriptors() -> Vec<CustomResourceDefinition> {
    vec![SparkApplication::crd(), ScheduledSparkApplication::crd()]
}

/// Render all definitions as a multi-document YAML stream.
pub fn descriptors_yaml() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in descriptors() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}
