//! Pre-flight checks for cluster add-ons the operator depends on.

use k8s_openapi::api::core::v1::Endpoints;
use kube::{Api, Client};
use tracing::{error, info};

pub const DNS_NAMESPACE: &str = "kube-system";
pub const DNS_SERVICE: &str = "kube-dns";

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("no endpoints for {service} found in namespace {namespace}")]
    NotFound { namespace: String, service: String },
    #[error("failed to get endpoints for {service} in namespace {namespace}: {source}")]
    Lookup {
        namespace: String,
        service: String,
        #[source]
        source: kube::Error,
    },
    #[error("no endpoints for {service} available in namespace {namespace}")]
    Empty { namespace: String, service: String },
}

/// Judge an endpoints lookup: the service must be registered with at least one subset.
pub fn evaluate_endpoints(
    namespace: &str,
    service: &str,
    lookup: Result<Option<Endpoints>, kube::Error>,
) -> Result<(), PreflightError> {
    let (namespace, service) = (namespace.to_string(), service.to_string());
    match lookup {
        Err(source) => Err(PreflightError::Lookup { namespace, service, source }),
        Ok(None) => Err(PreflightError::NotFound { namespace, service }),
        Ok(Some(ep)) if ep.subsets.as_deref().unwrap_or_default().is_empty() => {
            Err(PreflightError::Empty { namespace, service })
        }
        Ok(Some(_)) => Ok(()),
    }
}

/// Verify the cluster DNS add-on is up.
pub async fn check_cluster_dns(client: &Client) -> Result<(), PreflightError> {
    info!(service = DNS_SERVICE, namespace = DNS_NAMESPACE, "checking the kube-dns add-on");
    let api: Api<Endpoints> = Api::namespaced(client.clone(), DNS_NAMESPACE);
    let lookup = api.get_opt(DNS_SERVICE).await;
    evaluate_endpoints(DNS_NAMESPACE, DNS_SERVICE, lookup).map_err(|e| {
        error!(error = %e, "cluster add-on kube-dns is required to run Spark applications");
        e
    })
}
