//! Spark operator kubehub – cluster client, pre-flight checks and the shared watch factory

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::info;

pub mod factory;
pub mod preflight;

pub use factory::{Feed, Ticks, WatchFactory};
pub use preflight::{check_cluster_dns, PreflightError};

/// Namespace scope of everything the operator watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl NamespaceScope {
    /// `""`, `"*"` and `"all"` select every namespace.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "*" | "all" => NamespaceScope::All,
            ns => NamespaceScope::Named(ns.to_string()),
        }
    }

    pub fn as_option(&self) -> Option<&str> {
        match self {
            NamespaceScope::All => None,
            NamespaceScope::Named(ns) => Some(ns.as_str()),
        }
    }

    /// Namespaced `Api` for `K` within this scope.
    pub fn api<K>(&self, client: Client) -> kube::Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match self {
            NamespaceScope::All => kube::Api::all(client),
            NamespaceScope::Named(ns) => kube::Api::namespaced(client, ns),
        }
    }
}

impl std::fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceScope::All => f.write_str("*"),
            NamespaceScope::Named(ns) => f.write_str(ns),
        }
    }
}

/// Build a cluster client.
///
/// An explicit kubeconfig wins; otherwise the in-cluster service account is used.
/// `master` overrides the API server address in either case.
pub async fn build_client(master: Option<&str>, kubeconfig: Option<&std::path::Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .context("loading kubeconfig")?
        }
        None => Config::incluster().context("loading in-cluster config")?,
    };
    if let Some(url) = master.filter(|m| !m.is_empty()) {
        config.cluster_url = url.parse().with_context(|| format!("parsing master url {url}"))?;
    }
    info!(server = %config.cluster_url, kubeconfig = ?kubeconfig, "cluster client configured");
    Client::try_from(config).context("creating cluster client")
}
