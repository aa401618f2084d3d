//! Mutating admission webhook registration.
//!
//! Registers the operator's pod-mutating webhook with the API server on start
//! and removes the registration on stop. Serving admission requests is handled
//! outside this process.

use std::path::PathBuf;

use anyhow::Context as _;
use k8s_openapi::{
    api::admissionregistration::v1::{MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference, WebhookClientConfig},
    apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement},
    ByteString,
};
use kube::{
    api::{DeleteParams, ObjectMeta, Patch, PatchParams},
    Api, Client,
};
use sparkop_core::{labels::LAUNCHED_BY_OPERATOR_LABEL, ShutdownObserver};
use sparkop_kubehub::NamespaceScope;
use sparkop_lifecycle::Subsystem;
use tracing::{debug, info};

const NAME: &str = "webhook";
pub const FIELD_MANAGER: &str = "spark-operator";
pub const CA_CERT_FILE: &str = "ca-cert.pem";
pub const WEBHOOK_PATH: &str = "/webhook";
const WEBHOOK_NAME: &str = "webhook.sparkoperator.k8s.io";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOptions {
    pub config_name: String,
    pub cert_dir: PathBuf,
    pub service_namespace: String,
    pub service_name: String,
    pub port: u16,
}

/// Build the webhook registration for pods launched by the operator.
pub fn webhook_configuration(opts: &WebhookOptions, scope: &NamespaceScope, ca_bundle: Vec<u8>) -> MutatingWebhookConfiguration {
    let namespace_selector = scope.as_option().map(|ns| LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: NAMESPACE_NAME_LABEL.into(),
            operator: "In".into(),
            values: Some(vec![ns.to_string()]),
        }]),
        ..Default::default()
    });
    let object_selector = LabelSelector {
        match_labels: Some([(LAUNCHED_BY_OPERATOR_LABEL.to_string(), "true".to_string())].into()),
        ..Default::default()
    };

    MutatingWebhookConfiguration {
        metadata: ObjectMeta { name: Some(opts.config_name.clone()), ..Default::default() },
        webhooks: Some(vec![MutatingWebhook {
            name: WEBHOOK_NAME.into(),
            admission_review_versions: vec!["v1".into()],
            client_config: WebhookClientConfig {
                ca_bundle: Some(ByteString(ca_bundle)),
                service: Some(ServiceReference {
                    name: opts.service_name.clone(),
                    namespace: opts.service_namespace.clone(),
                    path: Some(WEBHOOK_PATH.into()),
                    port: Some(i32::from(opts.port)),
                }),
                url: None,
            },
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec![String::new()]),
                api_versions: Some(vec!["v1".into()]),
                operations: Some(vec!["CREATE".into()]),
                resources: Some(vec!["pods".into()]),
                scope: Some("Namespaced".into()),
            }]),
            failure_policy: Some("Ignore".into()),
            side_effects: "None".into(),
            namespace_selector,
            object_selector: Some(object_selector),
            ..Default::default()
        }]),
    }
}

pub struct WebhookSubsystem {
    client: Client,
    opts: WebhookOptions,
    scope: NamespaceScope,
    registered: bool,
}

impl WebhookSubsystem {
    pub fn new(client: Client, opts: WebhookOptions, scope: NamespaceScope) -> Self {
        Self { client, opts, scope, registered: false }
    }

    fn api(&self) -> Api<MutatingWebhookConfiguration> { Api::all(self.client.clone()) }
}

#[async_trait::async_trait]
impl Subsystem for WebhookSubsystem {
    fn name(&self) -> &str { NAME }

    async fn start(&mut self, _concurrency: usize, _shutdown: &ShutdownObserver) -> anyhow::Result<()> {
        let ca_path = self.opts.cert_dir.join(CA_CERT_FILE);
        let ca_bundle = tokio::fs::read(&ca_path)
            .await
            .with_context(|| format!("reading CA certificate {}", ca_path.display()))?;
        let config = webhook_configuration(&self.opts, &self.scope, ca_bundle);
        self.api()
            .patch(&self.opts.config_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&config))
            .await
            .with_context(|| format!("registering webhook configuration {}", self.opts.config_name))?;
        self.registered = true;
        info!(
            config = %self.opts.config_name,
            service = %format!("{}/{}", self.opts.service_namespace, self.opts.service_name),
            port = self.opts.port,
            namespace = %self.scope,
            "webhook registered"
        );
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if !std::mem::take(&mut self.registered) {
            return Ok(());
        }
        match self.api().delete(&self.opts.config_name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(config = %self.opts.config_name, "webhook deregistered");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(config = %self.opts.config_name, "webhook configuration already gone");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("deregistering webhook configuration {}", self.opts.config_name)),
        }
    }
}
