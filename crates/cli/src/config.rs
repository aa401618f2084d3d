//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use sparkop_controllers::WebhookOptions;
use sparkop_kubehub::NamespaceScope;

#[derive(Parser, Debug)]
#[command(name = "spark-operator", version, about = "Kubernetes operator for Apache Spark applications")]
pub struct Cli {
    /// API server address; overrides the kubeconfig or in-cluster endpoint
    #[arg(long, env = "SPARKOP_MASTER")]
    master: Option<String>,

    /// Path to a kubeconfig; in-cluster identity is used when absent
    #[arg(long, env = "SPARKOP_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Require the kube-dns add-on before starting
    #[arg(long = "check-dns", env = "SPARKOP_CHECK_DNS", action = ArgAction::SetTrue)]
    check_dns: bool,

    /// Create or update the custom resource definitions at startup
    #[arg(
        long = "install-crds",
        env = "SPARKOP_INSTALL_CRDS",
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    install_crds: bool,

    /// Workers for the SparkApplication controller
    #[arg(long = "controller-threads", env = "SPARKOP_CONTROLLER_THREADS", default_value_t = 10)]
    controller_threads: usize,

    /// Workers for the ScheduledSparkApplication controller
    #[arg(long = "scheduled-controller-threads", env = "SPARKOP_SCHEDULED_CONTROLLER_THREADS", default_value_t = 10)]
    scheduled_controller_threads: usize,

    /// Cache resync period in seconds
    #[arg(long = "resync-interval", env = "SPARKOP_RESYNC_INTERVAL", default_value_t = 30)]
    resync_interval: u64,

    /// Namespace to watch; empty, "*" or "all" watch every namespace
    #[arg(long, env = "SPARKOP_NAMESPACE", default_value = "")]
    namespace: String,

    /// Register the pod-mutating admission webhook
    #[arg(long = "enable-webhook", env = "SPARKOP_ENABLE_WEBHOOK", action = ArgAction::SetTrue)]
    enable_webhook: bool,

    #[arg(long = "webhook-config-name", env = "SPARKOP_WEBHOOK_CONFIG_NAME", default_value = "spark-webhook-config")]
    webhook_config_name: String,

    /// Directory holding ca-cert.pem
    #[arg(long = "webhook-cert-dir", env = "SPARKOP_WEBHOOK_CERT_DIR", default_value = "/etc/webhook-certs")]
    webhook_cert_dir: PathBuf,

    #[arg(long = "webhook-svc-namespace", env = "SPARKOP_WEBHOOK_SVC_NAMESPACE", default_value = "spark-operator")]
    webhook_svc_namespace: String,

    #[arg(long = "webhook-svc-name", env = "SPARKOP_WEBHOOK_SVC_NAME", default_value = "spark-webhook")]
    webhook_svc_name: String,

    #[arg(long = "webhook-port", env = "SPARKOP_WEBHOOK_PORT", default_value_t = 8080)]
    webhook_port: u32,

    /// Print the custom resource definitions as YAML and exit
    #[arg(long = "print-crds", action = ArgAction::SetTrue)]
    pub print_crds: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--{flag} must be at least 1")]
    NoWorkers { flag: &'static str },
    #[error("--resync-interval must be at least 1 second")]
    ResyncTooShort,
    #[error("--webhook-port {0} is outside 1..=65535")]
    PortOutOfRange(u32),
}

/// Validated process configuration, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub master: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub namespace: NamespaceScope,
    pub check_dns: bool,
    pub install_crds: bool,
    pub controller_threads: usize,
    pub scheduled_controller_threads: usize,
    pub resync: Duration,
    /// `None` when the webhook is disabled.
    pub webhook: Option<WebhookOptions>,
}

impl Cli {
    pub fn into_config(self) -> Result<OperatorConfig, ConfigError> {
        if self.controller_threads == 0 {
            return Err(ConfigError::NoWorkers { flag: "controller-threads" });
        }
        if self.scheduled_controller_threads == 0 {
            return Err(ConfigError::NoWorkers { flag: "scheduled-controller-threads" });
        }
        if self.resync_interval == 0 {
            return Err(ConfigError::ResyncTooShort);
        }
        let webhook = if self.enable_webhook {
            let port = u16::try_from(self.webhook_port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or(ConfigError::PortOutOfRange(self.webhook_port))?;
            Some(WebhookOptions {
                config_name: self.webhook_config_name,
                cert_dir: self.webhook_cert_dir,
                service_namespace: self.webhook_svc_namespace,
                service_name: self.webhook_svc_name,
                port,
            })
        } else {
            None
        };
        Ok(OperatorConfig {
            master: self.master.filter(|m| !m.trim().is_empty()),
            kubeconfig: self.kubeconfig,
            namespace: NamespaceScope::parse(&self.namespace),
            check_dns: self.check_dns,
            install_crds: self.install_crds,
            controller_threads: self.controller_threads,
            scheduled_controller_threads: self.scheduled_controller_threads,
            resync: Duration::from_secs(self.resync_interval),
            webhook,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<OperatorConfig, ConfigError> {
        let argv = std::iter::once("spark-operator").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn defaults() {
        let cfg = parse(&[]).unwrap();
        assert_eq!(cfg.master, None);
        assert_eq!(cfg.kubeconfig, None);
        assert_eq!(cfg.namespace, NamespaceScope::All);
        assert!(!cfg.check_dns);
        assert!(cfg.install_crds);
        assert_eq!(cfg.controller_threads, 10);
        assert_eq!(cfg.scheduled_controller_threads, 10);
        assert_eq!(cfg.resync, Duration::from_secs(30));
        assert_eq!(cfg.webhook, None);
    }

    #[test]
    fn webhook_options_carry_through() {
        let cfg = parse(&["--enable-webhook", "--webhook-port", "9443", "--webhook-cert-dir", "/certs"]).unwrap();
        let hook = cfg.webhook.unwrap();
        assert_eq!(hook.port, 9443);
        assert_eq!(hook.cert_dir, PathBuf::from("/certs"));
        assert_eq!(hook.config_name, "spark-webhook-config");
        assert_eq!(hook.service_namespace, "spark-operator");
        assert_eq!(hook.service_name, "spark-webhook");
    }

    #[test]
    fn install_crds_can_be_disabled() {
        assert!(!parse(&["--install-crds", "false"]).unwrap().install_crds);
        assert!(!parse(&["--install-crds=false"]).unwrap().install_crds);
        assert!(parse(&["--install-crds"]).unwrap().install_crds);
    }

    #[test]
    fn namespace_scope() {
        assert_eq!(parse(&["--namespace", "etl"]).unwrap().namespace, NamespaceScope::Named("etl".into()));
        assert_eq!(parse(&["--namespace", "*"]).unwrap().namespace, NamespaceScope::All);
    }

    #[test]
    fn blank_master_is_ignored() {
        assert_eq!(parse(&["--master", " "]).unwrap().master, None);
        assert_eq!(parse(&["--master", "https://10.0.0.1:6443"]).unwrap().master.as_deref(), Some("https://10.0.0.1:6443"));
    }

    #[test]
    fn rejects_invalid_values() {
        assert_eq!(parse(&["--controller-threads", "0"]).unwrap_err(), ConfigError::NoWorkers { flag: "controller-threads" });
        assert_eq!(
            parse(&["--scheduled-controller-threads", "0"]).unwrap_err(),
            ConfigError::NoWorkers { flag: "scheduled-controller-threads" }
        );
        assert_eq!(parse(&["--resync-interval", "0"]).unwrap_err(), ConfigError::ResyncTooShort);
        assert_eq!(parse(&["--enable-webhook", "--webhook-port", "0"]).unwrap_err(), ConfigError::PortOutOfRange(0));
        assert_eq!(parse(&["--enable-webhook", "--webhook-port", "70000"]).unwrap_err(), ConfigError::PortOutOfRange(70000));
    }

    #[test]
    fn port_is_not_checked_when_webhook_disabled() {
        assert!(parse(&["--webhook-port", "0"]).unwrap().webhook.is_none());
    }

    #[test]
    fn print_crds_flag() {
        assert!(Cli::try_parse_from(["spark-operator", "--print-crds"]).unwrap().print_crds);
    }
}
