//! Read-only controller configuration
//!
//! Built once at process start from the command line (with environment
//! fallbacks) and shared with every reconciliation pass through an `Arc`.

use std::time::Duration;

/// Default namespace where the shared ingress gateway and its TLS material live
pub const DEFAULT_GATEWAY_NAMESPACE: &str = "istio-gateways";

/// Default cert-manager issuer for ingress certificates
pub const DEFAULT_CLUSTER_ISSUER: &str = "cluster-issuer";

/// Feature flags and settings consulted by generators and the sync engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding certificates consumed by the ingress gateway
    pub gateway_namespace: String,
    /// cert-manager ClusterIssuer used for ingress certificates
    pub cluster_issuer: String,
    /// Inject default topology spread constraints into pod templates
    pub topology_spread: bool,
    /// Image pull secret added to every generated pod spec
    pub image_pull_secret: Option<String>,
    /// Requeue interval after a successful pass
    pub requeue_after: Duration,
    /// Log writes instead of applying them
    pub dry_run: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gateway_namespace: DEFAULT_GATEWAY_NAMESPACE.to_string(),
            cluster_issuer: DEFAULT_CLUSTER_ISSUER.to_string(),
            topology_spread: true,
            image_pull_secret: None,
            requeue_after: Duration::from_secs(300),
            dry_run: false,
        }
    }
}

impl ControllerConfig {
    /// Reject settings that would make every pass fail
    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway_namespace.trim().is_empty() {
            return Err(crate::Error::ConfigError(
                "gateway namespace must not be empty".to_string(),
            ));
        }
        if self.cluster_issuer.trim().is_empty() {
            return Err(crate::Error::ConfigError(
                "cluster issuer must not be empty".to_string(),
            ));
        }
        if self.requeue_after.is_zero() {
            return Err(crate::Error::ConfigError(
                "requeue interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
