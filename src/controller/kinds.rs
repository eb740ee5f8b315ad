//! Closed set of child resource kinds the operator produces
//!
//! Every kind carries a static table entry describing where its API lives,
//! how it is synchronized and where it sits in the apply order.

use std::fmt;

use kube::api::{ApiResource, DynamicObject};

use super::merge;

/// How an existing child is brought in line with its desired form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Replace the whole object, carrying server-assigned metadata forward
    Update,
    /// Apply a kind-specific merge and send a JSON merge patch when it differs
    Patch,
}

/// Kind-specific rule folding live fields into the desired object before a patch
///
/// The second argument is a scratch copy of the live object. Rules may strip
/// fields from it that must not take part in the comparison.
pub type MergeFn = fn(&mut DynamicObject, &mut DynamicObject);

/// Static description of a producible kind
#[derive(Debug)]
pub struct KindSpec {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub strategy: SyncStrategy,
    /// Always lives in the configured gateway namespace
    pub fixed_namespace: bool,
    /// Lower values are applied first
    pub priority: u8,
    pub merge: Option<MergeFn>,
}

impl KindSpec {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ServiceAccount,
    ConfigMap,
    NetworkPolicy,
    PeerAuthentication,
    ServiceEntry,
    Sidecar,
    Service,
    Certificate,
    Gateway,
    VirtualService,
    Deployment,
    Job,
    CronJob,
    HorizontalPodAutoscaler,
    PodDisruptionBudget,
    ServiceMonitor,
}

static SERVICE_ACCOUNT: KindSpec = KindSpec {
    group: "",
    version: "v1",
    kind: "ServiceAccount",
    plural: "serviceaccounts",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 0,
    merge: None,
};

static CONFIG_MAP: KindSpec = KindSpec {
    group: "",
    version: "v1",
    kind: "ConfigMap",
    plural: "configmaps",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 1,
    merge: None,
};

static NETWORK_POLICY: KindSpec = KindSpec {
    group: "networking.k8s.io",
    version: "v1",
    kind: "NetworkPolicy",
    plural: "networkpolicies",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 2,
    merge: None,
};

static PEER_AUTHENTICATION: KindSpec = KindSpec {
    group: "security.istio.io",
    version: "v1",
    kind: "PeerAuthentication",
    plural: "peerauthentications",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 2,
    merge: None,
};

static SERVICE_ENTRY: KindSpec = KindSpec {
    group: "networking.istio.io",
    version: "v1",
    kind: "ServiceEntry",
    plural: "serviceentries",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 2,
    merge: None,
};

static SIDECAR: KindSpec = KindSpec {
    group: "networking.istio.io",
    version: "v1",
    kind: "Sidecar",
    plural: "sidecars",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 2,
    merge: None,
};

static SERVICE: KindSpec = KindSpec {
    group: "",
    version: "v1",
    kind: "Service",
    plural: "services",
    strategy: SyncStrategy::Patch,
    fixed_namespace: false,
    priority: 3,
    merge: None,
};

static CERTIFICATE: KindSpec = KindSpec {
    group: "cert-manager.io",
    version: "v1",
    kind: "Certificate",
    plural: "certificates",
    strategy: SyncStrategy::Update,
    fixed_namespace: true,
    priority: 3,
    merge: None,
};

static GATEWAY: KindSpec = KindSpec {
    group: "networking.istio.io",
    version: "v1",
    kind: "Gateway",
    plural: "gateways",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 4,
    merge: None,
};

static VIRTUAL_SERVICE: KindSpec = KindSpec {
    group: "networking.istio.io",
    version: "v1",
    kind: "VirtualService",
    plural: "virtualservices",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 4,
    merge: None,
};

static DEPLOYMENT: KindSpec = KindSpec {
    group: "apps",
    version: "v1",
    kind: "Deployment",
    plural: "deployments",
    strategy: SyncStrategy::Patch,
    fixed_namespace: false,
    priority: 5,
    merge: Some(merge::merge_deployment),
};

static JOB: KindSpec = KindSpec {
    group: "batch",
    version: "v1",
    kind: "Job",
    plural: "jobs",
    strategy: SyncStrategy::Patch,
    fixed_namespace: false,
    priority: 5,
    merge: Some(merge::merge_job),
};

static CRON_JOB: KindSpec = KindSpec {
    group: "batch",
    version: "v1",
    kind: "CronJob",
    plural: "cronjobs",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 5,
    merge: None,
};

static HORIZONTAL_POD_AUTOSCALER: KindSpec = KindSpec {
    group: "autoscaling",
    version: "v2",
    kind: "HorizontalPodAutoscaler",
    plural: "horizontalpodautoscalers",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 6,
    merge: None,
};

static POD_DISRUPTION_BUDGET: KindSpec = KindSpec {
    group: "policy",
    version: "v1",
    kind: "PodDisruptionBudget",
    plural: "poddisruptionbudgets",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 6,
    merge: None,
};

static SERVICE_MONITOR: KindSpec = KindSpec {
    group: "monitoring.coreos.com",
    version: "v1",
    kind: "ServiceMonitor",
    plural: "servicemonitors",
    strategy: SyncStrategy::Update,
    fixed_namespace: false,
    priority: 6,
    merge: None,
};

impl ResourceKind {
    pub const ALL: [ResourceKind; 16] = [
        ResourceKind::ServiceAccount,
        ResourceKind::ConfigMap,
        ResourceKind::NetworkPolicy,
        ResourceKind::PeerAuthentication,
        ResourceKind::ServiceEntry,
        ResourceKind::Sidecar,
        ResourceKind::Service,
        ResourceKind::Certificate,
        ResourceKind::Gateway,
        ResourceKind::VirtualService,
        ResourceKind::Deployment,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::HorizontalPodAutoscaler,
        ResourceKind::PodDisruptionBudget,
        ResourceKind::ServiceMonitor,
    ];

    pub fn spec(self) -> &'static KindSpec {
        match self {
            ResourceKind::ServiceAccount => &SERVICE_ACCOUNT,
            ResourceKind::ConfigMap => &CONFIG_MAP,
            ResourceKind::NetworkPolicy => &NETWORK_POLICY,
            ResourceKind::PeerAuthentication => &PEER_AUTHENTICATION,
            ResourceKind::ServiceEntry => &SERVICE_ENTRY,
            ResourceKind::Sidecar => &SIDECAR,
            ResourceKind::Service => &SERVICE,
            ResourceKind::Certificate => &CERTIFICATE,
            ResourceKind::Gateway => &GATEWAY,
            ResourceKind::VirtualService => &VIRTUAL_SERVICE,
            ResourceKind::Deployment => &DEPLOYMENT,
            ResourceKind::Job => &JOB,
            ResourceKind::CronJob => &CRON_JOB,
            ResourceKind::HorizontalPodAutoscaler => &HORIZONTAL_POD_AUTOSCALER,
            ResourceKind::PodDisruptionBudget => &POD_DISRUPTION_BUDGET,
            ResourceKind::ServiceMonitor => &SERVICE_MONITOR,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.spec().kind
    }

    pub fn strategy(self) -> SyncStrategy {
        self.spec().strategy
    }

    pub fn is_fixed_namespace(self) -> bool {
        self.spec().fixed_namespace
    }

    pub fn priority(self) -> u8 {
        self.spec().priority
    }

    /// Resolve a kind name as found in `TypeMeta`
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Build the dynamic API descriptor used to address this kind
    pub fn api_resource(self) -> ApiResource {
        let spec = self.spec();
        ApiResource {
            group: spec.group.to_string(),
            version: spec.version.to_string(),
            api_version: spec.api_version(),
            kind: spec.kind.to_string(),
            plural: spec.plural.to_string(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_kinds() {
        let patch: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(|k| k.strategy() == SyncStrategy::Patch)
            .collect();
        assert_eq!(
            patch,
            vec![
                ResourceKind::Service,
                ResourceKind::Deployment,
                ResourceKind::Job
            ]
        );
    }

    #[test]
    fn test_only_certificate_is_fixed_namespace() {
        for kind in ResourceKind::ALL {
            assert_eq!(
                kind.is_fixed_namespace(),
                kind == ResourceKind::Certificate,
                "{kind}"
            );
        }
    }

    #[test]
    fn test_priority_orders_accounts_policies_services_workloads() {
        assert!(ResourceKind::ServiceAccount.priority() < ResourceKind::ConfigMap.priority());
        assert!(ResourceKind::ConfigMap.priority() < ResourceKind::NetworkPolicy.priority());
        assert!(ResourceKind::NetworkPolicy.priority() < ResourceKind::Service.priority());
        assert!(ResourceKind::Service.priority() < ResourceKind::Deployment.priority());
    }

    #[test]
    fn test_api_resource_core_group() {
        let ar = ResourceKind::ServiceAccount.api_resource();
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "serviceaccounts");

        let ar = ResourceKind::HorizontalPodAutoscaler.api_resource();
        assert_eq!(ar.api_version, "autoscaling/v2");
    }

    #[test]
    fn test_from_kind_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_kind(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_kind("StatefulSet"), None);
    }
}
