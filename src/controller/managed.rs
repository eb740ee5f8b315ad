//! The closed set of kinds the operator reconciles
//!
//! `ManagedObject` is the uniform view the engine works with: identity,
//! ownership labels, owner reference and previous status, whatever the
//! underlying kind.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::crd::{AccessPolicy, Application, Routing, SyncStatus, TideJob};

/// Label marking every child produced by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "tideway";
pub const OWNER_KIND_LABEL: &str = "tideway.dev/owner-kind";
pub const OWNER_NAME_LABEL: &str = "tideway.dev/owner-name";
pub const OWNER_NAMESPACE_LABEL: &str = "tideway.dev/owner-namespace";

/// Objects carrying `tideway.dev/ignore=true` are never modified or deleted
pub const IGNORE_LABEL: &str = "tideway.dev/ignore";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    Application,
    Job,
    Routing,
    Namespace,
}

impl ManagedKind {
    pub const ALL: [ManagedKind; 4] = [
        ManagedKind::Application,
        ManagedKind::Job,
        ManagedKind::Routing,
        ManagedKind::Namespace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ManagedKind::Application => "Application",
            ManagedKind::Job => "TideJob",
            ManagedKind::Routing => "Routing",
            ManagedKind::Namespace => "Namespace",
        }
    }

    /// Value of the owner-kind label
    pub fn label_value(self) -> String {
        self.as_str().to_lowercase()
    }

    /// Whether status is written back for this kind
    pub fn has_status(self) -> bool {
        !matches!(self, ManagedKind::Namespace)
    }
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed object of any supported kind
#[derive(Clone, Debug)]
pub enum ManagedObject {
    Application(Application),
    Job(TideJob),
    Routing(Routing),
    Namespace(Namespace),
}

impl ManagedObject {
    pub fn kind(&self) -> ManagedKind {
        match self {
            ManagedObject::Application(_) => ManagedKind::Application,
            ManagedObject::Job(_) => ManagedKind::Job,
            ManagedObject::Routing(_) => ManagedKind::Routing,
            ManagedObject::Namespace(_) => ManagedKind::Namespace,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Application(o) => o.meta(),
            ManagedObject::Job(o) => o.meta(),
            ManagedObject::Routing(o) => o.meta(),
            ManagedObject::Namespace(o) => o.meta(),
        }
    }

    pub fn name(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }

    pub fn generation(&self) -> Option<i64> {
        self.meta().generation
    }

    /// Namespace children of this object are placed in
    ///
    /// A Namespace owns children inside itself.
    pub fn scope_namespace(&self) -> String {
        match self {
            ManagedObject::Namespace(ns) => ns.name_any(),
            _ => self
                .meta()
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        }
    }

    /// Human-readable `namespace/name` identity
    pub fn identity(&self) -> String {
        match self {
            ManagedObject::Namespace(_) => self.name(),
            _ => format!("{}/{}", self.scope_namespace(), self.name()),
        }
    }

    pub fn status(&self) -> Option<&SyncStatus> {
        match self {
            ManagedObject::Application(o) => o.status.as_ref(),
            ManagedObject::Job(o) => o.status.as_ref(),
            ManagedObject::Routing(o) => o.status.as_ref(),
            ManagedObject::Namespace(_) => None,
        }
    }

    pub fn access_policy(&self) -> Option<&AccessPolicy> {
        match self {
            ManagedObject::Application(o) => o.spec.access_policy.as_ref(),
            ManagedObject::Job(o) => o.spec.access_policy.as_ref(),
            _ => None,
        }
    }

    /// Labels stamped on every child and used to discover them again
    pub fn ownership_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (OWNER_KIND_LABEL.to_string(), self.kind().label_value()),
            (OWNER_NAME_LABEL.to_string(), label_safe(&self.name())),
            (OWNER_NAMESPACE_LABEL.to_string(), label_safe(&self.scope_namespace())),
        ])
    }

    /// Ownership labels rendered as an equality label selector
    pub fn label_selector(&self) -> String {
        self.ownership_labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Controller owner reference pointing at this object
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        match self {
            ManagedObject::Application(o) => o.controller_owner_ref(&()),
            ManagedObject::Job(o) => o.controller_owner_ref(&()),
            ManagedObject::Routing(o) => o.controller_owner_ref(&()),
            ManagedObject::Namespace(o) => o.controller_owner_ref(&()),
        }
    }
}

/// Longest value a Kubernetes label may hold
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Fit an object name into a label value
///
/// Names longer than a label allows are cut and suffixed with a hash of the
/// full name, so distinct owners keep distinct selectors.
pub fn label_safe(name: &str) -> String {
    if name.len() <= MAX_LABEL_VALUE_LEN {
        return name.to_string();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let prefix: String = name.chars().take(MAX_LABEL_VALUE_LEN - 9).collect();
    format!("{}-{}", prefix.trim_end_matches(['-', '.']), &digest[..8])
}

/// Typed custom resources reconciled through the shared engine
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ManagedKind;

    fn to_managed(&self) -> ManagedObject;
}

impl Managed for Application {
    const KIND: ManagedKind = ManagedKind::Application;

    fn to_managed(&self) -> ManagedObject {
        ManagedObject::Application(self.clone())
    }
}

impl Managed for TideJob {
    const KIND: ManagedKind = ManagedKind::Job;

    fn to_managed(&self) -> ManagedObject {
        ManagedObject::Job(self.clone())
    }
}

impl Managed for Routing {
    const KIND: ManagedKind = ManagedKind::Routing;

    fn to_managed(&self) -> ManagedObject {
        ManagedObject::Routing(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ApplicationSpec;

    fn app() -> Application {
        let spec: ApplicationSpec =
            serde_json::from_value(serde_json::json!({ "image": "nginx" })).unwrap();
        let mut app = Application::new("api", spec);
        app.metadata.namespace = Some("shop".to_string());
        app.metadata.uid = Some("uid-1".to_string());
        app
    }

    #[test]
    fn test_ownership_labels() {
        let owner = ManagedObject::Application(app());
        let labels = owner.ownership_labels();
        assert_eq!(labels[MANAGED_BY_LABEL], "tideway");
        assert_eq!(labels[OWNER_KIND_LABEL], "application");
        assert_eq!(labels[OWNER_NAME_LABEL], "api");
        assert_eq!(labels[OWNER_NAMESPACE_LABEL], "shop");
        assert_eq!(
            owner.label_selector(),
            "app.kubernetes.io/managed-by=tideway,tideway.dev/owner-kind=application,\
             tideway.dev/owner-name=api,tideway.dev/owner-namespace=shop"
        );
    }

    #[test]
    fn test_long_owner_name_fits_label() {
        let long = format!("checkout-{}", "a".repeat(240));
        let mut application = app();
        application.metadata.name = Some(long.clone());
        let labels = ManagedObject::Application(application).ownership_labels();

        let value = &labels[OWNER_NAME_LABEL];
        assert_eq!(value.len(), MAX_LABEL_VALUE_LEN);
        assert!(value.starts_with("checkout-aaa"));
        assert_ne!(label_safe(&long), label_safe(&format!("{long}b")));
        assert_eq!(label_safe("api"), "api");
    }

    #[test]
    fn test_owner_reference_is_controller() {
        let owner = ManagedObject::Application(app());
        let reference = owner.owner_reference().unwrap();
        assert_eq!(reference.kind, "Application");
        assert_eq!(reference.uid, "uid-1");
        assert_eq!(reference.controller, Some(true));
    }

    #[test]
    fn test_namespace_scopes_to_itself() {
        let mut ns = Namespace::default();
        ns.metadata.name = Some("team-a".to_string());
        let owner = ManagedObject::Namespace(ns);
        assert_eq!(owner.scope_namespace(), "team-a");
        assert_eq!(owner.identity(), "team-a");
        assert!(owner.status().is_none());
        assert!(!owner.kind().has_status());
    }

    #[test]
    fn test_job_kind_display() {
        assert_eq!(ManagedKind::Job.to_string(), "TideJob");
        assert_eq!(ManagedKind::Job.label_value(), "tidejob");
    }
}
