//! Domain validity check feeding the `accessPolicies` sub-status
//!
//! Violations never fail a pass. They only decide between `READY` and
//! `INVALIDCONFIG` and the `AccessPoliciesValid` condition.

use crate::crd::PolicyViolation;

use super::managed::ManagedObject;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validity {
    /// The kind carries no policies
    NotApplicable,
    Valid,
    Invalid(Vec<PolicyViolation>),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Validity::Invalid(_))
    }

    /// Condition message listing every violation
    pub fn message(&self) -> String {
        match self {
            Validity::NotApplicable => String::new(),
            Validity::Valid => "Access policies are valid".to_string(),
            Validity::Invalid(violations) => violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

pub fn check(owner: &ManagedObject) -> Validity {
    let result = match owner {
        ManagedObject::Application(app) => app.spec.validate_access(),
        ManagedObject::Job(job) => job.spec.validate_access(),
        ManagedObject::Routing(routing) => routing.spec.validate_routes(),
        ManagedObject::Namespace(_) => return Validity::NotApplicable,
    };

    match result {
        Ok(()) => Validity::Valid,
        Err(violations) => Validity::Invalid(violations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Route, Routing, RoutingSpec};
    use k8s_openapi::api::core::v1::Namespace;

    #[test]
    fn test_namespace_not_applicable() {
        let owner = ManagedObject::Namespace(Namespace::default());
        assert_eq!(check(&owner), Validity::NotApplicable);
        assert!(check(&owner).is_valid());
    }

    #[test]
    fn test_invalid_routing_lists_violations() {
        let routing = Routing::new(
            "shop",
            RoutingSpec {
                hostname: "shop.example.com".to_string(),
                routes: vec![Route {
                    path_prefix: "/".to_string(),
                    target_app: String::new(),
                    port: 80,
                    rewrite_uri: false,
                }],
                redirect_to_https: true,
            },
        );
        let validity = check(&ManagedObject::Routing(routing));
        assert!(!validity.is_valid());
        assert!(validity.message().contains("targetApp"));
    }
}
