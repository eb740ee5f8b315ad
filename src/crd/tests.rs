//! Unit tests for spec defaults and access policy validation

#[cfg(test)]
mod application_spec {
    use crate::crd::{
        AccessPolicy, ApplicationSpec, ExternalPort, ExternalRule, InboundPolicy, InternalRule,
        OutboundPolicy, Replicas,
    };

    fn minimal_spec() -> ApplicationSpec {
        serde_json::from_value(serde_json::json!({ "image": "ghcr.io/acme/api:1.0" })).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let spec = minimal_spec();
        assert_eq!(spec.port, 8080);
        assert_eq!(spec.replicas, Replicas::default());
        assert!(spec.redirect_to_https);
        assert!(spec.ingresses.is_empty());
        assert!(spec.validate_access().is_ok());
    }

    #[test]
    fn test_fixed_replicas_only_when_bounds_equal() {
        let pinned = Replicas {
            min: 3,
            max: 3,
            target_cpu_utilization: 80,
        };
        assert_eq!(pinned.fixed(), Some(3));
        assert_eq!(Replicas::default().fixed(), None);
    }

    #[test]
    fn test_duplicate_ingress_rejected() {
        let mut spec = minimal_spec();
        spec.ingresses = vec!["api.example.com".into(), "api.example.com".into()];
        let errors = spec.validate_access().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "spec.ingresses");
    }

    #[test]
    fn test_external_rule_without_ports_rejected() {
        let mut spec = minimal_spec();
        spec.access_policy = Some(AccessPolicy {
            inbound: None,
            outbound: Some(OutboundPolicy {
                rules: vec![],
                external: vec![ExternalRule {
                    host: "api.stripe.com".into(),
                    ip: None,
                    ports: vec![],
                }],
            }),
        });
        let errors = spec.validate_access().unwrap_err();
        assert!(errors[0].message.contains("api.stripe.com"));
    }

    #[test]
    fn test_internal_rule_must_name_application() {
        let mut spec = minimal_spec();
        spec.access_policy = Some(AccessPolicy {
            inbound: Some(InboundPolicy {
                rules: vec![InternalRule {
                    application: " ".into(),
                    namespace: None,
                }],
            }),
            outbound: Some(OutboundPolicy {
                rules: vec![InternalRule {
                    application: "billing".into(),
                    namespace: Some("payments".into()),
                }],
                external: vec![ExternalRule {
                    host: "api.stripe.com".into(),
                    ip: None,
                    ports: vec![ExternalPort {
                        name: "https".into(),
                        port: 443,
                        protocol: "HTTPS".into(),
                    }],
                }],
            }),
        });
        let errors = spec.validate_access().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].field.starts_with("spec.accessPolicy.inbound"));
    }
}

#[cfg(test)]
mod tide_job_spec {
    use crate::crd::TideJobSpec;

    #[test]
    fn test_scheduled_job_defaults() {
        let spec: TideJobSpec = serde_json::from_value(serde_json::json!({
            "container": { "image": "busybox" },
            "cron": { "schedule": "*/5 * * * *" }
        }))
        .unwrap();
        assert!(spec.is_scheduled());
        assert_eq!(spec.cron.unwrap().concurrency_policy, "Forbid");
        assert!(!spec.job.suspend);
    }
}

#[cfg(test)]
mod routing_spec {
    use crate::crd::{Route, RoutingSpec};

    fn route(prefix: &str, app: &str, port: i32) -> Route {
        Route {
            path_prefix: prefix.into(),
            target_app: app.into(),
            port,
            rewrite_uri: false,
        }
    }

    #[test]
    fn test_valid_routes() {
        let spec = RoutingSpec {
            hostname: "shop.example.com".into(),
            routes: vec![route("/api", "api", 8080), route("/", "web", 80)],
            redirect_to_https: true,
        };
        assert!(spec.validate_routes().is_ok());
    }

    #[test]
    fn test_duplicate_prefix_and_bad_port() {
        let spec = RoutingSpec {
            hostname: "shop.example.com".into(),
            routes: vec![route("/api", "api", 8080), route("/api", "", 0)],
            redirect_to_https: true,
        };
        let errors = spec.validate_routes().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
