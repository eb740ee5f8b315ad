//! Pod template shared by Deployments, Jobs and CronJobs

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource,
    LocalObjectReference, PodSecurityContext, PodSpec, PodTemplateSpec, SecurityContext,
    SeccompProfile, TopologySpreadConstraint,
};
use k8s_openapi::api::core::v1::ResourceRequirements as K8sResources;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::config::ControllerConfig;
use crate::crd::{EnvVar, PrometheusConfig, ResourceRequirements};

use super::config_map;

/// Workload fields that end up in the pod template
pub(crate) struct Workload<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub command: &'a [String],
    pub env: &'a [EnvVar],
    pub resources: &'a ResourceRequirements,
    pub port: Option<i32>,
    pub prometheus: Option<&'a PrometheusConfig>,
    pub labels: BTreeMap<String, String>,
}

pub(crate) fn build_pod_template(
    workload: &Workload<'_>,
    config: &ControllerConfig,
    restart_policy: Option<&str>,
    spread: bool,
) -> PodTemplateSpec {
    let annotations = workload.prometheus.map(|p| {
        BTreeMap::from([
            ("prometheus.io/scrape".to_string(), "true".to_string()),
            ("prometheus.io/port".to_string(), p.port.to_string()),
            ("prometheus.io/path".to_string(), p.path.clone()),
        ])
    });

    let topology_spread_constraints =
        (spread && config.topology_spread).then(|| build_topology_spread_constraints(workload.name));

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(workload.labels.clone()),
            annotations,
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![build_container(workload)],
            service_account_name: Some(workload.name.to_string()),
            restart_policy: restart_policy.map(str::to_string),
            image_pull_secrets: config.image_pull_secret.as_ref().map(|secret| {
                vec![LocalObjectReference {
                    name: Some(secret.clone()),
                }]
            }),
            security_context: Some(PodSecurityContext {
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            topology_spread_constraints,
            ..Default::default()
        }),
    }
}

fn build_container(workload: &Workload<'_>) -> Container {
    let mut ports = Vec::new();
    if let Some(port) = workload.port {
        ports.push(ContainerPort {
            name: Some("main".to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }
    if let Some(prometheus) = workload.prometheus {
        if Some(prometheus.port) != workload.port {
            ports.push(ContainerPort {
                name: Some("metrics".to_string()),
                container_port: prometheus.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            });
        }
    }

    let env_from = (!workload.env.is_empty()).then(|| {
        vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: Some(config_map::env_config_map_name(workload.name)),
                optional: Some(false),
            }),
            ..Default::default()
        }]
    });

    let resources = &workload.resources;
    let resources = (!resources.requests.is_empty() || !resources.limits.is_empty()).then(|| {
        K8sResources {
            requests: (!resources.requests.is_empty()).then(|| resources.requests.to_quantities()),
            limits: (!resources.limits.is_empty()).then(|| resources.limits.to_quantities()),
            ..Default::default()
        }
    });

    Container {
        name: workload.name.to_string(),
        image: Some(workload.image.to_string()),
        command: (!workload.command.is_empty()).then(|| workload.command.to_vec()),
        ports: (!ports.is_empty()).then_some(ports),
        env_from,
        resources,
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            read_only_root_filesystem: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Default spread across nodes and zones for pods of one workload
pub(crate) fn build_topology_spread_constraints(name: &str) -> Vec<TopologySpreadConstraint> {
    let selector = LabelSelector {
        match_labels: Some(super::app_labels(name)),
        ..Default::default()
    };

    vec![
        TopologySpreadConstraint {
            max_skew: 1,
            topology_key: "kubernetes.io/hostname".to_string(),
            when_unsatisfiable: "ScheduleAnyway".to_string(),
            label_selector: Some(selector.clone()),
            ..Default::default()
        },
        TopologySpreadConstraint {
            max_skew: 1,
            topology_key: "topology.kubernetes.io/zone".to_string(),
            when_unsatisfiable: "ScheduleAnyway".to_string(),
            label_selector: Some(selector),
            ..Default::default()
        },
    ]
}
