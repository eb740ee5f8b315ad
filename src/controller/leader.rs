//! Leader election over a `coordination.k8s.io/v1` Lease
//!
//! Every replica runs the controllers, but only the lease holder reconciles.
//! The others see `is_leader == false` and requeue without doing work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{info, warn};

pub const LEASE_NAME: &str = "tideway-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct LeaderElection {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElection {
    pub fn new(client: Client, namespace: &str, identity: &str, is_leader: Arc<AtomicBool>) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            is_leader,
        }
    }

    /// Acquire and renew the lease forever
    pub async fn run(self) {
        info!(
            lease = LEASE_NAME,
            namespace = %self.namespace,
            identity = %self.identity,
            "Starting leader election"
        );
        loop {
            let was_leader = self.is_leader.load(Ordering::Relaxed);
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    if !was_leader {
                        info!("Acquired leadership for lease {}", LEASE_NAME);
                    }
                    self.is_leader.store(true, Ordering::Relaxed);
                    tokio::time::sleep(RENEW_INTERVAL).await;
                }
                Ok(false) => {
                    if was_leader {
                        warn!("Lost leadership for lease {}", LEASE_NAME);
                    }
                    self.is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    self.is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let existing = match self.leases.get_opt(LEASE_NAME).await? {
            Some(lease) => lease,
            None => {
                self.leases
                    .create(&PostParams::default(), &self.new_lease(now))
                    .await?;
                info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
                return Ok(true);
            }
        };

        let spec = existing.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());

        let patch = if holder == Some(self.identity.as_str()) {
            serde_json::json!({
                "spec": {
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            })
        } else if lease_expired(spec, now) {
            info!("Lease held by {:?} has expired, taking over", holder);
            serde_json::json!({
                "spec": {
                    "holderIdentity": self.identity,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            })
        } else {
            return Ok(false);
        };

        self.leases
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(true)
    }

    fn new_lease(&self, now: DateTime<Utc>) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        }
    }
}

/// Whether the current holder failed to renew within its lease duration
///
/// A lease that was never renewed counts as expired.
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renewed) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
}
