use crate::config::Config;
use crate::types::{Event, EventKind, PodEvent, Role};
use crate::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const CITUS_TYPE_LABEL: &str = "citusType";

const READINESS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Streams typed pod events for the managed namespace onto the reconciler
/// channel. MODIFIED events and pods without a recognized `citusType` label
/// never make it onto the channel.
pub struct PodWatcher {
    client: Client,
    config: Config,
    events: mpsc::Sender<Event>,
}

impl PodWatcher {
    pub fn new(client: Client, config: Config, events: mpsc::Sender<Event>) -> Self {
        Self {
            client,
            config,
            events,
        }
    }

    /// One pass over the watch stream. Starting at resource version "0"
    /// replays the current pod list as ADDED events, which is how state is
    /// rebuilt after a manager restart. The caller restarts this on error.
    pub async fn watch(&self) -> Result<(), kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let wp = WatchParams::default();
        let mut stream = api.watch(&wp, "0").await?.boxed();

        while let Some(status) = stream.try_next().await? {
            match status {
                WatchEvent::Added(pod) => self.forward(EventKind::Added, pod).await,
                WatchEvent::Deleted(pod) => self.forward(EventKind::Deleted, pod).await,
                _ => {}
            }
        }
        Ok(())
    }

    async fn forward(&self, kind: EventKind, pod: Pod) {
        let Some(name) = pod.metadata.name else { return };
        let labels = pod.metadata.labels.unwrap_or_default();
        let Some(citus_type) = labels.get(CITUS_TYPE_LABEL) else {
            debug!("Pod {} carries no {} label, ignoring", name, CITUS_TYPE_LABEL);
            return;
        };
        if citus_type.is_empty() {
            return;
        }
        info!(
            "New event {:?} for pod {} with citus type {}",
            kind, name, citus_type
        );

        let role = if citus_type == &self.config.master_label {
            Role::Master
        } else if citus_type == &self.config.worker_label {
            Role::Worker
        } else {
            error!("Not recognized citus type {}", citus_type);
            return;
        };

        let event = Event::Pod(PodEvent { kind, name, role });
        if self.events.send(event).await.is_err() {
            warn!("event channel closed, dropping pod event");
        }
    }
}

/// Readiness polling seam; tests script their own answers.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check_ready(&self, pod_name: &str) -> Result<()>;
}

pub struct PodReadiness {
    client: Client,
    namespace: String,
}

impl PodReadiness {
    pub fn new(client: Client, namespace: String) -> Self {
        Self { client, namespace }
    }
}

#[async_trait]
impl ReadinessProbe for PodReadiness {
    /// Blocks until every container in the pod reports ready, polling on a
    /// fixed interval. Only an API rejection breaks the loop; transport
    /// hiccups and not-yet-ready states are retried indefinitely.
    async fn check_ready(&self, pod_name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        loop {
            match api.get_status(pod_name).await {
                Ok(pod) => {
                    if all_containers_ready(&pod) {
                        info!("Pod {} ready", pod_name);
                        return Ok(());
                    }
                    debug!("Pod {} not ready yet", pod_name);
                }
                Err(err @ kube::Error::Api(_)) => return Err(err.into()),
                Err(e) => warn!("readiness check for {} failed, retrying: {}", pod_name, e),
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
}

fn all_containers_ready(pod: &Pod) -> bool {
    if let Some(status) = &pod.status {
        if let Some(container_statuses) = &status.container_statuses {
            return !container_statuses.is_empty()
                && container_statuses.iter().all(|container| container.ready);
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};

    fn pod_with_readiness(ready: &[bool]) -> Pod {
        let container_statuses = ready
            .iter()
            .map(|r| ContainerStatus {
                ready: *r,
                ..ContainerStatus::default()
            })
            .collect();
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(container_statuses),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn ready_needs_every_container() {
        assert!(all_containers_ready(&pod_with_readiness(&[true, true])));
        assert!(!all_containers_ready(&pod_with_readiness(&[true, false])));
        assert!(!all_containers_ready(&pod_with_readiness(&[])));
        assert!(!all_containers_ready(&Pod::default()));
    }
}
