use crate::config::Config;
use crate::db::{SqlExecutor, SqlValue};
use crate::provision::ProvisionStore;
use crate::state::SharedMembership;
use crate::types::{Event, EventKind, PodEvent, Role};
use crate::watcher::ReadinessProbe;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub static ADD_NODE_QUERY: &str = "SELECT master_add_node(%(host)s, %(port)s)";
pub static REMOVE_NODE_QUERY: &str = "DELETE FROM pg_dist_shard_placement \
     WHERE nodename=%(host)s AND nodeport=%(port)s; \
     SELECT master_remove_node(%(host)s, %(port)s)";

/// The single consumer of the merged event channel. Every membership
/// mutation and every outbound SQL statement goes through here, one event
/// at a time; an event runs to completion before the next one is drained.
pub struct Reconciler<S, P> {
    config: Config,
    state: SharedMembership,
    scripts: ProvisionStore,
    sql: S,
    probe: P,
}

impl<S: SqlExecutor, P: ReadinessProbe> Reconciler<S, P> {
    pub fn new(
        config: Config,
        state: SharedMembership,
        scripts: ProvisionStore,
        sql: S,
        probe: P,
    ) -> Self {
        Self {
            config,
            state,
            scripts,
            sql,
            probe,
        }
    }

    pub async fn run(self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("event channel closed, reconciler stopping");
    }

    pub async fn handle(&self, event: Event) {
        match event {
            Event::Pod(PodEvent { kind, name, role }) => match (kind, role) {
                (EventKind::Added, Role::Master) => self.add_master(&name).await,
                (EventKind::Added, Role::Worker) => self.add_worker(&name).await,
                (EventKind::Deleted, Role::Master) => self.remove_master(&name).await,
                (EventKind::Deleted, Role::Worker) => self.remove_worker(&name).await,
            },
            Event::ProvisionChange(Role::Master) => self.update_masters().await,
            Event::ProvisionChange(Role::Worker) => self.update_workers().await,
        }
    }

    async fn add_master(&self, pod_name: &str) {
        if !self.await_readiness(pod_name).await {
            return;
        }
        info!("Registering new master {}", pod_name);

        let (provision_this, workers) = {
            let mut state = self.state.write().await;
            state.add_master(pod_name);
            (
                state.worker_count() >= self.config.minimum_workers,
                state.workers(),
            )
        };

        if provision_this {
            self.provision_node(pod_name, Role::Master).await;
        }
        // A master that joins late still has to learn about every worker
        // registered so far.
        for worker in workers {
            self.register_worker(&worker).await;
        }
    }

    async fn add_worker(&self, pod_name: &str) {
        if !self.await_readiness(pod_name).await {
            return;
        }
        info!("Registering new worker {}", pod_name);

        enum Provision {
            Skip,
            Bulk,
            This,
        }
        let provision = {
            let mut state = self.state.write().await;
            state.add_worker(pod_name);
            if state.worker_count() < self.config.minimum_workers {
                Provision::Skip
            } else if state.try_mark_initially_provisioned() {
                Provision::Bulk
            } else {
                Provision::This
            }
        };

        match provision {
            Provision::Skip => debug!(
                "Below the minimum of {} workers, not provisioning yet",
                self.config.minimum_workers
            ),
            Provision::Bulk => {
                self.update_masters().await;
                self.update_workers().await;
            }
            Provision::This => self.provision_node(pod_name, Role::Worker).await,
        }

        self.register_worker(pod_name).await;
    }

    async fn remove_master(&self, pod_name: &str) {
        self.state.write().await.remove_master(pod_name);
        info!("Master terminated: {}", pod_name);
    }

    async fn remove_worker(&self, pod_name: &str) {
        let removed = self.state.write().await.remove_worker(pod_name);
        if !removed {
            debug!("Worker {} was never registered, nothing to do", pod_name);
            return;
        }
        info!("Worker terminated: {}", pod_name);
        self.exec_on_masters(REMOVE_NODE_QUERY, pod_name).await;
        info!("Unregistered: {}", pod_name);
    }

    async fn update_masters(&self) {
        info!("Update masters with new config");
        for pod in self.state.read().await.masters() {
            self.provision_node(&pod, Role::Master).await;
        }
    }

    async fn update_workers(&self) {
        info!("Update workers with new config");
        for pod in self.state.read().await.workers() {
            self.provision_node(&pod, Role::Worker).await;
        }
    }

    /// True when the pod came up ready. An API rejection drops the event
    /// without touching membership; the pod is picked up again on its next
    /// ADDED event or on the post-restart replay.
    async fn await_readiness(&self, pod_name: &str) -> bool {
        match self.probe.check_ready(pod_name).await {
            Ok(()) => true,
            Err(e) => {
                info!("Error while waiting for pod readiness: {}", pod_name);
                error!("{}", e);
                false
            }
        }
    }

    /// Calls `master_add_node` for the worker on every known master.
    async fn register_worker(&self, worker_name: &str) {
        self.exec_on_masters(ADD_NODE_QUERY, worker_name).await;
    }

    /// Runs the role's provisioning script, freshly read from disk, against
    /// one pod. A failing statement is logged and the rest of the script
    /// still runs; scripts are expected to mix idempotent statements with
    /// ones that legitimately fail on re-run.
    async fn provision_node(&self, pod_name: &str, role: Role) {
        let script = match self.scripts.load(role) {
            Ok(script) => script,
            Err(e) => {
                error!(
                    "could not read provisioning script {}: {}",
                    self.scripts.path(role).display(),
                    e
                );
                return;
            }
        };
        let service = self.service_for(role);
        for statement in script.iter().filter(|s| !s.trim().is_empty()) {
            info!("Running provision query on: {}", pod_name);
            if let Err(e) = self.sql.execute(pod_name, service, statement, &[]).await {
                error!("Error {} while executing provision query: {}", e, statement);
            }
        }
    }

    async fn exec_on_masters(&self, query: &str, worker_name: &str) {
        let masters = self.state.read().await.masters();
        let worker_host = self.sql.host_name(worker_name, &self.config.worker_service);
        let params = [
            ("host", SqlValue::Text(worker_host)),
            ("port", SqlValue::Int(i32::from(self.config.pg_port))),
        ];
        for master in masters {
            if let Err(e) = self
                .sql
                .execute(&master, &self.config.master_service, query, &params)
                .await
            {
                error!("Error {} while running {} on {}", e, query, master);
            }
        }
    }

    fn service_for(&self, role: Role) -> &str {
        match role {
            Role::Master => &self.config.master_service,
            Role::Worker => &self.config.worker_service,
        }
    }
}
