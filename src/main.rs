use actix_web::{get, middleware, web::Data, App, HttpResponse, HttpServer, Responder};
use manager::config::Config;
use manager::db::DbGateway;
use manager::provision::{FileWatcher, ProvisionStore};
use manager::state::{Membership, SharedMembership};
use manager::types::{Event, Role};
use manager::watcher::{PodReadiness, PodWatcher};
use manager::{Reconciler, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Serialize)]
struct Registered {
    workers: Vec<String>,
    masters: Vec<String>,
}

#[get("/registered")]
async fn registered(state: Data<SharedMembership>) -> impl Responder {
    let (masters, workers) = state.read().await.snapshot();
    HttpResponse::Ok().json(Registered { workers, masters })
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[tokio::main]
async fn main() -> Result<()> {
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector).unwrap();

    let config = Config::from_env()?;
    info!("Starting to watch citus db pods in {}", config.namespace);

    let client = kube::Client::try_default().await?;
    let state: SharedMembership = Arc::new(RwLock::new(Membership::new()));
    let (events, event_queue) = mpsc::channel::<Event>(64);

    // Provisioning-file watchers; an unreadable script is fatal here.
    let master_watcher =
        FileWatcher::new(&config.master_setup_path, Role::Master, events.clone())?;
    tokio::spawn(master_watcher.run());
    let worker_watcher =
        FileWatcher::new(&config.worker_setup_path, Role::Worker, events.clone())?;
    tokio::spawn(worker_watcher.run());

    let pod_watcher = PodWatcher::new(client.clone(), config.clone(), events);
    tokio::spawn(watch_pods(pod_watcher));

    let reconciler = Reconciler::new(
        config.clone(),
        state.clone(),
        ProvisionStore::new(&config),
        DbGateway::new(&config),
        PodReadiness::new(client, config.namespace.clone()),
    );

    let server = HttpServer::new({
        let state = Data::new(state.clone());
        move || {
            App::new()
                .app_data(state.clone())
                .wrap(middleware::Logger::default().exclude("/health"))
                .service(registered)
                .service(health)
        }
    })
    .bind(("0.0.0.0", config.http_port))?
    .shutdown_timeout(5);

    tokio::select! {
        _ = reconciler.run(event_queue) => warn!("reconciler exited"),
        _ = server.run() => info!("actix exited"),
    }
    Ok(())
}

async fn watch_pods(watcher: PodWatcher) {
    loop {
        match watcher.watch().await {
            Ok(_) => info!("Pod watcher finished, restarting."),
            Err(e) => {
                error!("Pod watcher failed, restarting: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        }
    }
}
