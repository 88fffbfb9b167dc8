use crate::{Error, Result};
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub namespace: String,
    pub master_label: String,
    pub worker_label: String,
    pub master_service: String,
    pub worker_service: String,
    pub pg_db: String,
    pub pg_user: String,
    pub pg_password: String,
    pub pg_port: u16,
    pub minimum_workers: usize,
    pub short_url: bool,
    pub master_setup_path: String,
    pub worker_setup_path: String,
    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let namespace =
            env::var("NAMESPACE").map_err(|_| Error::Config("NAMESPACE must be set".to_owned()))?;
        Ok(Self {
            namespace,
            master_label: from_env_default("MASTER_LABEL", "citus-master"),
            worker_label: from_env_default("WORKER_LABEL", "citus-worker"),
            master_service: from_env_default("MASTER_SERVICE", "pg-citus-master"),
            worker_service: from_env_default("WORKER_SERVICE", "pg-citus-worker"),
            pg_db: from_env_default("PG_DB", "postgres"),
            pg_user: from_env_default("PG_USER", "postgres"),
            pg_password: from_env_default("PG_PASSWORD", ""),
            pg_port: parse_env("PG_PORT", "5432")?,
            minimum_workers: parse_env("MINIMUM_WORKERS", "0")?,
            short_url: parse_env("SHORT_URL", "false")?,
            master_setup_path: from_env_default("MASTER_SETUP_PATH", "/etc/citus-config/master.setup"),
            worker_setup_path: from_env_default("WORKER_SETUP_PATH", "/etc/citus-config/worker.setup"),
            http_port: parse_env("HTTP_PORT", "8000")?,
        })
    }
}

// Source the variable from the env - use default if not set
fn from_env_default(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: FromStr>(var: &str, default: &str) -> Result<T> {
    from_env_default(var, default)
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {var}")))
}
