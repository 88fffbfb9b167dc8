use crate::config::Config;
use async_trait::async_trait;
use log::LevelFilter;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor, PgConnection};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONNECT_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
const CONNECT_ATTEMPTS: u32 = 10;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to connect to {host}: {source}")]
    Unreachable {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("statement failed: {0}")]
    Statement(String),
}

/// A bindable statement parameter. Values only ever reach the server
/// through the bind interface, never through the statement text.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i32),
}

/// The seam between the reconciler and the actual database wire. The
/// production implementation is [`DbGateway`]; tests substitute a recorder.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    fn host_name(&self, pod_name: &str, service_name: &str) -> String;

    async fn execute(
        &self,
        pod_name: &str,
        service_name: &str,
        statement: &str,
        params: &[(&str, SqlValue)],
    ) -> Result<(), DbError>;
}

/// Opens one connection per statement, no pooling. Cluster membership
/// changes are rare enough that connection reuse buys nothing.
pub struct DbGateway {
    dbname: String,
    user: String,
    password: String,
    namespace: String,
    short_url: bool,
}

impl DbGateway {
    pub fn new(conf: &Config) -> Self {
        Self {
            dbname: conf.pg_db.clone(),
            user: conf.pg_user.clone(),
            password: conf.pg_password.clone(),
            namespace: conf.namespace.clone(),
            short_url: conf.short_url,
        }
    }

    async fn connect(&self, host: &str) -> Result<PgConnection, DbError> {
        let mut options = PgConnectOptions::new()
            .host(host)
            .database(&self.dbname)
            .username(&self.user);
        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        options.log_statements(LevelFilter::Debug);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match options.connect().await {
                Ok(conn) => {
                    info!("Connected to pg db on: {}", host);
                    return Ok(conn);
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(
                        "connect to {} failed (attempt {}/{}): {}",
                        host, attempt, CONNECT_ATTEMPTS, e
                    );
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    return Err(DbError::Unreachable {
                        host: host.to_owned(),
                        source: e,
                    })
                }
            }
        }
    }
}

#[async_trait]
impl SqlExecutor for DbGateway {
    fn host_name(&self, pod_name: &str, service_name: &str) -> String {
        host_name(pod_name, service_name, &self.namespace, self.short_url)
    }

    async fn execute(
        &self,
        pod_name: &str,
        service_name: &str,
        statement: &str,
        params: &[(&str, SqlValue)],
    ) -> Result<(), DbError> {
        let host = self.host_name(pod_name, service_name);
        let mut conn = self.connect(&host).await?;
        let outcome = run_statement(&mut conn, statement, params).await;
        let _ = conn.close().await;
        outcome
    }
}

/// Pod DNS name inside the cluster. Some environments resolve the short
/// `<pod>.<service>` form, the rest need the fully qualified one.
pub fn host_name(pod_name: &str, service_name: &str, namespace: &str, short_url: bool) -> String {
    if short_url {
        return format!("{pod_name}.{service_name}");
    }
    format!("{pod_name}.{service_name}.{namespace}.svc.cluster.local")
}

/// Runs a statement inside one transaction. COMMIT is issued before the
/// connection is handed back even when a command failed, matching what a
/// commit-on-cleanup client does (the server turns it into a rollback).
async fn run_statement(
    conn: &mut PgConnection,
    statement: &str,
    params: &[(&str, SqlValue)],
) -> Result<(), DbError> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| DbError::Statement(format!("failed to open transaction: {e}")))?;

    let mut outcome = Ok(());
    if params.is_empty() {
        // No binds, so the whole statement goes over the simple protocol
        // in one piece; the server stops at the first failing command.
        debug!("Executing statement: {}", statement);
        if let Err(e) = (&mut *tx).execute(statement).await {
            outcome = Err(DbError::Statement(format!("{statement}: {e}")));
        }
    } else {
        info!("Executing query {} with {:?}", statement, params);
        for command in split_commands(statement) {
            match to_positional(command, params) {
                Ok((sql, values)) => {
                    let mut query = sqlx::query(&sql);
                    for value in values {
                        query = match value {
                            SqlValue::Text(s) => query.bind(s.clone()),
                            SqlValue::Int(i) => query.bind(*i),
                        };
                    }
                    if let Err(e) = query.execute(&mut *tx).await {
                        outcome = Err(DbError::Statement(format!("{command}: {e}")));
                    }
                }
                Err(e) => outcome = Err(e),
            }
            if outcome.is_err() {
                break;
            }
        }
    }

    if let Err(e) = tx.commit().await {
        warn!("commit failed: {}", e);
    }
    outcome
}

fn split_commands(statement: &str) -> impl Iterator<Item = &str> {
    statement.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Rewrites `%(name)s` placeholders to positional `$n` binds, repeated
/// names reusing the same index, and returns the values in bind order.
fn to_positional<'a>(
    command: &str,
    params: &'a [(&str, SqlValue)],
) -> Result<(String, Vec<&'a SqlValue>), DbError> {
    let mut sql = String::with_capacity(command.len());
    let mut names: Vec<&str> = Vec::new();
    let mut ordered: Vec<&'a SqlValue> = Vec::new();

    let mut rest = command;
    while let Some(start) = rest.find("%(") {
        sql.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find(")s").ok_or_else(|| {
            DbError::Statement(format!("malformed parameter placeholder in: {command}"))
        })?;
        let name = &after[..end];
        let index = match names.iter().position(|n| *n == name) {
            Some(i) => i,
            None => {
                let (_, value) = params.iter().find(|(n, _)| *n == name).ok_or_else(|| {
                    DbError::Statement(format!("no value bound for parameter {name} in: {command}"))
                })?;
                names.push(name);
                ordered.push(value);
                names.len() - 1
            }
        };
        sql.push_str(&format!("${}", index + 1));
        rest = &after[end + 2..];
    }
    sql.push_str(rest);
    Ok((sql, ordered))
}
