/// Expose all manager components used by main
pub mod reconciler;
pub use crate::reconciler::*;

pub mod config;
pub mod db;
pub mod provision;
pub mod state;
pub mod types;
pub mod watcher;

use thiserror::Error;

pub use crate::db::DbError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Kube Error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Database Error: {0}")]
    Db(#[from] DbError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
