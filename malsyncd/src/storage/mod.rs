mod keyring_store;
mod routed;
mod sqlite_store;

use thiserror::Error;

pub use keyring_store::{KeyringStore, SERVICE_NAME};
pub use routed::{RoutedStore, SECRET_KEYS};
pub use sqlite_store::{SqliteStore, default_db_path};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}
