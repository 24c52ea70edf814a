//! PostgreSQL implementations of the store seams.

pub mod groups;
pub mod host;
pub mod providers;
pub mod sessions;
pub mod shares;

pub use groups::PgGroupDirectory;
pub use host::PgShareSource;
pub use providers::PgProviderStore;
pub use sessions::PgSessionStore;
pub use shares::PgShareStore;

use vo_federation_core::StoreError;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

/// Maps a unique violation to [`StoreError::Duplicate`].
fn unique_or_backend(e: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate {
            entity,
            key: key.to_string(),
        },
        _ => backend(e),
    }
}
