use crate::purge::{DeletionPipeline, PurgeConfig, PurgeStore};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tinylink_core::{
    DeletionTicket, Error, Repository, Result, SaveOutcome, ShortCode, StorageError, UserLink,
};
use tracing::{debug, info, warn};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempts at saving a URL whose active row vanished between the insert and
/// the lookup (it was soft-deleted concurrently).
const SAVE_ATTEMPTS: usize = 3;

/// PostgreSQL implementation of the repository contract.
///
/// Links live in `urls`, ownership in `user_urls`. Deletion is soft: the
/// `deleted` flag is set by the purge worker of this instance's
/// [`DeletionPipeline`], which is the only writer of that column. URL
/// uniqueness only covers active rows, so saving a URL whose link was deleted
/// allocates a new id instead of resurrecting the old one.
///
/// The two inserts of a save are not wrapped in a transaction; a crash between
/// them leaves a link without an owner, which only affects deletion rights.
#[derive(Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    pipeline: DeletionPipeline,
}

impl PostgresRepository {
    /// Creates a repository from an existing pool, applying pending migrations
    /// and starting the purge worker.
    pub async fn new(pool: PgPool, purge: PurgeConfig) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Query(format!("migration failed: {e}")))?;

        let store = Arc::new(PgPurgeStore { pool: pool.clone() });
        let pipeline = DeletionPipeline::start(store, purge);

        Ok(Self { pool, pipeline })
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str, purge: PurgeConfig) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Self::new(pool, purge).await
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_or_find(&self, original_url: &str) -> Result<(i64, bool)> {
        for _ in 0..SAVE_ATTEMPTS {
            let inserted = sqlx::query("INSERT INTO urls (url) VALUES ($1) RETURNING id")
                .bind(original_url)
                .fetch_one(&self.pool)
                .await;

            match inserted {
                Ok(row) => return Ok((row.try_get("id").map_err(map_sqlx_error)?, true)),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(map_sqlx_error(err).into()),
            }

            let existing = sqlx::query("SELECT id FROM urls WHERE url = $1 AND NOT deleted")
                .bind(original_url)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

            if let Some(row) = existing {
                return Ok((row.try_get("id").map_err(map_sqlx_error)?, false));
            }
            debug!("Active row disappeared between insert and lookup, retrying");
        }

        Err(StorageError::Query(format!(
            "could not save url after {SAVE_ATTEMPTS} attempts"
        ))
        .into())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed => StorageError::Closed,
        sqlx::Error::WorkerCrashed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StorageError::Unavailable(message)
        }
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn to_db_id(id: u64) -> std::result::Result<i64, StorageError> {
    i64::try_from(id).map_err(|_| StorageError::InvalidData(format!("link id {id} is out of range")))
}

fn from_db_id(id: i64) -> std::result::Result<u64, StorageError> {
    u64::try_from(id).map_err(|_| StorageError::InvalidData(format!("negative link id {id}")))
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn resolve(&self, code: &str) -> Result<String> {
        let code = ShortCode::parse(code)?;

        let row = sqlx::query("SELECT url, deleted FROM urls WHERE id = $1")
            .bind(to_db_id(code.id())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(Error::NotFound(code.to_string()));
        };

        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Err(Error::Deleted(code.to_string()));
        }

        Ok(row.try_get("url").map_err(map_sqlx_error)?)
    }

    async fn save(&self, original_url: &str, user_id: &str) -> Result<SaveOutcome> {
        let (id, created) = self.insert_or_find(original_url).await?;

        sqlx::query(
            r#"
            INSERT INTO user_urls (id, url_id)
            VALUES ($1, $2)
            ON CONFLICT (id, url_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let code = ShortCode::from_id(from_db_id(id)?);
        if created {
            Ok(SaveOutcome::created(code))
        } else {
            debug!(code = %code, "URL already shortened");
            Ok(SaveOutcome::existing(code))
        }
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.url
            FROM urls u
            JOIN user_urls uu ON uu.url_id = u.id
            WHERE uu.id = $1
              AND NOT u.deleted
            ORDER BY u.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if rows.is_empty() {
            return Err(Error::NoLinksForUser(user_id.to_string()));
        }

        rows.into_iter()
            .map(|row| -> Result<UserLink> {
                let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
                Ok(UserLink {
                    code: ShortCode::from_id(from_db_id(id)?),
                    original_url: row.try_get("url").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    fn request_deletion(&self, user_id: &str, codes: Vec<String>) -> DeletionTicket {
        self.pipeline.request(user_id, codes)
    }

    async fn health_check(&self) -> Result<()> {
        match tokio::time::timeout(
            HEALTH_CHECK_TIMEOUT,
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(map_sqlx_error(e).into()),
            Err(_) => {
                warn!("Database health check timed out");
                Err(StorageError::Timeout(format!(
                    "no response within {HEALTH_CHECK_TIMEOUT:?}"
                ))
                .into())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Ok(());
        }
        self.pipeline.shutdown().await;
        self.pool.close().await;
        info!("Closed database connection pool");
        Ok(())
    }
}

/// The purge pipeline's view of the database.
struct PgPurgeStore {
    pool: PgPool,
}

#[async_trait]
impl PurgeStore for PgPurgeStore {
    async fn owned_active(
        &self,
        user_id: &str,
        ids: &[u64],
    ) -> std::result::Result<Vec<u64>, StorageError> {
        let ids = ids
            .iter()
            .map(|id| to_db_id(*id))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let rows = sqlx::query(
            r#"
            SELECT u.id
            FROM urls u
            JOIN user_urls uu ON uu.url_id = u.id
            WHERE uu.id = $1
              AND u.id = ANY($2)
              AND NOT u.deleted
            "#,
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| from_db_id(row.try_get("id").map_err(map_sqlx_error)?))
            .collect()
    }

    async fn mark_deleted(&self, ids: &[u64]) -> std::result::Result<u64, StorageError> {
        let ids = ids
            .iter()
            .map(|id| to_db_id(*id))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let result = sqlx::query("UPDATE urls SET deleted = TRUE WHERE id = ANY($1) AND NOT deleted")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
