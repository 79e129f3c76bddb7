use crate::api::SendRequest;
use sqlx::SqlitePool;
use sqlx::migrate::{Migrate, MigrateError, Migrator};
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;
use ulid::Ulid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] MigrateError),
}

pub async fn connect(dsn: &str) -> Result<SqlitePool, StorageError> {
    let pool = SqlitePoolOptions::new().connect(dsn).await?;
    Ok(pool)
}

/// Applies pending migrations. Returns how many were applied by this call.
pub async fn migrate(pool: &SqlitePool) -> Result<usize, StorageError> {
    let applied: Vec<i64> = {
        let mut conn = pool.acquire().await?;
        conn.ensure_migrations_table().await?;
        conn.list_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect()
    };
    let pending = MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration() && !applied.contains(&m.version))
        .count();

    MIGRATOR.run(pool).await?;
    Ok(pending)
}

pub async fn add_report(pool: &SqlitePool, request: &SendRequest) -> Result<Ulid, StorageError> {
    let id = Ulid::new();
    let SendRequest {
        timestamp,
        param,
        client,
        report,
    } = request;

    sqlx::query(
        "INSERT INTO csp_reports (id, timestamp, application, version, checksum, force, remote_address, user_agent, document_uri, referrer_uri, violated_directive, effective_directive, original_policy, disposition, blocked_uri, status_code, source_uri, line_number, column_number, script_sample) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
    )
    .bind(id.to_string())
    .bind(timestamp)
    .bind(&param.application)
    .bind(&param.version)
    .bind(&param.checksum)
    .bind(param.force)
    .bind(&client.remote_address)
    .bind(&client.user_agent)
    .bind(&report.document_uri)
    .bind(&report.referrer_uri)
    .bind(&report.violated_directive)
    .bind(&report.effective_directive)
    .bind(&report.original_policy)
    .bind(&report.disposition)
    .bind(&report.blocked_uri)
    .bind(&report.status_code)
    .bind(&report.source_uri)
    .bind(&report.line_number)
    .bind(&report.column_number)
    .bind(&report.script_sample)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn count_reports(pool: &SqlitePool) -> Result<i64, StorageError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM csp_reports")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
pub(crate) async fn empty_memory_pool() -> SqlitePool {
    // One long-lived connection, otherwise every connection sees its own
    // empty database.
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = empty_memory_pool().await;
    migrate(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use crate::api::{Client, CspReport, Param, SendRequest};
    use crate::storage::{add_report, count_reports, empty_memory_pool, memory_pool, migrate};
    use chrono::Utc;

    fn send_request() -> SendRequest {
        SendRequest {
            timestamp: Utc::now(),
            param: Param {
                application: "shop".to_string(),
                version: "2".to_string(),
                checksum: "".to_string(),
                force: false,
            },
            client: Client {
                remote_address: "192.0.2.7:51234".to_string(),
                user_agent: "curl/8.5.0".to_string(),
            },
            report: CspReport {
                document_uri: "https://example.com/".to_string(),
                violated_directive: "img-src".to_string(),
                ..CspReport::default()
            },
        }
    }

    #[tokio::test]
    async fn test_add_report() {
        let pool = memory_pool().await;
        assert_eq!(0, count_reports(&pool).await.unwrap());

        let first = add_report(&pool, &send_request()).await.unwrap();
        let second = add_report(&pool, &send_request()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(2, count_reports(&pool).await.unwrap());

        let (application, violated_directive): (String, String) = sqlx::query_as(
            "SELECT application, violated_directive FROM csp_reports WHERE id = ?",
        )
        .bind(first.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!("shop", application);
        assert_eq!("img-src", violated_directive);
    }

    #[tokio::test]
    async fn test_migrate_twice() {
        let pool = empty_memory_pool().await;
        assert_eq!(1, migrate(&pool).await.unwrap());
        assert_eq!(0, migrate(&pool).await.unwrap());
        assert_eq!(0, count_reports(&pool).await.unwrap());
    }
}
