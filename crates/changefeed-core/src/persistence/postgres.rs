//! PostgreSQL implementations of EventLog, NotificationStore and EntityDirectory
//!
//! Production-ready persistence using PostgreSQL with:
//! - Per-stream sequence counters upserted inside the append transaction
//! - A unique `(stream_key, sequence)` constraint backing gapless ordering
//! - A unique `(source_event_id, recipient_id)` constraint backing idempotent inserts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::event::{Action, Event, NewEvent, StreamKey};
use crate::notify::{
    EntityDirectory, InsertOutcome, ListOptions, MarkReadOutcome, Notification,
    NotificationType, RepositoryRecord, UserSettings,
};

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))
}

/// Classify a server error by its SQLSTATE
///
/// Connection exceptions (class 08), serialization failures, deadlocks and
/// admin shutdown may clear on retry. Data exceptions (class 22) and
/// constraint violations (class 23) are the caller's fault.
fn classify_sqlstate(code: &str, message: String) -> StoreError {
    match code {
        "40001" | "40P01" | "57P01" => StoreError::Unavailable(message),
        c if c.starts_with("08") => StoreError::Unavailable(message),
        c if c.starts_with("22") || c.starts_with("23") => StoreError::Rejected(message),
        _ => StoreError::Database(message),
    }
}

fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(ref db) => match db.code() {
            Some(code) => classify_sqlstate(&code, e.to_string()),
            None => StoreError::Database(e.to_string()),
        },
        other => StoreError::Database(other.to_string()),
    }
}

/// PostgreSQL implementation of EventLog
///
/// # Example
///
/// ```ignore
/// use changefeed_core::PostgresEventLog;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/changefeed").await?;
/// let log = PostgresEventLog::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Create a new PostgreSQL log with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &PgRow) -> Event {
    let action: String = row.get("action");
    Event {
        id: row.get("id"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        action: Action::from(action),
        actor_id: row.get("actor_id"),
        payload: row.get("payload"),
        sequence: row.get("sequence"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    #[instrument(skip(self, event), fields(stream = %event.stream_key, action = %event.action))]
    async fn append(&self, event: NewEvent) -> Result<Event, StoreError> {
        let stream_key = event.stream_key.to_string();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // The upsert row-locks this stream's counter until commit, so
        // concurrent appenders to the same stream serialize here.
        let row = sqlx::query(
            r#"
            INSERT INTO changefeed_streams (stream_key, head_sequence)
            VALUES ($1, 1)
            ON CONFLICT (stream_key)
            DO UPDATE SET head_sequence = changefeed_streams.head_sequence + 1
            RETURNING head_sequence
            "#,
        )
        .bind(&stream_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let sequence: i64 = row.get("head_sequence");
        let event = Event::from_new(event, sequence);

        sqlx::query(
            r#"
            INSERT INTO changefeed_events
                (id, stream_key, entity_type, entity_id, sequence, action, actor_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(&stream_key)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(event.sequence)
        .bind(event.action.as_str())
        .bind(&event.actor_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert event: {}", e);
            map_sqlx_error(e)
        })?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(sequence, "appended event");
        Ok(event)
    }

    #[instrument(skip(self))]
    async fn read(
        &self,
        stream_key: &StreamKey,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, sequence, action, actor_id, payload, created_at
            FROM changefeed_events
            WHERE stream_key = $1 AND sequence >= $2
            ORDER BY sequence
            LIMIT $3
            "#,
        )
        .bind(stream_key.to_string())
        .bind(from_sequence)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to read events: {}", e);
            map_sqlx_error(e)
        })?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn head_sequence(&self, stream_key: &StreamKey) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT head_sequence FROM changefeed_streams WHERE stream_key = $1
            "#,
        )
        .bind(stream_key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.get::<i64, _>("head_sequence")).unwrap_or(0))
    }
}

/// PostgreSQL implementation of NotificationStore
#[derive(Clone)]
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, notification_type, title, description, \
     link, read, created_at, source_event_id, archived_at";

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let type_name: String = row.get("notification_type");
    let notification_type = NotificationType::parse(&type_name).ok_or_else(|| {
        StoreError::Serialization(format!("unknown notification type: {type_name}"))
    })?;

    Ok(Notification {
        id: row.get("id"),
        recipient_id: row.get("recipient_id"),
        notification_type,
        title: row.get("title"),
        description: row.get("description"),
        link: row.get("link"),
        read: row.get("read"),
        created_at: row.get("created_at"),
        source_event_id: row.get("source_event_id"),
        archived_at: row.get::<Option<DateTime<Utc>>, _>("archived_at"),
    })
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    #[instrument(skip(self, notification), fields(recipient = %notification.recipient_id))]
    async fn insert_if_absent(
        &self,
        notification: Notification,
    ) -> Result<InsertOutcome, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO changefeed_notifications
                (id, recipient_id, notification_type, title, description, link, read, created_at, source_event_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_event_id, recipient_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(notification.id)
        .bind(&notification.recipient_id)
        .bind(notification.notification_type.as_str())
        .bind(&notification.title)
        .bind(&notification.description)
        .bind(&notification.link)
        .bind(notification.read)
        .bind(notification.created_at)
        .bind(notification.source_event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted(notification),
            None => InsertOutcome::Duplicate,
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Notification, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM changefeed_notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::NotificationNotFound(id))?;

        notification_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        recipient_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, StoreError> {
        // LIMIT NULL means no limit
        let rows = sqlx::query(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM changefeed_notifications
            WHERE recipient_id = $1
              AND ($2 = FALSE OR read = FALSE)
              AND ($3 = TRUE OR archived_at IS NULL)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#
        ))
        .bind(recipient_id)
        .bind(options.unread_only)
        .bind(options.include_archived)
        .bind(options.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list notifications: {}", e);
            map_sqlx_error(e)
        })?;

        rows.iter().map(notification_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn mark_read(&self, id: Uuid) -> Result<MarkReadOutcome, StoreError> {
        let updated = sqlx::query(&format!(
            r#"
            UPDATE changefeed_notifications
            SET read = TRUE
            WHERE id = $1 AND read = FALSE
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match updated {
            Some(row) => Ok(MarkReadOutcome {
                notification: notification_from_row(&row)?,
                changed: true,
            }),
            None => Ok(MarkReadOutcome {
                notification: self.get(id).await?,
                changed: false,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn mark_all_read(&self, recipient_id: &str) -> Result<u64, StoreError> {
        // A single statement sees one snapshot: rows committed after it
        // started are not touched and stay unread.
        let result = sqlx::query(
            r#"
            UPDATE changefeed_notifications
            SET read = TRUE
            WHERE recipient_id = $1 AND read = FALSE
            "#,
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn archive(&self, id: Uuid) -> Result<Notification, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE changefeed_notifications
            SET archived_at = COALESCE(archived_at, NOW())
            WHERE id = $1
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::NotificationNotFound(id))?;

        notification_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn unread_count(&self, recipient_id: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS unread
            FROM changefeed_notifications
            WHERE recipient_id = $1 AND read = FALSE AND archived_at IS NULL
            "#,
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.get::<i64, _>("unread") as u64)
    }

    #[instrument(skip(self))]
    async fn unannounced(&self, source_event_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM changefeed_notifications
            WHERE source_event_id = $1 AND announced = FALSE
            ORDER BY created_at, id
            "#
        ))
        .bind(source_event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(notification_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn claim_announcement(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE changefeed_notifications
            SET announced = TRUE
            WHERE id = $1 AND announced = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_announcement(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE changefeed_notifications
            SET announced = FALSE
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

/// PostgreSQL implementation of EntityDirectory
///
/// Collaborators push repository ownership and user settings through the
/// directory API; rows are keyed by entity id and overwritten on upsert.
#[derive(Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityDirectory for PostgresDirectory {
    #[instrument(skip(self))]
    async fn repository(&self, repository_id: &str) -> Result<Option<RepositoryRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, name FROM changefeed_repositories WHERE id = $1
            "#,
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| RepositoryRecord {
            id: r.get("id"),
            owner_id: r.get("owner_id"),
            name: r.get("name"),
        }))
    }

    #[instrument(skip(self))]
    async fn notifications_enabled(&self, user_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT notifications_enabled FROM changefeed_user_settings WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row
            .map(|r| r.get::<bool, _>("notifications_enabled"))
            .unwrap_or(true))
    }

    #[instrument(skip(self, repository), fields(repository = %repository.id))]
    async fn upsert_repository(&self, repository: RepositoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO changefeed_repositories (id, owner_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id)
            DO UPDATE SET owner_id = EXCLUDED.owner_id, name = EXCLUDED.name
            "#,
        )
        .bind(&repository.id)
        .bind(&repository.owner_id)
        .bind(&repository.name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to upsert repository: {}", e);
            map_sqlx_error(e)
        })?;

        Ok(())
    }

    #[instrument(skip(self, settings))]
    async fn upsert_user_settings(
        &self,
        user_id: &str,
        settings: UserSettings,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO changefeed_user_settings (user_id, notifications_enabled)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET notifications_enabled = EXCLUDED.notifications_enabled
            "#,
        )
        .bind(user_id)
        .bind(settings.notifications_enabled)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: &str) -> StoreError {
        classify_sqlstate(code, format!("sqlstate {code}"))
    }

    #[test]
    fn test_connection_and_concurrency_failures_are_transient() {
        for code in ["08000", "08006", "08P01", "40001", "40P01", "57P01"] {
            let err = classify(code);
            assert!(matches!(err, StoreError::Unavailable(_)), "{code}");
            assert!(err.is_transient(), "{code}");
        }
    }

    #[test]
    fn test_data_and_constraint_errors_are_rejections() {
        for code in ["22001", "22P02", "23505", "23502"] {
            let err = classify(code);
            assert!(matches!(err, StoreError::Rejected(_)), "{code}");
            assert!(!err.is_transient(), "{code}");
        }
    }

    #[test]
    fn test_other_server_errors_are_permanent() {
        // undefined table, insufficient privilege, syntax error
        for code in ["42P01", "42501", "42601", "57014"] {
            let err = classify(code);
            assert!(matches!(err, StoreError::Database(_)), "{code}");
            assert!(!err.is_transient(), "{code}");
        }
    }

    #[test]
    fn test_pool_exhaustion_is_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!map_sqlx_error(sqlx::Error::RowNotFound).is_transient());
    }
}
