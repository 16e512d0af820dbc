//! SQLite metadata index.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
    QueryBuilder, Row, Sqlite, SqliteConnection,
};
use uuid::Uuid;

use common::blob::{millis_to_time, now_millis, BlobInfo, BlobKey, BlobTags};
use common::continuation::ContinuationToken;
use common::error::IndexError;
use common::index::{MetadataIndex, SearchPage, SearchQuery};
use common::tags::{DEVICE_TAG, NAME_TAG, SESSION_TAG, SUBJECT_TAG};

/// Newest schema version this release understands.
pub const SUPPORTED_SCHEMA_VERSION: i64 = 2;

const RECORD_COLUMNS: &str =
    "subject, id, device, name, session, content_type, created_at, expires_at";

/// [`MetadataIndex`] backed by SQLite.
///
/// Every state transition is a single statement or transaction, so
/// several processes can share one database file.
#[derive(Debug, Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (or create) an index stored in a file.
    pub async fn open(path: &Path) -> Result<Self, IndexError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(IndexError::backend)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        Self::from_pool(pool).await
    }

    /// Create an index that lives as long as the returned value.
    pub async fn in_memory() -> Result<Self, IndexError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);

        // a single connection that is never recycled holds the database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, IndexError> {
        let index = Self { pool };
        index.check_schema_version().await?;
        index.run_migrations().await?;
        Ok(index)
    }

    /// Refuse to touch a database written by a newer release.
    async fn check_schema_version(&self) -> Result<(), IndexError> {
        let has_marker = sqlx::query(
            r#"
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_versions'
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .is_some();
        if !has_marker {
            return Ok(());
        }

        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM schema_versions WHERE status = 'complete'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        match found {
            Some(found) if found > SUPPORTED_SCHEMA_VERSION => Err(IndexError::SchemaTooNew {
                found,
                supported: SUPPORTED_SCHEMA_VERSION,
            }),
            _ => Ok(()),
        }
    }

    /// Run database migrations and record the schema marker.
    async fn run_migrations(&self) -> Result<(), IndexError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(IndexError::backend)?;

        sqlx::query(
            r#"
            INSERT INTO schema_versions (version, status) VALUES (?, 'complete')
            ON CONFLICT(version) DO UPDATE SET status = excluded.status
            "#,
        )
        .bind(SUPPORTED_SCHEMA_VERSION)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::debug!(version = SUPPORTED_SCHEMA_VERSION, "metadata index schema ready");
        Ok(())
    }

    /// Custom tags of `keys`, in insertion order per key.
    async fn load_custom_tags(
        conn: &mut SqliteConnection,
        keys: &[(String, String)],
    ) -> Result<HashMap<(String, String), BTreeTags>, IndexError> {
        let mut tags: HashMap<(String, String), BTreeTags> = HashMap::new();
        if keys.is_empty() {
            return Ok(tags);
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT subject, id, tag_name, tag_value FROM custom_blob_metadata WHERE (subject, id) IN (VALUES ",
        );
        let mut tuples = query.separated(", ");
        for (subject, id) in keys {
            tuples
                .push("(")
                .push_bind_unseparated(subject)
                .push_unseparated(", ")
                .push_bind_unseparated(id)
                .push_unseparated(")");
        }
        query.push(") ORDER BY rowid");

        let rows = query.build().fetch_all(&mut *conn).await.map_err(db_err)?;
        for row in rows {
            let key = (row.get::<String, _>("subject"), row.get::<String, _>("id"));
            tags.entry(key)
                .or_default()
                .entry(row.get("tag_name"))
                .or_default()
                .push(row.get("tag_value"));
        }
        Ok(tags)
    }

    /// Attach custom tags to `rows`. Must run on the connection that read
    ///  `rows`, inside the same transaction, so both reads share a snapshot.
    async fn rows_to_infos(
        conn: &mut SqliteConnection,
        rows: Vec<SqliteRow>,
    ) -> Result<Vec<BlobInfo>, IndexError> {
        let records = rows
            .iter()
            .map(Record::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let keys: Vec<_> = records
            .iter()
            .map(|r| (r.subject.clone(), r.id.to_string()))
            .collect();
        let mut custom = Self::load_custom_tags(conn, &keys).await?;

        Ok(records
            .into_iter()
            .zip(keys)
            .map(|(record, key)| record.into_info(custom.remove(&key).unwrap_or_default()))
            .collect())
    }
}

type BTreeTags = std::collections::BTreeMap<String, Vec<String>>;

/// A `blob_metadata` row.
struct Record {
    subject: String,
    id: Uuid,
    device: Option<String>,
    name: Option<String>,
    session: Option<String>,
    content_type: Option<String>,
    created_at: i64,
    expires_at: Option<i64>,
}

impl Record {
    fn from_row(row: &SqliteRow) -> Result<Self, IndexError> {
        let id: String = row.get("id");
        Ok(Self {
            subject: row.get("subject"),
            id: Uuid::parse_str(&id).map_err(IndexError::backend)?,
            device: row.get("device"),
            name: row.get("name"),
            session: row.get("session"),
            content_type: row.get("content_type"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }

    fn into_info(self, custom_tags: BTreeTags) -> BlobInfo {
        BlobInfo {
            key: BlobKey::new(self.subject, self.id),
            tags: BlobTags {
                device: self.device,
                name: self.name,
                session: self.session,
                content_type: self.content_type,
                time_to_live: None,
                custom_tags,
            },
            created_at: millis_to_time(self.created_at),
            expires_at: self.expires_at.map(millis_to_time),
        }
    }
}

/// Expiration instant in milliseconds, saturating at the latest representable time.
fn expires_at_millis(created_at: i64, ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    created_at
        .saturating_add(ttl)
        .min(DateTime::<Utc>::MAX_UTC.timestamp_millis())
}

fn db_err(err: sqlx::Error) -> IndexError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            tracing::warn!(error = %err, "metadata index unavailable");
            IndexError::Unavailable
        }
        err => IndexError::backend(err),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl MetadataIndex for SqliteIndex {
    async fn stage(&self, key: &BlobKey, tags: &BlobTags) -> Result<BlobInfo, IndexError> {
        let created_at = now_millis();
        let created_ms = created_at.timestamp_millis();
        let expires_ms = tags
            .time_to_live
            .map(|ttl| expires_at_millis(created_ms, ttl));

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO blob_metadata
                (subject, id, device, name, session, content_type, created_at, expires_at, staged)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&key.subject)
        .bind(key.id.to_string())
        .bind(&tags.device)
        .bind(&tags.name)
        .bind(&tags.session)
        .bind(&tags.content_type)
        .bind(created_ms)
        .bind(expires_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                IndexError::KeyConflict(key.clone())
            } else {
                db_err(e)
            }
        })?;

        let rows: Vec<(&String, &String)> = tags
            .custom_tags
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name, value)))
            .collect();
        if !rows.is_empty() {
            let mut insert: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO custom_blob_metadata (subject, id, tag_name, tag_value) ",
            );
            insert.push_values(rows, |mut row, (name, value)| {
                row.push_bind(&key.subject)
                    .push_bind(key.id.to_string())
                    .push_bind(name)
                    .push_bind(value);
            });
            insert.build().execute(&mut *tx).await.map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(key = %key, "staged blob metadata");

        Ok(BlobInfo {
            key: key.clone(),
            tags: BlobTags {
                time_to_live: None,
                ..tags.clone()
            },
            created_at,
            expires_at: expires_ms.map(millis_to_time),
        })
    }

    async fn complete(&self, key: &BlobKey) -> Result<(), IndexError> {
        let result = sqlx::query(
            r#"
            UPDATE blob_metadata SET staged = 0
            WHERE subject = ? AND id = ? AND staged = 1
            "#,
        )
        .bind(&key.subject)
        .bind(key.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(IndexError::StagedRecordNotFound);
        }
        tracing::debug!(key = %key, "completed blob metadata");
        Ok(())
    }

    async fn revert(&self, key: &BlobKey) -> Result<(), IndexError> {
        // custom tag rows go with the record through the cascading foreign key
        let result = sqlx::query(
            r#"
            DELETE FROM blob_metadata WHERE subject = ? AND id = ? AND staged = 1
            "#,
        )
        .bind(&key.subject)
        .bind(key.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(IndexError::StagedRecordNotFound);
        }
        tracing::debug!(key = %key, "reverted staged blob metadata");
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), IndexError> {
        let result = sqlx::query(
            r#"
            DELETE FROM blob_metadata WHERE subject = ? AND id = ?
            "#,
        )
        .bind(&key.subject)
        .bind(key.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(IndexError::RecordNotFound);
        }
        Ok(())
    }

    async fn get(&self, key: &BlobKey, visible_as_of: DateTime<Utc>) -> Result<BlobInfo, IndexError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let row = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM blob_metadata
            WHERE subject = ? AND id = ? AND staged = 0
              AND (expires_at IS NULL OR expires_at > ?)
            "#
        ))
        .bind(&key.subject)
        .bind(key.id.to_string())
        .bind(visible_as_of.timestamp_millis())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(IndexError::RecordNotFound)?;

        let info = Self::rows_to_infos(&mut tx, vec![row])
            .await?
            .pop()
            .ok_or(IndexError::RecordNotFound)?;
        tx.commit().await.map_err(db_err)?;
        Ok(info)
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, IndexError> {
        let page_size = query.effective_page_size();
        let cursor = query
            .continuation
            .as_ref()
            .map(ContinuationToken::decode)
            .transpose()?;
        let visible_as_of = query.at.unwrap_or_else(Utc::now);

        let mut sql: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {RECORD_COLUMNS} FROM blob_metadata m WHERE m.staged = 0"
        ));
        sql.push(" AND (m.expires_at IS NULL OR m.expires_at > ")
            .push_bind(visible_as_of.timestamp_millis())
            .push(")");

        if let Some(at) = query.at {
            sql.push(" AND m.created_at <= ")
                .push_bind(at.timestamp_millis());
        }

        for (name, values) in &query.filter {
            let name = name.to_lowercase();
            let column = match name.as_str() {
                SUBJECT_TAG => Some("m.subject"),
                DEVICE_TAG => Some("m.device"),
                NAME_TAG => Some("m.name"),
                SESSION_TAG => Some("m.session"),
                _ => None,
            };
            for value in values {
                match column {
                    Some(column) => {
                        sql.push(format!(" AND {column} = ")).push_bind(value.clone());
                    }
                    None => {
                        sql.push(
                            " AND EXISTS (SELECT 1 FROM custom_blob_metadata c \
                             WHERE c.subject = m.subject AND c.id = m.id AND c.tag_name = ",
                        )
                        .push_bind(name.clone())
                        .push(" AND c.tag_value = ")
                        .push_bind(value.clone())
                        .push(")");
                    }
                }
            }
        }

        if let Some(cursor) = cursor {
            sql.push(" AND (m.created_at < ")
                .push_bind(cursor.created_at_ms);
            if let Some(id) = cursor.id {
                sql.push(" OR (m.created_at = ")
                    .push_bind(cursor.created_at_ms)
                    .push(" AND m.id < ")
                    .push_bind(id.to_string())
                    .push(")");
            }
            sql.push(")");
        }

        sql.push(" ORDER BY m.created_at DESC, m.id DESC LIMIT ")
            .push_bind((page_size + 1) as i64);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows = sql.build().fetch_all(&mut *tx).await.map_err(db_err)?;
        let mut items = Self::rows_to_infos(&mut tx, rows).await?;
        tx.commit().await.map_err(db_err)?;

        let next = if items.len() > page_size {
            let extra = items.split_off(page_size).remove(0);
            items.last().map(|last| {
                let ts = last.created_at.timestamp_millis();
                let tie = last.created_at == extra.created_at;
                ContinuationToken::encode(ts, tie.then_some(last.key.id))
            })
        } else {
            None
        };

        Ok(SearchPage { items, next })
    }

    async fn scan_stale_or_expired(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BlobKey>, IndexError> {
        let older_than = older_than.timestamp_millis();
        let rows = sqlx::query(
            r#"
            SELECT subject, id FROM blob_metadata
            WHERE (staged = 1 AND created_at < ?)
               OR (expires_at IS NOT NULL AND expires_at < ?)
            ORDER BY created_at
            LIMIT ?
            "#,
        )
        .bind(older_than)
        .bind(older_than)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let id = Uuid::parse_str(&id).map_err(IndexError::backend)?;
                Ok(BlobKey::new(row.get::<String, _>("subject"), id))
            })
            .collect()
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                tracing::warn!(error = %e, "metadata index health check failed");
                IndexError::Unavailable
            })
    }
}
