//! Working key store
//!
//! The bank issues one working key per day. The store reads today's key
//! from the `api_statuses` table and, on the first demand of a new day,
//! runs the issuance procedure once and re-reads.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::crypto::preview;
use super::BncError;
use crate::cache::{local_date, Clock};

/// API name under which BNC keys are stored
pub const BNC_API_NAME: &str = "bnc";

/// A stored working key
#[derive(Clone, PartialEq)]
pub struct WorkingKeyRecord {
    pub api_name: String,
    pub working_key: String,
    pub generated_at: DateTime<Utc>,
}

impl std::fmt::Debug for WorkingKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingKeyRecord")
            .field("api_name", &self.api_name)
            .field("working_key", &preview(&self.working_key))
            .field("generated_at", &self.generated_at)
            .finish()
    }
}

/// Credential storage
#[async_trait]
pub trait WorkingKeyRepository: Send + Sync {
    /// Newest key generated on `date` (in `offset` local time)
    async fn latest_for_date(
        &self,
        api_name: &str,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Option<WorkingKeyRecord>, BncError>;

    /// Newest key regardless of date
    async fn latest(&self, api_name: &str) -> Result<Option<WorkingKeyRecord>, BncError>;

    async fn save(&self, record: &WorkingKeyRecord) -> Result<(), BncError>;
}

/// Procedure that obtains a fresh working key from the bank
#[async_trait]
pub trait KeyIssuer: Send + Sync {
    async fn issue(&self) -> Result<String, BncError>;
}

/// Read-through, day-scoped working key cache
pub struct SessionKeyStore {
    repository: Arc<dyn WorkingKeyRepository>,
    issuer: Arc<dyn KeyIssuer>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
    refresh_lock: Mutex<()>,
}

impl SessionKeyStore {
    pub fn new(
        repository: Arc<dyn WorkingKeyRepository>,
        issuer: Arc<dyn KeyIssuer>,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            repository,
            issuer,
            clock,
            offset,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current working key, issuing one if today has none.
    ///
    /// Returns `None` when no key exists and issuance failed.
    pub async fn get_working_key(&self) -> Option<String> {
        match self.todays_key().await {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Working key lookup failed");
                return None;
            }
        }

        // One issuance per day even under concurrent first demand
        let _guard = self.refresh_lock.lock().await;
        if let Ok(Some(key)) = self.todays_key().await {
            return Some(key);
        }

        match self.refresh().await {
            Ok(()) => {}
            Err(e) => tracing::error!(error = %e, "Working key issuance failed"),
        }

        match self.repository.latest(BNC_API_NAME).await {
            Ok(record) => record.map(|r| r.working_key),
            Err(e) => {
                tracing::error!(error = %e, "Working key lookup failed");
                None
            }
        }
    }

    async fn todays_key(&self) -> Result<Option<String>, BncError> {
        let today = local_date(self.clock.as_ref(), self.offset);
        let record = self
            .repository
            .latest_for_date(BNC_API_NAME, today, self.offset)
            .await?;
        Ok(record.map(|r| r.working_key))
    }

    /// Issue and persist a new key
    pub async fn refresh(&self) -> Result<(), BncError> {
        let working_key = self.issuer.issue().await?;
        let record = WorkingKeyRecord {
            api_name: BNC_API_NAME.to_string(),
            working_key,
            generated_at: self.clock.now(),
        };
        self.repository.save(&record).await?;

        tracing::info!(
            working_key = %preview(&record.working_key),
            generated_at = %record.generated_at,
            "Stored new BNC working key"
        );
        Ok(())
    }
}

/// `api_statuses` table
#[derive(Debug, Clone)]
pub struct PgWorkingKeyRepository {
    pool: PgPool,
}

impl PgWorkingKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkingKeyRepository for PgWorkingKeyRepository {
    async fn latest_for_date(
        &self,
        api_name: &str,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Option<WorkingKeyRecord>, BncError> {
        let start = date
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(offset).single())
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| BncError::Config(format!("invalid date {}", date)))?;
        let end = start + chrono::Duration::days(1);

        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT api_name, working_key, generated_at
            FROM api_statuses
            WHERE api_name = $1 AND generated_at >= $2 AND generated_at < $3
            ORDER BY generated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(api_name)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(api_name, working_key, generated_at)| WorkingKeyRecord {
            api_name,
            working_key,
            generated_at,
        }))
    }

    async fn latest(&self, api_name: &str) -> Result<Option<WorkingKeyRecord>, BncError> {
        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT api_name, working_key, generated_at
            FROM api_statuses
            WHERE api_name = $1
            ORDER BY generated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(api_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(api_name, working_key, generated_at)| WorkingKeyRecord {
            api_name,
            working_key,
            generated_at,
        }))
    }

    async fn save(&self, record: &WorkingKeyRecord) -> Result<(), BncError> {
        sqlx::query(
            r#"
            INSERT INTO api_statuses (api_name, working_key, generated_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&record.api_name)
        .bind(&record.working_key)
        .bind(record.generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-process repository, for tests and local runs without a database
#[derive(Debug, Default)]
pub struct MemoryWorkingKeyRepository {
    records: Mutex<Vec<WorkingKeyRecord>>,
}

impl MemoryWorkingKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl WorkingKeyRepository for MemoryWorkingKeyRepository {
    async fn latest_for_date(
        &self,
        api_name: &str,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Option<WorkingKeyRecord>, BncError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.api_name == api_name)
            .find(|r| r.generated_at.with_timezone(&offset).date_naive() == date)
            .cloned())
    }

    async fn latest(&self, api_name: &str) -> Result<Option<WorkingKeyRecord>, BncError> {
        let records = self.records.lock().await;
        Ok(records.iter().rev().find(|r| r.api_name == api_name).cloned())
    }

    async fn save(&self, record: &WorkingKeyRecord) -> Result<(), BncError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
